use crate::record::{Level, Record};

/// `DD/MM/YYYY HH:MM:SS`, local time.
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Render `record` as one plain-text line without the trailing newline.
///
/// `simple` drops timestamp and call site for every level except
/// `critical` and `time`, which keep their fixed layout.
pub fn format(record: &Record, simple: bool) -> String {
    let tag = record.level.tag();
    let message = record.message;

    if simple && !matches!(record.level, Level::Critical | Level::Time) {
        return format!("{tag} - {message}");
    }

    let timestamp = record.timestamp.format(TIMESTAMP_FORMAT);
    match (record.level, record.location) {
        (Level::Critical, _) => {
            format!("{timestamp}  {tag} - Thread {} - {message}", record.tid)
        }
        (Level::Time, _) | (_, None) => format!("{timestamp}  {tag} - {message}"),
        (_, Some(location)) => format!(
            "{timestamp}  {tag} - {} - {}() - {message}",
            location.file(),
            location.function()
        ),
    }
}
