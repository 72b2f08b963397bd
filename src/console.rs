use crate::record::Level;
use console::{style, Color};

#[derive(Debug, Default)]
pub struct Console;

impl Console {
    /// Echo `line` to stdout. Colors are stripped by `console` when stdout is
    /// not a terminal.
    pub fn write(&self, level: Level, line: &str) {
        let color = match level {
            Level::Critical => Color::Red,
            Level::Warning => Color::Yellow,
            Level::Info => Color::Green,
            Level::Debug => Color::Color256(243),
            Level::Time => Color::Cyan,
        };
        println!("{}", style(line).fg(color));
    }
}
