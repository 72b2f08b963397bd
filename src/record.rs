use chrono::{DateTime, Local};
use std::path::Path;

/// Уровень сообщения.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Info,
    Warning,
    Critical,
    Debug,
    Time,
}

impl Level {
    /// Bracketed tag written into every line.
    pub fn tag(self) -> &'static str {
        match self {
            Level::Info => "[info]",
            Level::Warning => "[warning]",
            Level::Critical => "[critical]",
            Level::Debug => "[debug]",
            Level::Time => "[time]",
        }
    }
}

/// Call site of a logging statement. Build it with [`location!`](crate::location).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    file: &'static str,
    function: &'static str,
}

impl Location {
    /// `file` is usually `file!()`, `function` the type name of a function item
    /// declared inside the enclosing function.
    pub const fn new(file: &'static str, function: &'static str) -> Self {
        Self { file, function }
    }

    /// Basename of the source file.
    pub fn file(&self) -> &'static str {
        Path::new(self.file)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(self.file)
    }

    pub fn function(&self) -> &'static str {
        function_from_path(self.function)
    }
}

/// Log record. Rendered immediately, never stored.
#[derive(Debug)]
pub struct Record<'a> {
    pub timestamp: DateTime<Local>,
    pub level: Level,
    pub location: Option<&'a Location>,
    pub tid: u64,
    pub message: &'a str,
}

impl<'a> Record<'a> {
    pub fn new(level: Level, location: Option<&'a Location>, tid: u64, message: &'a str) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            location,
            tid,
            message,
        }
    }
}

/// Reduce a path produced by `type_name` of a nested `fn f()` to the name of
/// the enclosing function, skipping closure and async frames.
pub fn function_from_path(path: &'static str) -> &'static str {
    let mut path = path.strip_suffix("::f").unwrap_or(path);
    while let Some(outer) = path.strip_suffix("::{{closure}}") {
        path = outer;
    }
    last_segment(path)
}

/// Short name of `T`: `core::num::error::ParseIntError` becomes `ParseIntError`.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    // Generic arguments may contain `::` themselves.
    let base = match full.find('<') {
        Some(idx) => &full[..idx],
        None => full,
    };
    let mut base = base;
    while let Some(outer) = base.strip_suffix("::{{closure}}") {
        base = outer;
    }
    last_segment(base)
}

fn last_segment(path: &'static str) -> &'static str {
    path.rsplit("::").next().unwrap_or(path)
}

/// Captures the caller's file and enclosing function.
#[macro_export]
macro_rules! location {
    () => {
        $crate::record::Location::new(file!(), $crate::function_name!())
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        type_name_of(f)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    fn foo() -> Location {
        crate::location!()
    }

    #[test]
    fn location_names_enclosing_function() {
        let loc = foo();
        assert_eq!(loc.file(), "record.rs");
        assert_eq!(loc.function(), "foo");
    }

    #[test]
    fn location_inside_closure() {
        let loc = (|| crate::location!())();
        assert_eq!(loc.function(), "location_inside_closure");
    }

    #[test]
    fn function_path_reduction() {
        assert_eq!(function_from_path("app::worker::run::f"), "run");
        assert_eq!(function_from_path("app::main::{{closure}}::{{closure}}::f"), "main");
        assert_eq!(function_from_path("plain"), "plain");
    }

    #[test]
    fn short_names() {
        assert_eq!(short_type_name::<std::num::ParseIntError>(), "ParseIntError");
        assert_eq!(short_type_name::<Vec<std::string::String>>(), "Vec");
        assert_eq!(short_type_name::<str>(), "str");
    }
}
