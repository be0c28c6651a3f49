//! Debug console output.
//!
//! Every line goes through the `log` facade. When the client was built with
//! `debug: true` the line is also printed to stdout with a colored prefix.

#[cfg(not(windows))]
use colorful::{Color, Colorful};

/// Area a debug line belongs to. Used for the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Auth,
    Api,
    Live,
}

impl Scope {
    fn tag(self) -> &'static str {
        match self {
            Scope::Auth => "[AUTH]",
            Scope::Api => "[API]",
            Scope::Live => "[LIVE]",
        }
    }
}

#[doc(hidden)]
pub fn emit(enabled: bool, scope: Scope, level: log::Level, message: &str) {
    log::log!(target: "storefront_client", level, "{} {}", scope.tag(), message);

    if !enabled {
        return;
    }

    #[cfg(windows)]
    println!("{} {}", scope.tag(), message);

    #[cfg(not(windows))]
    {
        let tag = match level {
            log::Level::Error | log::Level::Warn => {
                scope.tag().gradient_with_color(Color::Red, Color::Yellow)
            }
            _ => scope.tag().gradient_with_color(Color::Cyan, Color::SpringGreen4),
        };
        println!("{} {}", tag, message);
    }
}

/// Print a debug line: `debug_log!(enabled, Scope::Api, "GET {}", url)`.
/// An optional level can follow the scope: `debug_log!(on, Scope::Auth, warn, "...")`.
#[macro_export]
macro_rules! debug_log {
    ($enabled:expr, $scope:expr, warn, $($arg:tt)+) => {
        $crate::debug::emit($enabled, $scope, ::log::Level::Warn, &format!($($arg)+))
    };
    ($enabled:expr, $scope:expr, error, $($arg:tt)+) => {
        $crate::debug::emit($enabled, $scope, ::log::Level::Error, &format!($($arg)+))
    };
    ($enabled:expr, $scope:expr, $($arg:tt)+) => {
        $crate::debug::emit($enabled, $scope, ::log::Level::Debug, &format!($($arg)+))
    };
}

/// Shorten a token for display. Never print a full bearer token.
pub fn redact(token: &str) -> String {
    match token.get(..8) {
        Some(head) if token.len() > 12 => format!("{}…", head),
        _ => "***".to_string(),
    }
}
