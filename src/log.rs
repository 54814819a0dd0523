//! Process-wide logging facade.
//!
//! Mirrors the teacher's `crate::log::LogLevel` call sites (e.g.
//! `log!(LogDebug, "creating new thread group {} (real tgid:{})", tgid, real_tgid)`):
//! a small set of severities, a set-once list of callbacks, and a `log!` macro that
//! formats and fans a message out to every registered callback. When nothing has been
//! registered, a default callback prints to stderr.

use std::sync::RwLock;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Ord, PartialOrd)]
pub enum LogLevel {
    LogError,
    LogWarn,
    LogInfo,
    LogDebug,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::LogError => "ERROR",
            LogLevel::LogWarn => "WARN",
            LogLevel::LogInfo => "INFO",
            LogLevel::LogDebug => "DEBUG",
        }
    }
}

pub type LogCallback = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

struct Logger {
    callbacks: Vec<LogCallback>,
}

lazy_static! {
    static ref LOGGER: RwLock<Logger> = RwLock::new(Logger {
        callbacks: Vec::new(),
    });
}

/// Registers a callback invoked for every subsequent `log!` call. Callbacks accumulate;
/// there is no way to unregister one, matching the teacher's "process-wide state" note
/// that the logger callback list is set-once infrastructure, not a runtime toggle.
pub fn register_callback(cb: LogCallback) {
    LOGGER.write().unwrap().callbacks.push(cb);
}

#[doc(hidden)]
pub fn dispatch(level: LogLevel, msg: &str) {
    let logger = LOGGER.read().unwrap();
    if logger.callbacks.is_empty() {
        eprintln!("[{}] {}", level.as_str(), msg);
    } else {
        for cb in logger.callbacks.iter() {
            cb(level, msg);
        }
    }
}

#[macro_export]
macro_rules! log {
    ($level:ident, $($arg:tt)*) => {
        $crate::log::dispatch($crate::log::LogLevel::$level, &format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn log_macro_compiles_and_dispatches_without_a_registered_callback() {
        log!(LogDebug, "unregistered callback path, value={}", 42);
    }

    #[test]
    fn registered_callback_receives_formatted_message() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        register_callback(Box::new(move |level, msg| {
            if level == LogLevel::LogInfo && msg.contains("hello") {
                seen2.fetch_add(1, Ordering::SeqCst);
            }
        }));
        log!(LogInfo, "hello {}", "world");
        assert!(seen.load(Ordering::SeqCst) >= 1);
    }
}
