//! Bridge from the `log` facade to a logger supplied by the host app.

use std::sync::{Arc, OnceLock};

/// Receives the SDK's log records.
///
/// Implemented by the host app (Swift, Kotlin, or Rust) and installed once with
/// [`set_logger`].
///
/// # Examples
///
/// ```rust
/// use marketkit_core::logger::{LogLevel, Logger};
///
/// struct StdoutLogger;
///
/// impl Logger for StdoutLogger {
///     fn log(&self, level: LogLevel, message: String) {
///         println!("[{level:?}] {message}");
///     }
/// }
/// ```
///
/// ## Swift
///
/// ```swift
/// final class MarketKitLogger: MarketKit.Logger {
///     func log(level: MarketKit.LogLevel, message: String) {
///         os_log("%{public}@", message)
///     }
/// }
///
/// MarketKit.setLogger(logger: MarketKitLogger()) // once, at startup
/// ```
#[uniffi::export(with_foreign)]
pub trait Logger: Sync + Send {
    /// Handles one record.
    fn log(&self, level: LogLevel, message: String);
}

/// Severity of a forwarded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum LogLevel {
    /// Very detailed tracing.
    Trace,
    /// Debugging information.
    Debug,
    /// Progress of the session and the realtime channel.
    Info,
    /// Something went wrong but the SDK carries on.
    Warn,
    /// An operation failed.
    Error,
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Self::Error,
            log::Level::Warn => Self::Warn,
            log::Level::Info => Self::Info,
            log::Level::Debug => Self::Debug,
            log::Level::Trace => Self::Trace,
        }
    }
}

static LOGGER_INSTANCE: OnceLock<Arc<dyn Logger>> = OnceLock::new();

struct ForeignLogger;

/// Debug and trace records are only forwarded from this crate; the HTTP and
/// WebSocket stacks are too chatty at those levels.
fn forwards(level: log::Level, module_path: Option<&str>) -> bool {
    let from_marketkit = module_path.is_some_and(|path| path.starts_with("marketkit"));
    from_marketkit || level <= log::Level::Info
}

impl log::Log for ForeignLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        forwards(metadata.level(), Some(metadata.target()))
    }

    fn log(&self, record: &log::Record) {
        if !forwards(record.level(), record.module_path()) {
            return;
        }
        if let Some(logger) = LOGGER_INSTANCE.get() {
            logger.log(record.level().into(), record.args().to_string());
        } else {
            eprintln!("Logger not set: {}", record.args());
        }
    }

    fn flush(&self) {}
}

/// Installs the host logger and routes the `log` facade to it.
///
/// Only the first call has an effect.
#[uniffi::export]
pub fn set_logger(logger: Arc<dyn Logger>) {
    if LOGGER_INSTANCE.set(logger).is_err() {
        eprintln!("Logger already set");
        return;
    }

    static LOGGER: ForeignLogger = ForeignLogger;
    if let Err(e) = log::set_logger(&LOGGER) {
        eprintln!("Failed to set logger: {e}");
        return;
    }
    log::set_max_level(log::LevelFilter::Trace);
}
