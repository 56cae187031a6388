//! Bridge from the `log` facade to a host-provided logger.
//!
//! Library code only ever uses `log::{debug, info, warn, error}`. Hosts that render the flow
//! (a browser shell, a mobile app) install a [`Logger`] once to receive those records; the CLI
//! instead routes `log` into `tracing` and never calls [`set_logger`].

use std::sync::{Arc, OnceLock};

/// Receiver of log messages emitted by `humankit`.
///
/// # Examples
///
/// ```rust
/// use humankit_core::logger::{LogLevel, Logger};
///
/// struct StderrLogger;
///
/// impl Logger for StderrLogger {
///     fn log(&self, level: LogLevel, message: String) {
///         eprintln!("[{level:?}] {message}");
///     }
/// }
/// ```
#[cfg_attr(feature = "ffi", uniffi::export(with_foreign))]
pub trait Logger: Sync + Send {
    /// Logs a message at the specified log level.
    fn log(&self, level: LogLevel, message: String);
}

/// Severity of a forwarded log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum LogLevel {
    /// Very detailed tracing, e.g. every poll attempt.
    Trace,
    /// Debugging information such as RPC method names.
    Debug,
    /// Progress of the flow: step transitions, submitted transactions.
    Info,
    /// Recoverable problems, including already-proved warnings.
    Warn,
    /// Errors reported to the error sink.
    Error,
}

struct ForeignLogger;

impl log::Log for ForeignLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        let is_ours = metadata.target().starts_with("humankit");
        // Dependencies (reqwest, hyper) are only forwarded from Info upwards.
        is_ours || metadata.level() <= log::Level::Info
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        if let Some(logger) = LOGGER_INSTANCE.get() {
            logger.log(log_level(record.level()), format!("{}", record.args()));
        } else {
            eprintln!("Logger not set: {}", record.args());
        }
    }

    fn flush(&self) {}
}

const fn log_level(level: log::Level) -> LogLevel {
    match level {
        log::Level::Error => LogLevel::Error,
        log::Level::Warn => LogLevel::Warn,
        log::Level::Info => LogLevel::Info,
        log::Level::Debug => LogLevel::Debug,
        log::Level::Trace => LogLevel::Trace,
    }
}

const fn level_filter(level: LogLevel) -> log::LevelFilter {
    match level {
        LogLevel::Trace => log::LevelFilter::Trace,
        LogLevel::Debug => log::LevelFilter::Debug,
        LogLevel::Info => log::LevelFilter::Info,
        LogLevel::Warn => log::LevelFilter::Warn,
        LogLevel::Error => log::LevelFilter::Error,
    }
}

static LOGGER_INSTANCE: OnceLock<Arc<dyn Logger>> = OnceLock::new();

/// Installs the host logger and sets the most verbose level that gets forwarded.
///
/// Only the first call has an effect; later calls keep the original logger but still adjust
/// the level.
#[cfg_attr(feature = "ffi", uniffi::export)]
pub fn set_logger(logger: Arc<dyn Logger>, max_level: LogLevel) {
    if LOGGER_INSTANCE.set(logger).is_err() {
        eprintln!("Logger already set");
    }

    static LOGGER: ForeignLogger = ForeignLogger;
    // Fails when another `log` implementation is already installed, which is fine.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level_filter(max_level));
}
