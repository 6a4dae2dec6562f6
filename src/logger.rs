/// Log levels for session and reactor events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Logger trait for session and reactor events
///
/// Library users can implement this trait to handle logging however they prefer.
/// The default configuration uses [`LogFacade`], which forwards to the `log` crate.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// Forwards every message to the `log` facade under the `mill_nio` target.
#[derive(Debug, Default, Clone)]
pub struct LogFacade;

impl Logger for LogFacade {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => log::debug!(target: "mill_nio", "{}", message),
            LogLevel::Info => log::info!(target: "mill_nio", "{}", message),
            LogLevel::Warn => log::warn!(target: "mill_nio", "{}", message),
            LogLevel::Error => log::error!(target: "mill_nio", "{}", message),
        }
    }
}

/// Default no-op logger that discards all messages
#[derive(Debug, Default, Clone)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn log(&self, _level: LogLevel, _message: &str) {}
}
