//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - JSON or pretty console output
//! - Rolling JSON log files through tracing-appender

pub mod config;
pub mod logger;

pub use config::{ConsoleTarget, LogConfig, LogFormat, RotationPolicy};
pub use logger::LoggerImpl;
