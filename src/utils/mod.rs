//! Shared helpers: logging setup and id generation

pub mod id;
pub mod logger;

pub use logger::{init_logger, LogLevel};
