//! Logging setup
//!
//! The orchestrator logs at the chosen level. Dependencies stay at `warn`,
//! except at trace level where the kube and HTTP stacks go to `debug`.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Library and binary share this target
const OWN_TARGET: &str = "test_orchestrator";
const QUIET_TARGETS: [&str; 4] = ["kube", "hyper", "reqwest", "rustls"];

/// Log level configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    /// `EnvFilter` directives for this level
    pub fn directives(self) -> String {
        let level = self.level().to_string().to_lowercase();
        let mut directives = vec!["warn".to_string(), format!("{OWN_TARGET}={level}")];
        if self == LogLevel::Trace {
            directives.extend(QUIET_TARGETS.iter().map(|t| format!("{t}=debug")));
        }
        directives.join(",")
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `level` when set.
pub fn init_logger(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directives()));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
    if installed.is_err() {
        tracing::debug!("Logger already installed");
    }
}
