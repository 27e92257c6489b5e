//! Structured logging utilities for shade components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use shade_config::{log_farm_info, log_sync_warn};
//! use tracing::field::display;
//!
//! log_farm_info!("Farm created", entries = 42);
//! log_sync_warn!("Copy failed", path = display(rel.display()));
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const FARM: &'static str = "FARM";
    pub const PLAN: &'static str = "PLAN";
    pub const SYNC: &'static str = "SYNC";
    pub const SWEEP: &'static str = "SWEEP";
    pub const CLI: &'static str = "CLI";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Map a `-v` count to a level: none = warn, one = debug, more = trace
    pub fn from_verbosity(verbose: u8) -> Self {
        match verbose {
            0 => LogLevel::Warn,
            1 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// === FARM logging macros ===

#[macro_export]
macro_rules! log_farm_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::FARM, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_farm_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::FARM, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_farm_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::FARM, $($key = $value,)* $msg)
    };
}

// === PLAN logging macros ===

#[macro_export]
macro_rules! log_plan_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::PLAN, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_plan_trace {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::trace!(component = $crate::logging::Component::PLAN, $($key = $value,)* $msg)
    };
}

// === SYNC logging macros ===

#[macro_export]
macro_rules! log_sync_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::SYNC, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_sync_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::SYNC, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_sync_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::SYNC, $($key = $value,)* $msg)
    };
}

// === SWEEP logging macros ===

#[macro_export]
macro_rules! log_sweep_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::SWEEP, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_sweep_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::SWEEP, $($key = $value,)* $msg)
    };
}

// === CLI logging macros ===

#[macro_export]
macro_rules! log_cli_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::CLI, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cli_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::CLI, $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup.
///
/// `SHADE_LOG` takes precedence over `RUST_LOG`; both override `level`.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_env("SHADE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
