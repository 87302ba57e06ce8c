//! Infrastructure - configuration and metrics
//!
//! This module contains infrastructure concerns:
//! - `clock` - wall-clock source (system or manual)
//! - `config` - engine configuration (TOML loading, defaults, env overrides)
//! - `metrics` - lock-free metrics collection

pub mod clock;
pub mod config;
pub mod metrics;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use metrics::Metrics;
