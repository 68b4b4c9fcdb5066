//! Infrastructure - configuration, metrics, and task supervision
//!
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free metrics collection
//! - `supervisor` - Restart-on-panic wrapper for background loops

pub mod config;
pub mod metrics;
pub mod supervisor;

pub use config::{Config, TransportKind};
pub use metrics::Metrics;
pub use supervisor::{spawn_supervised, RestartPolicy, TaskExit};
