//! # SonicStream Common
//!
//! Ambient pieces shared by the SonicStream crates.
//!
//! ## Features
//!
//! - Logging setup on top of `tracing-subscriber`
//! - Host configuration (script URL, storage directory, network settings)

pub mod config;
pub mod logging;

pub use config::{ConfigError, HostConfig};
pub use logging::{init_logging, LogConfig, LogFormat, LOG_ENV_VAR};
