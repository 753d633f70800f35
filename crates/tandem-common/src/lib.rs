//! Tandem Common Library
//!
//! Configuration model and error types shared by the tandem services.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{normalize_address, GatewayConfig, DEFAULT_CONFIG_PATH, DEFAULT_PROXY_PORT};
pub use error::{Result, TandemError};
