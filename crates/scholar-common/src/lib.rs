//! scholar-common — shared error taxonomy, configuration, and tracing setup
//! used by every crate in the workspace.

pub mod config;
pub mod error;
pub mod telemetry;

pub use config::GatewayConfig;
pub use error::{classify_upstream_error, GatewayError, Result};
