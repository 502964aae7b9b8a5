pub mod config;
pub mod error;

pub use config::{GatewayConfig, GatewayConfigPatch};
pub use error::GatewayError;
