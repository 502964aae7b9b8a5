pub mod auth;
pub mod engine;
pub mod keys;
pub mod models;
pub mod state;
pub mod tokens;
pub mod upstream;

pub use state::GatewayState;
