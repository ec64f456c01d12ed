pub mod loader;
pub mod models;
pub mod settings;

pub use loader::{ConfigError, GATEWAY_CONFIG_FILE, load_route_table};
pub use models::*;
pub use settings::{GatewaySettings, LogFormat};
