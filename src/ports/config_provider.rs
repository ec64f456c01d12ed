use async_trait::async_trait;

use crate::config::{ConfigError, models::RouteTable};

/// Source of the route table. Read once at startup; the returned table is
/// never reloaded.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Load the route table. Cross-entry references are not validated here.
    async fn load_config(&self) -> Result<RouteTable, ConfigError>;

    /// Human readable description of where the table comes from.
    fn describe(&self) -> String;
}
