use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{
    config::{ConfigError, loader, models::RouteTable},
    ports::config_provider::ConfigProvider,
};

/// Configuration provider that reads `gateway-config.json` from a folder.
///
/// The file is read once per `load_config` call and never watched.
#[derive(Debug, Clone)]
pub struct FileConfigProvider {
    folder: PathBuf,
}

impl FileConfigProvider {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Full path of the route table file.
    pub fn config_path(&self) -> PathBuf {
        loader::gateway_config_path(&self.folder)
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn load_config(&self) -> Result<RouteTable, ConfigError> {
        loader::load_route_table(&self.folder).await
    }

    fn describe(&self) -> String {
        self.config_path().display().to_string()
    }
}
