use std::path::{Path, PathBuf};

use serde_json::error::Category;
use thiserror::Error;

use crate::config::models::RouteTable;

/// File name of the route table inside the configuration folder.
pub const GATEWAY_CONFIG_FILE: &str = "gateway-config.json";

/// Errors raised while loading the route table. All of them are fatal at
/// startup.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// The backing file could not be read.
    #[error("failed to read gateway config {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not syntactically valid JSON.
    #[error("gateway config {} is malformed: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Valid JSON that does not decode into a route table.
    #[error("gateway config {} has an unexpected shape: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// True for load failures (unreadable or malformed resource), false for
    /// decode failures.
    pub fn is_load_error(&self) -> bool {
        matches!(self, Self::Unreadable { .. } | Self::Malformed { .. })
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Unreadable { path, .. } | Self::Malformed { path, .. } | Self::Parse { path, .. } => {
                path
            }
        }
    }
}

/// Path of the route table inside `folder`.
pub fn gateway_config_path(folder: impl AsRef<Path>) -> PathBuf {
    folder.as_ref().join(GATEWAY_CONFIG_FILE)
}

/// Decode a route table from JSON text. `path` is only used for error context.
pub fn parse_route_table(content: &str, path: &Path) -> Result<RouteTable, ConfigError> {
    serde_json::from_str(content).map_err(|source| match source.classify() {
        Category::Data => ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        },
        Category::Io | Category::Syntax | Category::Eof => ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        },
    })
}

/// Read and decode `<folder>/gateway-config.json`.
pub async fn load_route_table(folder: impl AsRef<Path>) -> Result<RouteTable, ConfigError> {
    let path = gateway_config_path(folder);
    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| ConfigError::Unreadable {
            path: path.clone(),
            source,
        })?;

    let table = parse_route_table(&content, &path)?;
    tracing::debug!(
        "Loaded {} route(s) from {}",
        table.len(),
        path.display()
    );
    Ok(table)
}
