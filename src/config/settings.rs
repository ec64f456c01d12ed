//! Process-level settings: where to listen, where the route table lives and
//! how to log. Sources in increasing precedence: defaults, an optional
//! settings file, `GATEWAY_*` environment variables.
use std::{path::Path, time::Duration};

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Output format for structured logs.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewaySettings {
    pub listen_addr: String,
    /// Folder holding `gateway-config.json`.
    pub config_folder_path: String,
    #[serde(default)]
    pub log_format: LogFormat,
    pub log_level: String,
    /// Bound on the identity validation call. Unset or 0 means no timeout.
    #[serde(default)]
    pub identity_timeout_ms: Option<u64>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            config_folder_path: "./config".to_string(),
            log_format: LogFormat::Json,
            log_level: "info".to_string(),
            identity_timeout_ms: None,
        }
    }
}

impl GatewaySettings {
    /// Load settings from defaults, `settings_file` (if any) and the
    /// environment.
    pub fn load(settings_file: Option<&str>) -> Result<Self> {
        Self::load_with_env(settings_file, Environment::with_prefix("GATEWAY").try_parsing(true))
    }

    fn load_with_env(settings_file: Option<&str>, env: Environment) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("listen_addr", defaults.listen_addr)?
            .set_default("config_folder_path", defaults.config_folder_path)?
            .set_default("log_format", "json")?
            .set_default("log_level", defaults.log_level)?;

        if let Some(path) = settings_file {
            builder = builder.add_source(File::new(path, Self::file_format(path)).required(true));
        }

        let settings = builder
            .add_source(env)
            .build()
            .with_context(|| format!("Failed to build settings from {settings_file:?}"))?;

        settings
            .try_deserialize()
            .wrap_err("Failed to deserialize gateway settings")
    }

    fn file_format(path: &str) -> FileFormat {
        match Path::new(path).extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => FileFormat::Toml,
        }
    }

    pub fn identity_timeout(&self) -> Option<Duration> {
        self.identity_timeout_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }
}
