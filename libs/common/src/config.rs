//! Client configuration
//!
//! Settings come from an optional `connector.toml` next to the binary and
//! from `CONNECTOR_*` environment variables, the latter taking precedence.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ConfigError, ConfigResult};

/// Which frontend the client is acting as
///
/// Each variant talks to its own base path and keeps its persisted state
/// in its own storage namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrontendVariant {
    /// Admin console
    Admin,
    /// DingTalk docs connector
    Dingtalk,
    /// Feishu bitable connector
    Feishu,
}

impl FrontendVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrontendVariant::Admin => "admin",
            FrontendVariant::Dingtalk => "dingtalk",
            FrontendVariant::Feishu => "feishu",
        }
    }

    /// Path prefix prepended to every API route of this variant
    pub fn base_path(&self) -> &'static str {
        match self {
            FrontendVariant::Admin => "/admin/api",
            FrontendVariant::Dingtalk => "/dingtalk",
            FrontendVariant::Feishu => "/feishu",
        }
    }

    /// Storage key prefix for this variant's persisted session
    pub fn storage_namespace(&self) -> &'static str {
        match self {
            FrontendVariant::Admin => "admin_",
            FrontendVariant::Dingtalk => "dingtalk_user_",
            FrontendVariant::Feishu => "feishu_user_",
        }
    }

    /// Request timeout used when none is configured
    pub fn default_timeout_secs(&self) -> u64 {
        match self {
            FrontendVariant::Admin => 30,
            FrontendVariant::Dingtalk | FrontendVariant::Feishu => 10,
        }
    }
}

impl fmt::Display for FrontendVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrontendVariant {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(FrontendVariant::Admin),
            "dingtalk" => Ok(FrontendVariant::Dingtalk),
            "feishu" => Ok(FrontendVariant::Feishu),
            other => Err(ConfigError::Invalid {
                key: "variant".to_string(),
                message: format!("unknown frontend variant '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawClientConfig {
    api_base_url: String,
    variant: String,
    timeout_secs: Option<u64>,
    storage_path: String,
}

/// Resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend origin, e.g. "https://connector.example.com"
    pub api_base_url: String,
    /// Frontend variant the client acts as
    pub variant: FrontendVariant,
    /// Transport request timeout in seconds
    pub timeout_secs: u64,
    /// File used for durable client storage
    pub storage_path: PathBuf,
}

impl ClientConfig {
    /// Create a new ClientConfig from `connector.toml` (optional) and the environment
    ///
    /// # Environment Variables
    /// - `CONNECTOR_API_BASE_URL`: backend origin (default: "http://localhost:8080")
    /// - `CONNECTOR_VARIANT`: `admin`, `dingtalk` or `feishu` (default: "feishu")
    /// - `CONNECTOR_TIMEOUT_SECS`: request timeout (default: 30 for admin, 10 otherwise)
    /// - `CONNECTOR_STORAGE_PATH`: storage file (default: "connector-state.json")
    pub fn from_env() -> ConfigResult<Self> {
        Self::load(None)
    }

    /// Same as [`ClientConfig::from_env`] but reads a required file at `file` instead
    /// of the optional `connector.toml`
    pub fn load(file: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = Config::builder()
            .set_default("api_base_url", "http://localhost:8080")?
            .set_default("variant", "feishu")?
            .set_default("storage_path", "connector-state.json")?;

        builder = match file {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name("connector").required(false)),
        };

        let raw: RawClientConfig = builder
            .add_source(Environment::with_prefix("CONNECTOR"))
            .build()?
            .try_deserialize()?;

        let config = Self::from_raw(raw)?;
        info!(
            "Loaded client configuration for variant {} against {}",
            config.variant, config.api_base_url
        );
        Ok(config)
    }

    fn from_raw(raw: RawClientConfig) -> ConfigResult<Self> {
        let variant: FrontendVariant = raw.variant.parse()?;

        let api_base_url = raw.api_base_url.trim().trim_end_matches('/').to_string();
        if !(api_base_url.starts_with("http://") || api_base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                key: "api_base_url".to_string(),
                message: format!("'{}' is not an http(s) URL", api_base_url),
            });
        }

        let timeout_secs = raw
            .timeout_secs
            .unwrap_or_else(|| variant.default_timeout_secs());
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "timeout_secs".to_string(),
                message: "timeout must be at least one second".to_string(),
            });
        }

        Ok(Self {
            api_base_url,
            variant,
            timeout_secs,
            storage_path: PathBuf::from(raw.storage_path),
        })
    }

    /// Origin plus the variant's path prefix
    pub fn base_url(&self) -> String {
        format!("{}{}", self.api_base_url, self.variant.base_path())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
