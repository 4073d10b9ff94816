//! CMEI service configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CmeiError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CmeiConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub fila: FilaConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
}

impl CmeiConfig {
    /// Load config from the default path (~/.cmei/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CmeiError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CmeiError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CmeiError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlay secrets and endpoints taken from the environment.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("WHATSAPP_API_URL") {
            self.whatsapp.api_url = url;
        }
        if let Ok(token) = std::env::var("WHATSAPP_API_TOKEN") {
            self.whatsapp.api_token = token;
        }
        if let Ok(url) = std::env::var("CMEI_WEBHOOK_URL") {
            self.notify.webhook_url = Some(url);
        }
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the service home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cmei")
    }
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 { 3000 }
fn default_host() -> String { "127.0.0.1".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// SQLite store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.cmei/fila.db".into() }

impl DatabaseConfig {
    /// Database path with `~` expanded.
    pub fn expanded_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Waitlist rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilaConfig {
    /// Days a summoned family has to answer a convocation.
    #[serde(default = "default_prazo")]
    pub prazo_convocacao_dias: u32,
}

fn default_prazo() -> u32 { 7 }

impl Default for FilaConfig {
    fn default() -> Self {
        Self { prazo_convocacao_dias: default_prazo() }
    }
}

/// Outbound notification webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Fallback when no webhook URL is stored in the settings table.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 { 10 }

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// Third-party WhatsApp messaging gateway.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub api_token: String,
}

impl WhatsAppConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_url.is_empty() && !self.api_token.is_empty()
    }
}
