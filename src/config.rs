//! Configuration types for the avachat engine.

use crate::error::{EngineError, Result};
use crate::handler::Capability;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level configuration document.
///
/// Unknown top-level keys are ignored; missing sections take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Log level filter for the `tracing` subscriber (e.g. "info", "debug").
    pub log_level: String,
    /// Network service binding (consumed by the transport layer).
    pub service: ServiceConfig,
    /// The chat-engine section: handler specs and pipeline wiring.
    pub chat_engine: ChatEngineConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            service: ServiceConfig::default(),
            chat_engine: ChatEngineConfig::default(),
        }
    }
}

/// Network service binding and real-time-transport relay settings.
///
/// The engine itself opens no sockets; these fields are validated here and
/// handed to whichever transport implementation fronts the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listen address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// TLS certificate path (None = plain).
    pub cert_file: Option<PathBuf>,
    /// TLS private key path.
    pub key_file: Option<PathBuf>,
    /// Real-time-transport relay settings.
    pub rtc: RtcConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8282,
            cert_file: None,
            key_file: None,
            rtc: RtcConfig::default(),
        }
    }
}

/// STUN/TURN relay settings for the real-time transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RtcConfig {
    /// STUN server URLs tried in order.
    pub stun_servers: Vec<String>,
    /// TURN relay URL (None = direct only).
    pub turn_server: Option<String>,
    /// TURN username.
    pub turn_username: Option<String>,
    /// TURN credential.
    pub turn_credential: Option<String>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_owned()],
            turn_server: None,
            turn_username: None,
            turn_credential: None,
        }
    }
}

/// The chat-engine section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatEngineConfig {
    /// Root directory for model/resource files, passed through to handlers.
    pub model_root: PathBuf,
    /// Ordered namespace prefixes tried when resolving a spec's `module`
    /// locator against the factory manifest.
    pub handler_search_path: Vec<String>,
    /// Ordered handler names forming the per-session pipeline chain.
    pub pipeline: Vec<String>,
    /// How long a session waits for a handler lease before being rejected
    /// as overloaded.
    pub lease_timeout_ms: u64,
    /// Per-stage channel capacity between adjacent pipeline stages.
    pub stage_channel_size: usize,
    /// Handler specs, keyed by handler name.
    pub handler_configs: BTreeMap<String, HandlerSpec>,
}

impl Default for ChatEngineConfig {
    fn default() -> Self {
        Self {
            model_root: PathBuf::from("models"),
            handler_search_path: vec!["builtin".to_owned()],
            pipeline: Vec::new(),
            lease_timeout_ms: 5_000,
            stage_channel_size: 16,
            handler_configs: BTreeMap::new(),
        }
    }
}

impl ChatEngineConfig {
    /// Lease acquisition timeout as a [`std::time::Duration`].
    pub fn lease_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.lease_timeout_ms)
    }
}

/// One handler configuration entry. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerSpec {
    /// Module locator resolved against the manifest via the search path.
    pub module: String,
    /// Declared capability tag; must match the instantiated handler's.
    pub capability: Capability,
    /// Maximum concurrent sessions holding a lease (None = unbounded).
    #[serde(default)]
    pub concurrency_limit: Option<u32>,
    /// Disabled specs are parsed but never instantiated.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Handler-specific parameters, validated by the factory at load time.
    #[serde(default)]
    pub params: toml::Table,
}

fn default_enabled() -> bool {
    true
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not parse.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration to a TOML file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default config file path: `~/.config/avachat/config.toml`.
    pub fn default_path() -> PathBuf {
        if let Ok(config) = std::env::var("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("avachat").join("config.toml")
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("avachat")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/avachat-config/config.toml")
        }
    }

    /// Structural validation that needs no manifest: field ranges and
    /// obviously broken wiring. Locator resolution and parameter shapes are
    /// checked later by `Registry::load`.
    ///
    /// # Errors
    ///
    /// Returns the first [`EngineError`] found; all are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        for (name, spec) in &self.chat_engine.handler_configs {
            if name.trim().is_empty() {
                return Err(EngineError::Config("handler name is empty".to_owned()));
            }
            if spec.module.trim().is_empty() {
                return Err(EngineError::InvalidParameter {
                    handler: name.clone(),
                    reason: "module locator is empty".to_owned(),
                });
            }
            if spec.concurrency_limit == Some(0) {
                return Err(EngineError::InvalidParameter {
                    handler: name.clone(),
                    reason: "concurrency_limit must be positive (omit for unbounded)".to_owned(),
                });
            }
        }
        for name in &self.chat_engine.pipeline {
            if !self.chat_engine.handler_configs.contains_key(name) {
                return Err(EngineError::Config(format!(
                    "pipeline references unknown handler \"{name}\""
                )));
            }
        }
        if self.chat_engine.lease_timeout_ms == 0 {
            return Err(EngineError::Config(
                "lease_timeout_ms must be positive".to_owned(),
            ));
        }
        if self.chat_engine.stage_channel_size == 0 {
            return Err(EngineError::Config(
                "stage_channel_size must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}
