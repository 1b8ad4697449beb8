//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (SWITCHYARD_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use switchyard_core::BrokerConfig;
use switchyard_transport::WebSocketConfig;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Broker configuration.
    #[serde(default)]
    pub broker: BrokerSection,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportSection,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsSection,

    /// Addresses to serve, each with the endpoints relayed on it.
    #[serde(default = "default_addresses")]
    pub addresses: Vec<AddressSection>,
}

/// Broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSection {
    /// Capacity of every broker channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSection {
    /// Path prefix for WebSocket endpoints.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSection {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// One served address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSection {
    /// Address to bind, as `host:port`.
    #[serde(default = "default_address")]
    pub name: String,

    /// Endpoints relayed on this address.
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,
}

// Default value functions
fn default_address() -> String {
    std::env::var("SWITCHYARD_ADDRESS").unwrap_or_else(|_| "127.0.0.1:8080".to_string())
}

fn default_endpoints() -> Vec<String> {
    vec!["relay".to_string()]
}

fn default_addresses() -> Vec<AddressSection> {
    vec![AddressSection {
        name: default_address(),
        endpoints: default_endpoints(),
    }]
}

fn default_channel_capacity() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerSection::default(),
            transport: TransportSection::default(),
            metrics: MetricsSection::default(),
            addresses: default_addresses(),
        }
    }
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "switchyard.toml",
            "/etc/switchyard/switchyard.toml",
            "~/.config/switchyard/switchyard.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration.
    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Broker settings.
    #[must_use]
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            channel_capacity: self.broker.channel_capacity,
        }
    }

    /// WebSocket listener settings.
    #[must_use]
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            websocket_path: self.transport.websocket_path.clone(),
            max_message_size: self.transport.max_message_size,
        }
    }
}
