//! Client settings persistence.
//!
//! Settings are stored in a JSON file in the user's config directory:
//! - macOS: ~/Library/Application Support/wsheet/settings.json
//! - Linux: ~/.config/wsheet/settings.json
//! - Windows: C:\Users\<User>\AppData\Roaming\wsheet\settings.json

use crate::reconnect::ReconnectPolicy;
use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:8044";
pub const DEFAULT_WORKSHEET_ID: &str = "worksheet_0";
pub const DEFAULT_TITLE: &str = "Untitled Worksheet";

/// Settings for talking to the execution server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Server address, `host:port` or a full `ws://` URL
    #[serde(default = "default_endpoint", deserialize_with = "deserialize_endpoint")]
    pub endpoint: String,

    /// Worksheet opened when none is named on the command line
    #[serde(default = "default_worksheet_id")]
    pub worksheet_id: String,

    /// Title given to new worksheets
    #[serde(default = "default_title")]
    pub title: String,

    /// Autosave period in milliseconds, 0 disables autosave
    #[serde(default = "default_autosave_interval_ms")]
    pub autosave_interval_ms: u64,

    /// Reconnect backoff
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_worksheet_id() -> String {
    DEFAULT_WORKSHEET_ID.to_string()
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

fn default_autosave_interval_ms() -> u64 {
    2000
}

/// Deserialize an endpoint that accepts both:
/// - `"127.0.0.1:8044"` (address string)
/// - `{"host": "127.0.0.1", "port": 8044}` (object)
fn deserialize_endpoint<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Endpoint {
        Address(String),
        HostPort { host: String, port: u16 },
    }

    Ok(match Endpoint::deserialize(deserializer)? {
        Endpoint::Address(address) => address,
        Endpoint::HostPort { host, port } => format!("{}:{}", host, port),
    })
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            worksheet_id: default_worksheet_id(),
            title: default_title(),
            autosave_interval_ms: default_autosave_interval_ms(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Get the path to the settings file
pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wsheet")
        .join("settings.json")
}

/// Load settings from disk, returning defaults if file doesn't exist
pub fn load_settings() -> ClientSettings {
    load_settings_from(&settings_path())
}

pub fn load_settings_from(path: &Path) -> ClientSettings {
    if path.exists() {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    } else {
        ClientSettings::default()
    }
}

/// Save settings to `path`, normally [`settings_path`].
pub fn save_settings_to(settings: &ClientSettings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}
