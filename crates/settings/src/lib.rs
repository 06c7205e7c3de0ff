//! TunnelPass Settings
//!
//! Configuration for issuers, nodes and clients.
//!
//! ## Sections
//!
//! - Discovery (relay endpoints, pool scope, probe interval)
//! - Node (listen address, issuer allow-list, address pool, WireGuard)
//! - Client (issuer, backend, region, credential file)
//!
//! Settings are a JSON document; [`Settings::apply_env`] overlays
//! `TUNNELPASS_*` environment variables on top.
//!
//! ## Usage
//!
//! ```no_run
//! use tunnelpass_settings::Settings;
//!
//! let mut settings = Settings::load_or_default()?;
//! settings.apply_env();
//! settings.node.allowed_issuers.push("ab".repeat(32));
//! settings.save()?;
//! # Ok::<(), tunnelpass_settings::SettingsError>(())
//! ```

mod config;

pub use config::{ClientSettings, DiscoverySettings, NodeSettings, Settings};

use std::path::PathBuf;

use thiserror::Error;
use tunnelpass_keystore::default_config_dir;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),

    #[error("Failed to create config directory: {0}")]
    CreateDirError(std::io::Error),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Get the default settings file path
pub fn default_settings_path() -> PathBuf {
    default_config_dir().join("settings.json")
}
