//! TunnelPass Keystore
//!
//! Signing identity management and path utilities shared by issuers, nodes
//! and clients.
//!
//! ## Features
//!
//! - Ed25519 signing keypair loading/generation (hex secret on disk)
//! - Path expansion (`~`)
//! - Default config directory (`~/.tunnelpass`)

mod keypair;
mod paths;

pub use keypair::{load_or_generate_signing_keypair, save_signing_keypair, KeystoreError};
pub use paths::{default_config_dir, default_credentials_path, default_key_path, expand_path};

pub type Result<T> = std::result::Result<T, KeystoreError>;
