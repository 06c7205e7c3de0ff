//! TunnelPass Cryptography
//!
//! Signing identities (Ed25519) for issuers, nodes and clients, per-session
//! tunnel keys (X25519), and the hashing/signature primitives credentials
//! and gossip envelopes are built on.

mod keys;
mod sign;

pub use keys::*;
pub use sign::*;
