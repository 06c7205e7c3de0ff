//! TunnelPass Core Types
//!
//! This crate defines the data model shared by every TunnelPass component:
//! node descriptors and health records used by discovery, subscription
//! credentials used by the authority and verifier, and the session
//! request/response exchanged between clients and nodes.

mod error;
mod session;
mod types;

pub use error::*;
pub use session::*;
pub use types::*;
