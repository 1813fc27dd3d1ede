//! Library surface of the davshare daemon.
//!
//! The binary in `main.rs` is a thin CLI wrapper; everything it does is
//! reachable from here so integration tests can start a real server on
//! an ephemeral port.

pub mod auth;
pub mod listing;
pub mod server;

pub use auth::BasicAuth;
pub use server::{Server, ServerConfig};
