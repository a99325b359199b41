//! deskgate library
//!
//! Gateway for a role-gated support console: credential store, bearer-token
//! auth with per-request account re-checks, a realtime deauthorization
//! channel, and the client-side session machinery that notices revocation
//! before a structurally valid token expires.

pub mod accounts;
pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub(crate) mod crypto;
pub mod logging;
pub mod registry;
pub mod scoring;
pub mod server;
pub mod store;
pub mod token;
