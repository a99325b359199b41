//! Client-side session machinery.
//!
//! The console frontend holds a bearer token that stays structurally valid
//! for 24 hours no matter what happens to the account behind it. Everything
//! in this module exists to notice out-of-band revocation anyway:
//!
//! - [`api`]: thin typed HTTP client over the gateway REST surface.
//! - [`session`]: the session state machine with idempotent termination.
//! - [`watchdog`]: cancellable polling loops probing authoritative account
//!   status.
//! - [`ws`]: realtime listener for addressed deauthorization events.
//! - [`tabsync`]: marker-file pub/sub propagating logout between sibling
//!   sessions on the same machine.

pub mod api;
pub mod session;
pub mod tabsync;
pub mod watchdog;
pub mod ws;

pub use api::{ApiClient, ApiError, StatusProbe};
pub use session::{Session, SessionEnd, SessionPhase};
