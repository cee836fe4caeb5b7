//! Host-testable core of blesync.
//!
//! Two nodes running this firmware find each other over BLE, agree on a
//! MASTER/CLIENT role, and keep a shared counter that ticks every
//! `COUNTER_INTERVAL_MS` in phase on both sides.
//!
//! Everything protocol-related lives here behind the [`ble::radio::Radio`]
//! seam, so it runs unchanged under `cargo test` on the host.  The embedded
//! binary (`src/main.rs`, feature `embedded`) supplies the SoftDevice-backed
//! radio, the uptime clock and the executor.
//!
//! Usage: `cargo test` (add `--features log` to route logging through `log`).

#![cfg_attr(not(test), no_std)]

// Must come first so the logging macros are visible to every module below.
#[macro_use]
mod fmt;

pub mod ble;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod role;
pub mod status;
pub mod supervisor;
pub mod sync;

pub use ble::radio::{Radio, Session};
pub use ble::{Address, Advertisement, Characteristic};
pub use clock::{RandomSource, Uptime, XorShift32};
pub use error::{BleError, Error};
pub use event::Events;
pub use identity::NodeIdentity;
pub use role::Role;
pub use status::{Status, StatusBoard};
pub use supervisor::{Cause, State, SupervisorContext, Transition};
pub use sync::{SyncEngine, SyncPacket};

// ═══════════════════════════════════════════════════════════════════════════
// Cross-module tests
// ═══════════════════════════════════════════════════════════════════════════
