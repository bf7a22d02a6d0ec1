#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # MotionMount
//!
//! A Rust library for controlling Vogel's MotionMount motorized TV mounts via
//! Bluetooth Low Energy.
//!
//! The mount exposes a single GATT service with two-byte position registers
//! (extend and turn), a 4-byte move command register and a range of preset
//! slots. This crate wraps that service in a small set of components:
//!
//! - [`codec`]: payload encoding for positions, moves and preset slots
//! - [`session::Session`]: discovery, connect, characteristic resolution and
//!   link-loss tracking over a [`transport::BleTransport`]
//! - [`catalog::PresetCatalog`]: loading, searching and selecting presets
//! - [`controller::PositionController`]: position reads (one at a time) and
//!   move writes with a deferred disconnect
//! - [`poller::PollScheduler`]: periodic position refresh
//! - [`device::MotionMount`]: bring-up with retry, availability reporting
//!   and command dispatch
//!
//! ## Connection model
//!
//! The mount accepts a single connection at a time, so the driver connects
//! on demand and releases the link after each operation. Reads disconnect
//! immediately; moves disconnect after a short delay so the motor can finish
//! and closely spaced follow-up commands can reuse the link.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use motionmount::{ble::BtleplugTransport, MotionMount, MountCommand, Settings};
//! use motionmount::store::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(BtleplugTransport::new().await?);
//!     let pairable = MotionMount::list_pairable(transport.as_ref()).await?;
//!     let Some(target) = pairable.into_iter().next() else {
//!         return Ok(());
//!     };
//!
//!     let (mount, _events) = MotionMount::new(
//!         transport,
//!         target.id,
//!         Settings::default(),
//!         Arc::new(MemoryStore::default()),
//!     );
//!     mount.bring_up().await?;
//!     mount.handle(MountCommand::GotoPosition { extend: 40, turn: -20 }).await;
//!     Ok(())
//! }
//! ```

use uuid::Uuid;

/// btleplug-backed transport
pub mod ble;
/// Preset loading, search and selection
pub mod catalog;
/// Payload encoding and decoding
pub mod codec;
/// Position reads and move writes
pub mod controller;
/// Device lifecycle and command dispatch
pub mod device;
/// Error types and handling
pub mod error;
/// Periodic position refresh
pub mod poller;
/// Connection state machine
pub mod session;
/// Persistence of the last selected preset
pub mod store;
/// Transport traits
pub mod transport;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use device::MotionMount;
pub use error::{MountError, Result};
pub use types::{
    Advertisement, Axis, Capability, CharacteristicHandle, CharacteristicRole, MountCommand,
    MountEvent, PairableDevice, Position, PositionState, Preset, PresetEntry, PresetOption,
    SessionState, Settings, TimingConfig, DEFERRED_DISCONNECT_DELAY, RECONNECT_BACKOFF,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Local name advertised by every MotionMount
pub const MOTIONMOUNT_LOCAL_NAME: &str = "Vogel's MotionMount";

/// MotionMount GATT service UUID
pub const MOTIONMOUNT_SERVICE_UUID: Uuid = Uuid::from_u128(0x3e6fe65d_ed78_11e4_895e_00026fd5c52c);

/// Current extend register, 2 bytes big-endian
pub const MOTIONMOUNT_EXTEND_CHAR_UUID: Uuid =
    Uuid::from_u128(0xc005fa00_0651_4800_b000_000000000000);

/// Current turn register, 2 bytes big-endian
pub const MOTIONMOUNT_TURN_CHAR_UUID: Uuid =
    Uuid::from_u128(0xc005fa01_0651_4800_b000_000000000000);

/// Move command register, 4 bytes (extend hi/lo, turn hi/lo)
pub const MOTIONMOUNT_MOVE_CHAR_UUID: Uuid =
    Uuid::from_u128(0xc005fa21_0651_4800_b000_000000000000);
