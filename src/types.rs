use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use uuid::Uuid;

use crate::codec;

/// Delay before retrying a failed bring-up
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(30);

/// Delay between a move write and the disconnect that frees the link
pub const DEFERRED_DISCONNECT_DELAY: Duration = Duration::from_secs(5);

/// Movement axis of the mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    /// Distance from the wall, 0 (retracted) to 100 (fully extended)
    Extend,
    /// Rotation, -100 (left) to 100 (right)
    Turn,
}

impl Axis {
    /// Smallest accepted value
    #[must_use]
    pub const fn min(self) -> i32 {
        match self {
            Self::Extend => 0,
            Self::Turn => -100,
        }
    }

    /// Largest accepted value
    #[must_use]
    pub const fn max(self) -> i32 {
        100
    }

    /// Check whether `value` is accepted on this axis
    #[must_use]
    pub const fn contains(self, value: i32) -> bool {
        value >= self.min() && value <= self.max()
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extend => write!(f, "extend"),
            Self::Turn => write!(f, "turn"),
        }
    }
}

/// Logical role of a characteristic on the MotionMount service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CharacteristicRole {
    /// Current extend register
    ExtendPosition,
    /// Current turn register
    TurnPosition,
    /// 4-byte move command register
    Move,
    /// Stored preset slot, identified by its role byte
    PresetSlot(u8),
}

impl fmt::Display for CharacteristicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExtendPosition => write!(f, "extend position"),
            Self::TurnPosition => write!(f, "turn position"),
            Self::Move => write!(f, "move"),
            Self::PresetSlot(slot) => write!(f, "preset slot {slot:#04x}"),
        }
    }
}

/// A characteristic as enumerated on one connection
///
/// `handle` is only meaningful for the connection that produced it and must
/// not be used after a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    /// Characteristic UUID
    pub uuid: Uuid,
    /// UUID of the owning service
    pub service_uuid: Uuid,
    /// Transport-assigned attribute handle
    pub handle: u16,
}

/// A discovered advertisement identifying one physical accessory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Advertised identifier, stable across scans
    pub identifier: String,
    /// Advertised local name
    pub local_name: Option<String>,
}

impl Advertisement {
    /// Create a new advertisement record
    #[must_use]
    pub fn new(identifier: impl Into<String>, local_name: Option<String>) -> Self {
        Self {
            identifier: identifier.into(),
            local_name,
        }
    }
}

/// Connection state of a [`Session`](crate::session::Session)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No advertisement resolved yet
    Idle,
    /// Advertisement resolved, never connected
    Discovered,
    /// Link up and characteristics resolved
    Connected,
    /// Link lost or closed, advertisement retained
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Discovered => write!(f, "Discovered"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Decoded position of the mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Extend, 0..=100
    pub extend: i32,
    /// Turn, -100..=100
    pub turn: i32,
}

impl Position {
    /// Create a new position
    #[must_use]
    pub const fn new(extend: i32, turn: i32) -> Self {
        Self { extend, turn }
    }
}

/// Raw position registers as last read from, or last requested of, the mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionState {
    /// Extend register, big-endian
    pub extend: [u8; 2],
    /// Turn register, big-endian
    pub turn: [u8; 2],
}

impl PositionState {
    /// Decode both registers
    #[must_use]
    pub fn position(&self) -> Position {
        Position {
            extend: codec::decode_extend(self.extend),
            turn: codec::decode_turn(self.turn),
        }
    }
}

/// A stored position read from a preset slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    /// Display name
    pub name: String,
    /// Move command replayed when the preset is selected
    pub move_buffer: [u8; 4],
    /// Characteristic the preset was read from
    pub source: Uuid,
    /// Role byte of the slot
    pub slot: u8,
}

/// Name/index pair exposed for preset search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetEntry {
    /// Catalog index as a string
    pub id: String,
    /// Preset name
    pub name: String,
}

/// One entry of the preset picker shown by the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetOption {
    /// Catalog index as a string
    pub id: String,
    /// Title shown in the picker
    pub title: String,
}

/// Capability value pushed to the UI layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    /// `current_extend`: raw extend register as hex
    CurrentExtend(String),
    /// `current_turn`: raw turn register as hex
    CurrentTurn(String),
    /// `set_extend`: slider value
    SetExtend(i32),
    /// `set_turn`: slider value
    SetTurn(i32),
    /// `preset`: selected index as a string
    Preset(String),
}

impl Capability {
    /// Capability identifier used by the UI layer
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CurrentExtend(_) => "current_extend",
            Self::CurrentTurn(_) => "current_turn",
            Self::SetExtend(_) => "set_extend",
            Self::SetTurn(_) => "set_turn",
            Self::Preset(_) => "preset",
        }
    }
}

/// Notification from the driver to its observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountEvent {
    /// A capability value changed
    Capability(Capability),
    /// The preset picker options changed
    PresetOptions(Vec<PresetOption>),
    /// The device is usable
    Available,
    /// The device is not usable, with a human-readable reason
    Unavailable(String),
}

/// Request delivered to the driver by the UI, automation or settings layers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountCommand {
    /// Extend slider moved
    SetExtend(i32),
    /// Turn slider moved
    SetTurn(i32),
    /// Automation: move to an explicit position
    GotoPosition {
        /// Target extend
        extend: i32,
        /// Target turn
        turn: i32,
    },
    /// Automation: move to a preset by catalog index
    GotoPreset(usize),
    /// Preset picker changed, value is the option id
    PresetCapability(String),
    /// Re-read all preset slots
    ReloadPresets,
    /// Read the position now
    Refresh,
    /// User settings changed
    SettingsChanged(Settings),
}

/// User-facing settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Periodically read the position
    pub polling: bool,
    /// Polling interval in minutes
    pub polling_interval: u64,
}

impl Settings {
    /// Polling interval as a duration, never shorter than one minute
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval.max(1).saturating_mul(60_000))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            polling: false,
            polling_interval: 5,
        }
    }
}

/// Fixed delays used by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Delay before retrying a failed bring-up, in milliseconds
    pub reconnect_backoff_ms: u64,
    /// Delay between a move write and the disconnect, in milliseconds
    pub deferred_disconnect_ms: u64,
}

impl TimingConfig {
    /// Reconnect backoff as a duration
    #[must_use]
    pub const fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    /// Deferred disconnect delay as a duration
    #[must_use]
    pub const fn deferred_disconnect(&self) -> Duration {
        Duration::from_millis(self.deferred_disconnect_ms)
    }
}

impl Default for TimingConfig {
    #[allow(clippy::cast_possible_truncation)]
    fn default() -> Self {
        Self {
            reconnect_backoff_ms: RECONNECT_BACKOFF.as_millis() as u64,
            deferred_disconnect_ms: DEFERRED_DISCONNECT_DELAY.as_millis() as u64,
        }
    }
}

/// A MotionMount offered for pairing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairableDevice {
    /// Advertised name
    pub name: String,
    /// Advertised identifier, used as the session's accessory id
    pub id: String,
}
