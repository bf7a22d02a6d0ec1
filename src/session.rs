use bytes::Bytes;
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    codec,
    error::{MountError, Result},
    transport::{BleLink, BleTransport},
    types::{Advertisement, CharacteristicHandle, CharacteristicRole, SessionState},
    MOTIONMOUNT_SERVICE_UUID,
};

/// A single read or write against one characteristic role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Read the characteristic value
    Read(CharacteristicRole),
    /// Write the given bytes with response
    Write(CharacteristicRole, Bytes),
}

impl Operation {
    /// Role the operation targets
    #[must_use]
    pub const fn role(&self) -> CharacteristicRole {
        match self {
            Self::Read(role) | Self::Write(role, _) => *role,
        }
    }
}

/// Result of a successful [`Operation`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Value returned by a read
    Value(Bytes),
    /// A write was acknowledged
    Written,
}

impl Outcome {
    /// Bytes of a read, empty for a write
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Value(bytes) => bytes,
            Self::Written => Bytes::new(),
        }
    }
}

/// Characteristics resolved on the current connection, by role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharacteristicTable {
    extend: Option<CharacteristicHandle>,
    turn: Option<CharacteristicHandle>,
    move_command: Option<CharacteristicHandle>,
    presets: Vec<(u8, CharacteristicHandle)>,
}

impl CharacteristicTable {
    /// Classify enumerated characteristics into roles
    ///
    /// Preset slots are ordered by ascending slot address. Characteristics
    /// outside the known roles are ignored.
    #[must_use]
    pub fn from_characteristics(characteristics: &[CharacteristicHandle]) -> Self {
        let mut table = Self::default();

        for characteristic in characteristics {
            match codec::classify(&characteristic.uuid) {
                Some(CharacteristicRole::ExtendPosition) => table.extend = Some(*characteristic),
                Some(CharacteristicRole::TurnPosition) => table.turn = Some(*characteristic),
                Some(CharacteristicRole::Move) => table.move_command = Some(*characteristic),
                Some(CharacteristicRole::PresetSlot(slot)) => {
                    debug!("Found possible preset characteristic: {}", characteristic.uuid);
                    table.presets.push((slot, *characteristic));
                }
                None => {}
            }
        }

        table.presets.sort_by_key(|(slot, _)| *slot);
        table
    }

    /// Handle for a role, if resolved
    #[must_use]
    pub fn get(&self, role: CharacteristicRole) -> Option<&CharacteristicHandle> {
        match role {
            CharacteristicRole::ExtendPosition => self.extend.as_ref(),
            CharacteristicRole::TurnPosition => self.turn.as_ref(),
            CharacteristicRole::Move => self.move_command.as_ref(),
            CharacteristicRole::PresetSlot(slot) => self
                .presets
                .iter()
                .find(|(candidate, _)| *candidate == slot)
                .map(|(_, handle)| handle),
        }
    }

    /// Preset slot role bytes, ascending
    #[must_use]
    pub fn preset_slots(&self) -> Vec<u8> {
        self.presets.iter().map(|(slot, _)| *slot).collect()
    }

    /// Preset slot candidates with their handles, ascending by slot
    #[must_use]
    pub fn presets(&self) -> &[(u8, CharacteristicHandle)] {
        &self.presets
    }

    /// Whether nothing has been resolved
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extend.is_none()
            && self.turn.is_none()
            && self.move_command.is_none()
            && self.presets.is_empty()
    }
}

struct Inner {
    state: SessionState,
    advertisement: Option<Advertisement>,
    link: Option<Arc<dyn BleLink>>,
    table: CharacteristicTable,
    generation: u64,
}

impl Inner {
    fn tear_down(&mut self) -> Option<Arc<dyn BleLink>> {
        self.generation += 1;
        self.table = CharacteristicTable::default();
        let link = self.link.take();
        if self.state == SessionState::Connected {
            self.state = SessionState::Disconnected;
        }
        link
    }
}

struct Shared {
    transport: Arc<dyn BleTransport>,
    accessory_id: String,
    inner: Mutex<Inner>,
}

/// Connection to one MotionMount
///
/// `Session` owns the advertisement, the link and the characteristic table.
/// It moves through [`SessionState`] as follows:
///
/// - `Idle` → `Discovered` on [`discover`](Self::discover)
/// - `Discovered`/`Disconnected` → `Connected` on [`connect`](Self::connect)
/// - `Connected` → `Disconnected` on [`disconnect`](Self::disconnect) or link loss
///
/// The characteristic table is rebuilt on every connect and cleared the
/// moment a disconnect is observed. Cloning a `Session` yields another
/// handle to the same connection.
///
/// Only connection setup is serialized. Reads and writes issued through
/// [`perform`](Self::perform) run concurrently once a link is available.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("accessory_id", &self.shared.accessory_id)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create an idle session for the accessory with the given advertised identifier
    pub fn new(transport: Arc<dyn BleTransport>, accessory_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                accessory_id: accessory_id.into(),
                inner: Mutex::new(Inner {
                    state: SessionState::Idle,
                    advertisement: None,
                    link: None,
                    table: CharacteristicTable::default(),
                    generation: 0,
                }),
            }),
        }
    }

    /// Advertised identifier of the accessory
    #[must_use]
    pub fn accessory_id(&self) -> &str {
        &self.shared.accessory_id
    }

    /// Current connection state
    pub async fn state(&self) -> SessionState {
        self.shared.inner.lock().await.state
    }

    /// Whether the session holds a link that reports itself connected
    pub async fn is_connected(&self) -> bool {
        let link = self.shared.inner.lock().await.link.clone();
        match link {
            Some(link) => link.is_connected().await,
            None => false,
        }
    }

    /// Preset slot role bytes resolved on the current connection
    pub async fn preset_slots(&self) -> Vec<u8> {
        self.shared.inner.lock().await.table.preset_slots()
    }

    /// Preset slot candidates resolved on the current connection, as `(slot, uuid)`
    pub async fn preset_candidates(&self) -> Vec<(u8, Uuid)> {
        self.shared
            .inner
            .lock()
            .await
            .table
            .presets()
            .iter()
            .map(|(slot, handle)| (*slot, handle.uuid))
            .collect()
    }

    /// Resolve the advertisement
    ///
    /// The advertisement is retained and reused on later calls.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::DiscoveryFailed`] if the accessory cannot be found.
    pub async fn discover(&self) -> Result<Advertisement> {
        let mut inner = self.shared.inner.lock().await;
        self.discover_locked(&mut inner).await
    }

    /// Open the link and resolve the MotionMount characteristics
    ///
    /// Discovers first if no advertisement is known. Does nothing if already
    /// connected. On failure the state is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::DiscoveryFailed`] if the accessory cannot be found,
    /// or [`MountError::ConnectionFailed`] if the link cannot be opened or
    /// the service is absent.
    pub async fn connect(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock().await;
        self.connect_locked(&mut inner).await
    }

    /// Close the link
    ///
    /// Best effort: transport errors are logged and the local state is
    /// cleared regardless.
    pub async fn disconnect(&self) {
        let link = self.shared.inner.lock().await.tear_down();

        match link {
            Some(link) => {
                debug!("Disconnecting from {}", self.shared.accessory_id);
                if let Err(e) = link.disconnect().await {
                    warn!("Error disconnecting: {}", e);
                }
            }
            None => debug!("Not disconnecting, no link to {}", self.shared.accessory_id),
        }
    }

    /// Disconnect after `delay` on a background task
    ///
    /// Each call schedules an independent disconnect.
    pub fn disconnect_after(&self, delay: Duration) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            session.disconnect().await;
        })
    }

    /// Run one operation, connecting first if needed
    ///
    /// # Errors
    ///
    /// Returns [`MountError::NotConnected`] if auto-connect fails,
    /// [`MountError::MissingCharacteristic`] if the role was not resolved on
    /// this connection, or [`MountError::Io`] if the transfer fails.
    pub async fn perform(&self, operation: Operation) -> Result<Outcome> {
        let role = operation.role();
        let (link, handle) = {
            let mut inner = self.shared.inner.lock().await;
            if let Err(e) = self.connect_locked(&mut inner).await {
                return Err(MountError::NotConnected {
                    reason: e.to_string(),
                });
            }

            let handle = *inner
                .table
                .get(role)
                .ok_or(MountError::MissingCharacteristic(role))?;
            let link = inner.link.clone().ok_or_else(|| MountError::NotConnected {
                reason: "link closed during connect".to_string(),
            })?;
            (link, handle)
        };

        match operation {
            Operation::Read(_) => {
                let value = link.read(&handle).await?;
                debug!("Read {}: {:02X?}", role, value);
                Ok(Outcome::Value(Bytes::from(value)))
            }
            Operation::Write(_, data) => {
                debug!("Writing {}: {:02X?}", role, data.as_ref());
                link.write(&handle, &data).await?;
                Ok(Outcome::Written)
            }
        }
    }

    /// Read the characteristic for `role`
    ///
    /// # Errors
    ///
    /// See [`perform`](Self::perform).
    pub async fn read(&self, role: CharacteristicRole) -> Result<Bytes> {
        self.perform(Operation::Read(role))
            .await
            .map(Outcome::into_bytes)
    }

    /// Write `data` to the characteristic for `role`
    ///
    /// # Errors
    ///
    /// See [`perform`](Self::perform).
    pub async fn write(&self, role: CharacteristicRole, data: impl Into<Bytes>) -> Result<()> {
        self.perform(Operation::Write(role, data.into()))
            .await
            .map(|_| ())
    }

    async fn discover_locked(&self, inner: &mut Inner) -> Result<Advertisement> {
        if let Some(advertisement) = &inner.advertisement {
            return Ok(advertisement.clone());
        }

        let advertisement = self
            .shared
            .transport
            .find(&self.shared.accessory_id)
            .await
            .map_err(|e| match e {
                MountError::DiscoveryFailed(_) => e,
                other => MountError::DiscoveryFailed(other.to_string()),
            })?;

        info!("Peripheral found: {}", advertisement.identifier);
        inner.advertisement = Some(advertisement.clone());
        inner.state = SessionState::Discovered;
        Ok(advertisement)
    }

    async fn connect_locked(&self, inner: &mut Inner) -> Result<()> {
        if let Some(link) = &inner.link {
            if link.is_connected().await {
                return Ok(());
            }
            info!("Link to {} no longer connected", self.shared.accessory_id);
            inner.tear_down();
        }

        let advertisement = self.discover_locked(inner).await?;

        info!("Connecting to {}", advertisement.identifier);
        let link = self
            .shared
            .transport
            .connect(&advertisement)
            .await
            .map_err(|e| match e {
                MountError::ConnectionFailed(_) => e,
                other => MountError::ConnectionFailed(other.to_string()),
            })?;

        let characteristics = match link.discover_characteristics(MOTIONMOUNT_SERVICE_UUID).await {
            Ok(characteristics) => characteristics,
            Err(e) => {
                if let Err(close_error) = link.disconnect().await {
                    debug!("Error closing half-open link: {}", close_error);
                }
                return Err(match e {
                    MountError::ConnectionFailed(_) => e,
                    other => MountError::ConnectionFailed(other.to_string()),
                });
            }
        };

        inner.generation += 1;
        inner.table = CharacteristicTable::from_characteristics(&characteristics);
        inner.link = Some(Arc::clone(&link));
        inner.state = SessionState::Connected;

        info!(
            "Connected to {}, {} preset slot(s)",
            advertisement.identifier,
            inner.table.presets.len()
        );

        Self::watch_link(Arc::downgrade(&self.shared), link, inner.generation);
        Ok(())
    }

    fn watch_link(shared: Weak<Shared>, link: Arc<dyn BleLink>, generation: u64) {
        tokio::spawn(async move {
            link.closed().await;

            let Some(shared) = shared.upgrade() else {
                return;
            };
            let mut inner = shared.inner.lock().await;
            if inner.generation == generation && inner.link.is_some() {
                info!("disconnected: {}", shared.accessory_id);
                inner.tear_down();
            }
        });
    }
}
