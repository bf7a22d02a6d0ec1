use std::sync::Arc;
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use tracing::{debug, error, info, warn};

use crate::{
    catalog::PresetCatalog,
    controller::PositionController,
    error::Result,
    poller::PollScheduler,
    session::Session,
    store::PresetStore,
    transport::BleTransport,
    types::{
        Capability, MountCommand, MountEvent, PairableDevice, PresetEntry, Settings, TimingConfig,
    },
    MOTIONMOUNT_LOCAL_NAME,
};

/// Reason reported while the first bring-up is pending
pub const AWAITING_INITIAL_CONNECT: &str = "Awaiting initial connect";

/// Main interface for one paired MotionMount
///
/// `MotionMount` ties the [`Session`], [`PresetCatalog`],
/// [`PositionController`] and [`PollScheduler`] together. It brings the
/// device up, reports availability and capability values as
/// [`MountEvent`]s and dispatches inbound [`MountCommand`]s.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use motionmount::{ble::BtleplugTransport, store::JsonFileStore};
/// use motionmount::{MotionMount, MountCommand, Settings};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let transport = Arc::new(BtleplugTransport::new().await?);
///     let store = Arc::new(JsonFileStore::new("motionmount.json"));
///     let settings = Settings { polling: true, polling_interval: 10 };
///
///     let (mount, mut events) = MotionMount::new(transport, "AA:BB:CC:DD:EE:FF", settings, store);
///     tokio::spawn(async move {
///         while let Some(event) = events.recv().await {
///             println!("{event:?}");
///         }
///     });
///
///     // Retries every 30 s until the mount answers.
///     mount.start().await;
///     mount.handle(MountCommand::GotoPreset(0)).await;
///     Ok(())
/// }
/// ```
pub struct MotionMount {
    session: Session,
    catalog: PresetCatalog,
    controller: PositionController,
    poller: PollScheduler,
    settings: RwLock<Settings>,
    events: UnboundedSender<MountEvent>,
    timing: TimingConfig,
}

impl std::fmt::Debug for MotionMount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionMount")
            .field("session", &self.session)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

impl MotionMount {
    /// Create a driver for the accessory advertising as `accessory_id`
    ///
    /// Returns the driver and the receiver for its events. Nothing touches
    /// the radio until [`bring_up`](Self::bring_up) or [`start`](Self::start).
    pub fn new(
        transport: Arc<dyn BleTransport>,
        accessory_id: impl Into<String>,
        settings: Settings,
        store: Arc<dyn PresetStore>,
    ) -> (Self, UnboundedReceiver<MountEvent>) {
        Self::with_timing(
            transport,
            accessory_id,
            settings,
            store,
            TimingConfig::default(),
        )
    }

    /// Create a driver with custom delays
    pub fn with_timing(
        transport: Arc<dyn BleTransport>,
        accessory_id: impl Into<String>,
        settings: Settings,
        store: Arc<dyn PresetStore>,
        timing: TimingConfig,
    ) -> (Self, UnboundedReceiver<MountEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let session = Session::new(transport, accessory_id);
        let controller =
            PositionController::new(session.clone(), events.clone(), timing.deferred_disconnect());
        let catalog = PresetCatalog::new(session.clone(), store, timing.deferred_disconnect());
        let poller = PollScheduler::new(controller.clone(), settings.interval());

        let mount = Self {
            session,
            catalog,
            controller,
            poller,
            settings: RwLock::new(settings),
            events,
            timing,
        };
        (mount, rx)
    }

    /// MotionMounts currently advertising, for pairing
    ///
    /// # Errors
    ///
    /// Returns the transport error if the scan fails.
    pub async fn list_pairable(transport: &dyn BleTransport) -> Result<Vec<PairableDevice>> {
        let devices: Vec<_> = transport
            .discover()
            .await?
            .into_iter()
            .filter_map(|advertisement| match advertisement.local_name {
                Some(name) if name == MOTIONMOUNT_LOCAL_NAME => Some(PairableDevice {
                    name,
                    id: advertisement.identifier,
                }),
                _ => None,
            })
            .collect();

        info!("Found {} pairable MotionMount(s)", devices.len());
        Ok(devices)
    }

    /// Run the full initial sequence once
    ///
    /// Discover, connect, read the position, load presets, publish the
    /// preset picker, mark the device available and start polling if
    /// enabled.
    ///
    /// # Errors
    ///
    /// Returns the first discovery, connection or read error. The device is
    /// left unavailable in that case.
    pub async fn bring_up(&self) -> Result<()> {
        self.session.discover().await?;
        self.session.connect().await?;
        self.controller.read().await?;
        self.catalog.load().await?;
        self.publish_presets().await;

        self.emit(MountEvent::Available);
        info!("MotionMount has been initialized");

        let settings = *self.settings.read().await;
        if settings.polling {
            info!("Polling enabled");
            self.poller.start(settings.interval()).await;
        } else {
            info!("Polling disabled");
        }
        Ok(())
    }

    /// Bring the device up, retrying until it succeeds
    ///
    /// The device is reported unavailable until the first successful
    /// [`bring_up`](Self::bring_up). Failed attempts are retried after the
    /// reconnect backoff.
    pub async fn start(&self) {
        self.emit(MountEvent::Unavailable(AWAITING_INITIAL_CONNECT.to_string()));

        let mut first = true;
        loop {
            match self.bring_up().await {
                Ok(()) => return,
                Err(e) => {
                    let reason = if first {
                        error!("Error in initial connect: {}", e);
                        format!("Initial connection to device failed: {e}")
                    } else {
                        error!("Error on reconnect: {}", e);
                        format!("Reconnect to device failed: {e}")
                    };
                    self.emit(MountEvent::Unavailable(reason));
                }
            }

            first = false;
            tokio::time::sleep(self.timing.reconnect_backoff()).await;
        }
    }

    /// Dispatch one command
    ///
    /// Invalid input and failed operations are logged and dropped.
    pub async fn handle(&self, command: MountCommand) {
        debug!("Handling {:?}", command);
        let result = match command {
            MountCommand::SetExtend(extend) => self.controller.set_extend(extend).await,
            MountCommand::SetTurn(turn) => self.controller.set_turn(turn).await,
            MountCommand::GotoPosition { extend, turn } => {
                info!("Goto position {} {}", extend, turn);
                self.controller.write(extend, turn).await
            }
            MountCommand::GotoPreset(index) => self.catalog.select(index).await.map(|_| ()),
            MountCommand::PresetCapability(value) => match value.parse::<usize>() {
                Ok(index) => self.catalog.select(index).await.map(|_| ()),
                Err(_) => {
                    warn!("Invalid preset index {}", value);
                    Ok(())
                }
            },
            MountCommand::ReloadPresets => self.reload_presets().await,
            MountCommand::Refresh => self.controller.read().await.map(|_| ()),
            MountCommand::SettingsChanged(settings) => {
                self.settings_changed(settings).await;
                Ok(())
            }
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_invalid_input() => warn!("{}", e),
            Err(e) => warn!("Command failed: {}", e),
        }
    }

    /// Dispatch commands until every sender is dropped
    pub async fn run(&self, mut commands: UnboundedReceiver<MountCommand>) {
        while let Some(command) = commands.recv().await {
            self.handle(command).await;
        }
        debug!("Command channel closed");
    }

    /// Presets matching `query`, for automation autocomplete
    pub async fn search_presets(&self, query: &str) -> Vec<PresetEntry> {
        self.catalog.search(query).await
    }

    /// Apply changed user settings
    ///
    /// Turning polling off stops the loop, an interval change restarts a
    /// running loop, turning polling on starts it.
    pub async fn settings_changed(&self, new: Settings) {
        let old = std::mem::replace(&mut *self.settings.write().await, new);

        if old.polling && !new.polling {
            self.poller.stop().await;
            info!("Polling disabled");
        }

        if old.polling_interval != new.polling_interval {
            info!("Polling interval changed to {} minute(s)", new.polling_interval);
            self.poller.reconfigure(new.interval()).await;
        }

        if !old.polling && new.polling {
            info!("Polling enabled");
            self.poller.start(new.interval()).await;
        }
    }

    /// Stop polling and release the link
    pub async fn shutdown(&self) {
        info!("MotionMount has been deleted");
        self.poller.stop().await;
        self.session.disconnect().await;
    }

    /// Current settings
    pub async fn settings(&self) -> Settings {
        *self.settings.read().await
    }

    /// The preset catalog
    #[must_use]
    pub const fn catalog(&self) -> &PresetCatalog {
        &self.catalog
    }

    /// The position controller
    #[must_use]
    pub const fn controller(&self) -> &PositionController {
        &self.controller
    }

    /// The poll scheduler
    #[must_use]
    pub const fn poller(&self) -> &PollScheduler {
        &self.poller
    }

    /// The underlying session
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    async fn reload_presets(&self) -> Result<()> {
        let count = self.catalog.load().await?;
        debug!("Reloaded {} preset(s)", count);
        self.publish_presets().await;
        Ok(())
    }

    async fn publish_presets(&self) {
        self.emit(MountEvent::PresetOptions(self.catalog.options().await));
        if self.catalog.is_empty().await {
            return;
        }

        let selected = self.catalog.restored_selection().await;
        self.emit(MountEvent::Capability(Capability::Preset(selected.to_string())));
    }

    fn emit(&self, event: MountEvent) {
        if self.events.send(event).is_err() {
            debug!("No observer for device event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::MemoryStore,
        transport::fake::{preset_slot, preset_uuid, FakeMount, MOUNT_ID},
        types::{PresetOption, SessionState},
        RECONNECT_BACKOFF,
    };
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_test::assert_ok;

    fn mount_with_presets() -> FakeMount {
        FakeMount::new().with_presets(&[
            (0x0a, preset_slot("Home", [0x00, 0x16, 0x00, 0x00])),
            (0x0b, preset_slot("Movie Night", [0x00, 0x64, 0xFF, 0xEC])),
        ])
    }

    fn device(
        mount: &FakeMount,
        settings: Settings,
        store: Arc<MemoryStore>,
    ) -> (MotionMount, UnboundedReceiver<MountEvent>) {
        MotionMount::new(Arc::new(mount.clone()), MOUNT_ID, settings, store)
    }

    fn drain(rx: &mut UnboundedReceiver<MountEvent>) -> Vec<MountEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_list_pairable_filters_by_name() {
        let mount = FakeMount::new();
        let devices = assert_ok!(MotionMount::list_pairable(&mount).await);
        assert_eq!(
            devices,
            vec![PairableDevice {
                name: MOTIONMOUNT_LOCAL_NAME.to_string(),
                id: MOUNT_ID.to_string(),
            }]
        );

        mount.state().advertising = false;
        assert!(assert_ok!(MotionMount::list_pairable(&mount).await).is_empty());
    }

    #[tokio::test]
    async fn test_bring_up_publishes_state() {
        let mount = mount_with_presets();
        let store = Arc::new(MemoryStore::default());
        assert_ok!(store.save_last_preset(1).await);
        let (device, mut rx) = device(&mount, Settings::default(), store);

        assert_ok!(device.bring_up().await);
        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                MountEvent::Capability(Capability::CurrentExtend("0032".to_string())),
                MountEvent::Capability(Capability::SetExtend(50)),
                MountEvent::Capability(Capability::CurrentTurn("ffec".to_string())),
                MountEvent::Capability(Capability::SetTurn(-20)),
                MountEvent::PresetOptions(vec![
                    PresetOption {
                        id: "0".to_string(),
                        title: "Home".to_string()
                    },
                    PresetOption {
                        id: "1".to_string(),
                        title: "Movie Night".to_string()
                    },
                ]),
                MountEvent::Capability(Capability::Preset("1".to_string())),
                MountEvent::Available,
            ]
        );
        assert!(!device.poller().is_running().await);
    }

    #[tokio::test]
    async fn test_bring_up_without_presets_publishes_placeholder() {
        let mount = FakeMount::new();
        let (device, mut rx) = device(&mount, Settings::default(), Arc::default());

        assert_ok!(device.bring_up().await);
        let events = drain(&mut rx);
        assert!(events.contains(&MountEvent::PresetOptions(vec![PresetOption {
            id: "0".to_string(),
            title: "None".to_string(),
        }])));
        assert!(!events
            .iter()
            .any(|event| matches!(event, MountEvent::Capability(Capability::Preset(_)))));
        assert_eq!(events.last(), Some(&MountEvent::Available));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_retries_after_backoff() {
        let mount = mount_with_presets();
        mount.state().fail_connects = 2;
        let (device, mut rx) = device(&mount, Settings::default(), Arc::default());

        let started = Instant::now();
        device.start().await;
        assert!(started.elapsed() >= 2 * RECONNECT_BACKOFF);
        assert!(started.elapsed() < 3 * RECONNECT_BACKOFF);

        let unavailable: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                MountEvent::Unavailable(reason) => Some(reason),
                _ => None,
            })
            .collect();
        assert_eq!(unavailable.len(), 3);
        assert_eq!(unavailable[0], AWAITING_INITIAL_CONNECT);
        assert!(unavailable[1].starts_with("Initial connection to device failed: "));
        assert!(unavailable[2].starts_with("Reconnect to device failed: "));
        assert_eq!(device.catalog().len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bring_up_starts_polling_when_enabled() {
        let mount = mount_with_presets();
        let settings = Settings {
            polling: true,
            polling_interval: 1,
        };
        let (device, _rx) = device(&mount, settings, Arc::default());

        assert_ok!(device.bring_up().await);
        assert!(device.poller().is_running().await);
        assert_eq!(device.poller().interval().await, Duration::from_secs(60));

        device.shutdown().await;
        assert!(!device.poller().is_running().await);
        assert_eq!(device.session().state().await, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_handle_drops_invalid_input() {
        let mount = mount_with_presets();
        let (device, _rx) = device(&mount, Settings::default(), Arc::default());
        assert_ok!(device.bring_up().await);

        device.handle(MountCommand::GotoPosition { extend: 101, turn: 0 }).await;
        device.handle(MountCommand::SetTurn(-150)).await;
        device.handle(MountCommand::GotoPreset(9)).await;
        device.handle(MountCommand::PresetCapability("abc".to_string())).await;
        assert!(mount.move_writes().is_empty());
    }

    #[tokio::test]
    async fn test_handle_moves() {
        let mount = mount_with_presets();
        let store = Arc::new(MemoryStore::default());
        let (device, _rx) = device(&mount, Settings::default(), Arc::clone(&store));
        assert_ok!(device.bring_up().await);

        device.handle(MountCommand::GotoPosition { extend: 40, turn: -20 }).await;
        device.handle(MountCommand::SetExtend(60)).await;
        device.handle(MountCommand::PresetCapability("1".to_string())).await;

        let writes: Vec<_> = mount.move_writes().into_iter().map(|(data, _)| data).collect();
        assert_eq!(
            writes,
            vec![
                vec![0x00, 0x28, 0xFF, 0xEC],
                vec![0x00, 0x3C, 0xFF, 0xEC],
                vec![0x00, 0x64, 0xFF, 0xEC],
            ]
        );
        assert_eq!(assert_ok!(store.load_last_preset().await), Some(1));
    }

    #[tokio::test]
    async fn test_run_until_closed_and_search() {
        let mount = mount_with_presets();
        let (device, mut rx) = device(&mount, Settings::default(), Arc::default());
        assert_ok!(device.bring_up().await);
        drain(&mut rx);

        mount
            .state()
            .registers
            .insert(preset_uuid(0x0c), preset_slot("Night", [0, 1, 0, 1]));

        let (tx, commands) = mpsc::unbounded_channel();
        assert_ok!(tx.send(MountCommand::ReloadPresets));
        assert_ok!(tx.send(MountCommand::Refresh));
        drop(tx);
        device.run(commands).await;

        // The new slot only shows up after a fresh enumeration.
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|event| matches!(event, MountEvent::PresetOptions(options) if options.len() == 2)));
        assert!(events.contains(&MountEvent::Capability(Capability::SetTurn(-20))));

        device.handle(MountCommand::ReloadPresets).await;
        let hits = device.search_presets("night").await;
        assert_eq!(
            hits,
            vec![
                PresetEntry {
                    id: "1".to_string(),
                    name: "Movie Night".to_string()
                },
                PresetEntry {
                    id: "2".to_string(),
                    name: "Night".to_string()
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_changed_drives_polling() {
        let mount = mount_with_presets();
        let (device, _rx) = device(&mount, Settings::default(), Arc::default());

        device
            .settings_changed(Settings {
                polling: false,
                polling_interval: 2,
            })
            .await;
        assert!(!device.poller().is_running().await);
        assert_eq!(device.poller().interval().await, Duration::from_secs(120));

        device
            .handle(MountCommand::SettingsChanged(Settings {
                polling: true,
                polling_interval: 2,
            }))
            .await;
        assert!(device.poller().is_running().await);

        device
            .settings_changed(Settings {
                polling: false,
                polling_interval: 3,
            })
            .await;
        assert!(!device.poller().is_running().await);
        assert_eq!(device.poller().interval().await, Duration::from_secs(180));
        assert_eq!(device.settings().await.polling_interval, 3);
    }
}
