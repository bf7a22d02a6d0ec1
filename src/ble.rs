use async_trait::async_trait;
use btleplug::{
    api::{
        Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
        WriteType,
    },
    platform::{Adapter, Manager, Peripheral},
};
use futures::stream::{Stream, StreamExt};
use std::{collections::HashMap, pin::Pin, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{MountError, Result},
    transport::{BleLink, BleTransport},
    types::{Advertisement, CharacteristicHandle},
};

type EventStream = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// Default time spent scanning before advertisements are collected
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(5);

/// BLE transport backed by the platform adapter
pub struct BtleplugTransport {
    #[allow(dead_code)]
    manager: Manager,
    adapter: Adapter,
    peripherals: Arc<Mutex<HashMap<String, Peripheral>>>,
    scan_duration: Duration,
}

impl BtleplugTransport {
    /// Open the first Bluetooth adapter
    ///
    /// # Errors
    ///
    /// Returns [`MountError::Ble`] if the Bluetooth stack cannot be
    /// initialized, or [`MountError::DiscoveryFailed`] if there is no adapter.
    pub async fn new() -> Result<Self> {
        Self::with_scan_duration(DEFAULT_SCAN_DURATION).await
    }

    /// Open the first Bluetooth adapter, scanning for `scan_duration` on discovery
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub async fn with_scan_duration(scan_duration: Duration) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| MountError::DiscoveryFailed("no Bluetooth adapter".to_string()))?;

        Ok(Self {
            manager,
            adapter,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
            scan_duration,
        })
    }

    async fn scan(&self) -> Result<Vec<Advertisement>> {
        info!("Starting scan for {:?}", self.scan_duration);

        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(self.scan_duration).await;
        self.adapter.stop_scan().await?;

        let mut advertisements = Vec::new();
        let mut cache = self.peripherals.lock().await;
        for peripheral in self.adapter.peripherals().await? {
            let local_name = match peripheral.properties().await {
                Ok(Some(properties)) => properties.local_name,
                Ok(None) => None,
                Err(e) => {
                    debug!("Error reading properties of {}: {}", peripheral.address(), e);
                    None
                }
            };

            let identifier = peripheral.address().to_string();
            advertisements.push(Advertisement::new(identifier.clone(), local_name));
            cache.insert(identifier, peripheral);
        }

        info!("Scan completed, {} peripheral(s) seen", advertisements.len());
        Ok(advertisements)
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    async fn discover(&self) -> Result<Vec<Advertisement>> {
        self.scan().await
    }

    async fn find(&self, identifier: &str) -> Result<Advertisement> {
        if !self.peripherals.lock().await.contains_key(identifier) {
            self.scan().await?;
        }

        let peripheral = self
            .peripherals
            .lock()
            .await
            .get(identifier)
            .cloned()
            .ok_or_else(|| MountError::DiscoveryFailed(identifier.to_string()))?;

        let local_name = peripheral
            .properties()
            .await?
            .and_then(|properties| properties.local_name);
        Ok(Advertisement::new(identifier, local_name))
    }

    async fn connect(&self, advertisement: &Advertisement) -> Result<Arc<dyn BleLink>> {
        let peripheral = self
            .peripherals
            .lock()
            .await
            .get(&advertisement.identifier)
            .cloned()
            .ok_or_else(|| MountError::DiscoveryFailed(advertisement.identifier.clone()))?;

        // Subscribe first so a disconnect right after connecting is not missed.
        let events = match self.adapter.events().await {
            Ok(events) => Some(events),
            Err(e) => {
                warn!("Cannot watch for disconnects: {}", e);
                None
            }
        };

        if !peripheral.is_connected().await.unwrap_or(false) {
            peripheral
                .connect()
                .await
                .map_err(|e| MountError::ConnectionFailed(e.to_string()))?;
        }

        Ok(Arc::new(BtleplugLink {
            peripheral,
            events: Mutex::new(events),
            characteristics: Mutex::new(Vec::new()),
        }))
    }
}

/// Open link to one peripheral
pub struct BtleplugLink {
    peripheral: Peripheral,
    events: Mutex<Option<EventStream>>,
    characteristics: Mutex<Vec<Characteristic>>,
}

impl BtleplugLink {
    async fn characteristic(&self, handle: &CharacteristicHandle) -> Result<Characteristic> {
        self.characteristics
            .lock()
            .await
            .get(usize::from(handle.handle))
            .filter(|characteristic| characteristic.uuid == handle.uuid)
            .cloned()
            .ok_or_else(|| MountError::Io(format!("unknown characteristic {}", handle.uuid)))
    }
}

#[async_trait]
impl BleLink for BtleplugLink {
    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn discover_characteristics(&self, service: Uuid) -> Result<Vec<CharacteristicHandle>> {
        self.peripheral
            .discover_services()
            .await
            .map_err(|e| MountError::ConnectionFailed(e.to_string()))?;

        let found = self
            .peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service)
            .ok_or_else(|| MountError::ConnectionFailed(format!("service {service} not found")))?;

        let characteristics: Vec<Characteristic> = found.characteristics.into_iter().collect();
        let handles = handle_table(&characteristics, service)?;
        *self.characteristics.lock().await = characteristics;
        Ok(handles)
    }

    async fn read(&self, characteristic: &CharacteristicHandle) -> Result<Vec<u8>> {
        let target = self.characteristic(characteristic).await?;
        self.peripheral
            .read(&target)
            .await
            .map_err(|e| MountError::Io(format!("read {} failed: {e}", characteristic.uuid)))
    }

    async fn write(&self, characteristic: &CharacteristicHandle, data: &[u8]) -> Result<()> {
        let target = self.characteristic(characteristic).await?;
        self.peripheral
            .write(&target, data, WriteType::WithResponse)
            .await
            .map_err(|e| MountError::Io(format!("write {} failed: {e}", characteristic.uuid)))
    }

    async fn disconnect(&self) -> Result<()> {
        self.characteristics.lock().await.clear();
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn closed(&self) {
        let Some(events) = self.events.lock().await.take() else {
            return std::future::pending().await;
        };

        let id = self.peripheral.id();
        let lost = first_matching(events, |event| {
            matches!(event, CentralEvent::DeviceDisconnected(gone) if *gone == id)
        })
        .await;
        if !lost {
            debug!("Adapter event stream ended");
        }
    }
}

/// Wait for the first event accepted by `accept`
///
/// Returns `false` if the stream ends first.
async fn first_matching<S, T, F>(mut events: S, accept: F) -> bool
where
    S: Stream<Item = T> + Unpin,
    F: Fn(&T) -> bool,
{
    while let Some(event) = events.next().await {
        if accept(&event) {
            return true;
        }
    }
    false
}

/// Number the characteristics of one service by position
fn handle_table(
    characteristics: &[Characteristic],
    service: Uuid,
) -> Result<Vec<CharacteristicHandle>> {
    characteristics
        .iter()
        .enumerate()
        .map(|(index, characteristic)| {
            let handle = u16::try_from(index)
                .map_err(|_| MountError::ConnectionFailed("too many characteristics".to_string()))?;
            Ok(CharacteristicHandle {
                uuid: characteristic.uuid,
                service_uuid: service,
                handle,
            })
        })
        .collect()
}
