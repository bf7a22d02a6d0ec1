//! Wireless transport boundary.
//!
//! The session only talks to the radio through these two traits. The
//! production implementation lives in [`crate::ble`].

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::Result,
    types::{Advertisement, CharacteristicHandle},
};

/// Discovery and connection entry point of a BLE stack
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Scan and return every advertisement seen
    async fn discover(&self) -> Result<Vec<Advertisement>>;

    /// Resolve the advertisement with the given identifier
    ///
    /// # Errors
    ///
    /// Returns [`MountError::DiscoveryFailed`](crate::MountError::DiscoveryFailed)
    /// if the accessory is not advertising.
    async fn find(&self, identifier: &str) -> Result<Advertisement>;

    /// Open a link to a previously resolved advertisement
    async fn connect(&self, advertisement: &Advertisement) -> Result<Arc<dyn BleLink>>;
}

/// An open link to one peripheral
#[async_trait]
pub trait BleLink: Send + Sync {
    /// Whether the peripheral still reports itself connected
    async fn is_connected(&self) -> bool;

    /// Enumerate the characteristics of `service`
    ///
    /// # Errors
    ///
    /// Returns [`MountError::ConnectionFailed`](crate::MountError::ConnectionFailed)
    /// if the service is absent.
    async fn discover_characteristics(&self, service: Uuid) -> Result<Vec<CharacteristicHandle>>;

    /// Read a characteristic value
    async fn read(&self, characteristic: &CharacteristicHandle) -> Result<Vec<u8>>;

    /// Write a characteristic value with response
    async fn write(&self, characteristic: &CharacteristicHandle, data: &[u8]) -> Result<()>;

    /// Close the link
    async fn disconnect(&self) -> Result<()>;

    /// Resolve once the link is lost or closed
    async fn closed(&self);
}
