//! The GATT client capability the drivers run on.

use crate::error::BoxError;
use async_trait::async_trait;
use uuid::Uuid;

#[cfg(feature = "ble")]
mod bluest;
#[cfg(test)]
pub(crate) mod mock;

#[cfg_attr(docsrs, doc(cfg(feature = "ble")))]
#[cfg(feature = "ble")]
pub use self::bluest::BluestTransport;

/// Called once per notification with the raw bytes, in arrival order.
///
/// The transport may call it from any thread.
pub type NotifyCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// A connection to one BLE peripheral.
#[async_trait]
pub trait GattTransport: Send {
    async fn connect(&mut self) -> Result<(), BoxError>;

    async fn disconnect(&mut self) -> Result<(), BoxError>;

    /// Subscribes to `characteristic` and feeds every notification to `callback`.
    async fn start_notify(
        &mut self,
        characteristic: Uuid,
        callback: NotifyCallback,
    ) -> Result<(), BoxError>;

    async fn stop_notify(&mut self, characteristic: Uuid) -> Result<(), BoxError>;

    async fn write_characteristic(
        &mut self,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<(), BoxError>;

    async fn read_characteristic(&mut self, characteristic: Uuid) -> Result<Vec<u8>, BoxError>;
}
