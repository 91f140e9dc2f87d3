use super::{GattTransport, NotifyCallback};
use crate::error::BoxError;
use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

/// [`GattTransport`] on the platform Bluetooth stack, found by advertised name.
pub struct BluestTransport {
    device_name: String,
    scan_timeout: Duration,
    adapter: Option<Adapter>,
    device: Option<Device>,
    characteristics: HashMap<Uuid, Characteristic>,
    notifications: HashMap<Uuid, JoinHandle<()>>,
}

impl BluestTransport {
    pub fn new(device_name: &str) -> Self {
        Self {
            device_name: device_name.to_string(),
            scan_timeout: Duration::from_secs(30),
            adapter: None,
            device: None,
            characteristics: HashMap::new(),
            notifications: HashMap::new(),
        }
    }

    /// How long `connect` scans for the device before giving up.
    pub fn set_scan_timeout(&mut self, scan_timeout: Duration) {
        self.scan_timeout = scan_timeout;
    }

    async fn discover_device(&self, adapter: &Adapter) -> Result<Device, BoxError> {
        let mut adapter_events = adapter.scan(&[]).await?;
        while let Some(advertising) = adapter_events.next().await {
            let name = advertising.device.name_async().await.unwrap_or_default();
            log::trace!("found device '{name}' rssi={:?}", advertising.rssi);
            if name == self.device_name {
                return Ok(advertising.device);
            }
        }
        Err(format!("Device '{}' not found", self.device_name).into())
    }

    fn characteristic(&self, uuid: Uuid) -> Result<&Characteristic, BoxError> {
        self.characteristics
            .get(&uuid)
            .ok_or_else(|| format!("Characteristic {uuid} not found").into())
    }
}

#[async_trait]
impl GattTransport for BluestTransport {
    async fn connect(&mut self) -> Result<(), BoxError> {
        let adapter = Adapter::default()
            .await
            .ok_or("Default adapter not found")?;
        adapter.wait_available().await?;

        log::debug!("scanning for '{}'", self.device_name);
        let device = timeout(self.scan_timeout, self.discover_device(&adapter))
            .await
            .map_err(|_| format!("Device '{}' not found", self.device_name))??;

        adapter.connect_device(&device).await?;
        log::info!("connected to '{}'", self.device_name);

        let mut characteristics = HashMap::new();
        for service in device.discover_services().await? {
            for characteristic in service.discover_characteristics().await? {
                log::trace!("service {} characteristic {}", service.uuid(), characteristic.uuid());
                characteristics.insert(characteristic.uuid(), characteristic);
            }
        }
        self.characteristics = characteristics;
        self.device = Some(device);
        self.adapter = Some(adapter);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BoxError> {
        for (_, task) in self.notifications.drain() {
            task.abort();
        }
        self.characteristics.clear();
        if let (Some(adapter), Some(device)) = (self.adapter.take(), self.device.take()) {
            adapter.disconnect_device(&device).await?;
            log::info!("disconnected from '{}'", self.device_name);
        }
        Ok(())
    }

    async fn start_notify(
        &mut self,
        characteristic: Uuid,
        mut callback: NotifyCallback,
    ) -> Result<(), BoxError> {
        let source = self.characteristic(characteristic)?.clone();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();
        let task = tokio::spawn(async move {
            let mut notifications = match source.notify().await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err.to_string()));
                    return;
                }
            };
            while let Some(notification) = notifications.next().await {
                match notification {
                    Ok(data) => callback(&data),
                    Err(err) => log::warn!("Notification error on {characteristic}: {err}"),
                }
            }
            log::debug!("notification stream of {characteristic} ended");
        });
        match ready_rx.await {
            Ok(Ok(())) => {
                if let Some(previous) = self.notifications.insert(characteristic, task) {
                    previous.abort();
                }
                Ok(())
            }
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err("notification task ended before subscribing".into()),
        }
    }

    async fn stop_notify(&mut self, characteristic: Uuid) -> Result<(), BoxError> {
        if let Some(task) = self.notifications.remove(&characteristic) {
            task.abort();
        }
        Ok(())
    }

    async fn write_characteristic(
        &mut self,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<(), BoxError> {
        self.characteristic(characteristic)?.write(data).await?;
        Ok(())
    }

    async fn read_characteristic(&mut self, characteristic: Uuid) -> Result<Vec<u8>, BoxError> {
        Ok(self.characteristic(characteristic)?.read().await?)
    }
}
