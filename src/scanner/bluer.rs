//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to talk to the BlueZ daemon over
//! D-Bus. It requires `bluetoothd` to be running.
//!
//! BlueZ reports devices, not packets: once a device is known we follow
//! its property changes and republish the cached advertisement whenever
//! its service data or RSSI changes.

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, ScanError, ScanFuture, ScanMode, Transport};
use crate::advertisement::{ATC_SERVICE_UUID, Advertisement};
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{
    Adapter, AdapterEvent, Address, Device, DeviceEvent, DeviceProperty, DiscoveryFilter,
    DiscoveryTransport, Session,
};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

/// AD type for service data with a 16-bit UUID.
pub const SERVICE_DATA_16_TYPE: u8 = 0x16;

/// `0x181A` in advertisement (little-endian) byte order.
pub const ATC_SERVICE_UUID_BYTES: [u8; 2] = [0x1a, 0x18];

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Transport backed by BlueZ.
#[derive(Debug, Default)]
pub struct BluerTransport {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Transport for BluerTransport {
    fn start(&self, mode: ScanMode) -> ScanFuture<'_, mpsc::Receiver<Advertisement>> {
        Box::pin(async move {
            let session = Session::new().await?;
            let adapter = session.default_adapter().await?;
            adapter.set_powered(true).await?;
            log::info!("using adapter {} ({mode} scan)", adapter.name());

            let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);
            let task = match mode {
                ScanMode::Active => spawn_discovery(session, adapter, tx).await?,
                ScanMode::Passive => spawn_monitor(session, adapter, tx).await?,
            };

            let previous = self
                .task
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .replace(task);
            if let Some(previous) = previous {
                previous.abort();
            }
            Ok(rx)
        })
    }

    fn stop(&self) -> ScanFuture<'_, ()> {
        Box::pin(async move {
            let task = self
                .task
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(task) = task {
                // Dropping the task drops the session, the discovery session
                // and every device watcher with it.
                task.abort();
                let _ = task.await;
            }
            Ok(())
        })
    }
}

/// Active scan: BlueZ discovery filtered on the ATC service UUID.
async fn spawn_discovery(
    session: Session,
    adapter: Adapter,
    tx: mpsc::Sender<Advertisement>,
) -> Result<JoinHandle<()>, ScanError> {
    adapter
        .set_discovery_filter(DiscoveryFilter {
            uuids: HashSet::from([ATC_SERVICE_UUID]),
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        })
        .await?;
    let events = adapter.discover_devices_with_changes().await?;

    Ok(tokio::spawn(async move {
        let _session = session;
        let mut events = Box::pin(events);
        let mut watchers = JoinSet::new();

        while let Some(event) = events.next().await {
            if let AdapterEvent::DeviceAdded(address) = event {
                watchers.spawn(watch_device(adapter.clone(), address, tx.clone()));
            }
        }
    }))
}

/// Passive scan: an advertisement monitor matching ATC service data.
async fn spawn_monitor(
    session: Session,
    adapter: Adapter,
    tx: mpsc::Sender<Advertisement>,
) -> Result<JoinHandle<()>, ScanError> {
    let pattern = Pattern {
        data_type: SERVICE_DATA_16_TYPE,
        start_position: 0,
        content: ATC_SERVICE_UUID_BYTES.to_vec(),
    };

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            patterns: Some(vec![pattern]),
            ..Default::default()
        })
        .await?;

    Ok(tokio::spawn(async move {
        // Keep all Bluetooth state alive by moving it into this task
        let _session = session;
        let _monitor_manager = monitor_manager;
        let mut watchers = JoinSet::new();

        while let Some(event) = monitor_handle.next().await {
            if let MonitorEvent::DeviceFound(device_id) = event {
                watchers.spawn(watch_device(adapter.clone(), device_id.device, tx.clone()));
            }
        }
    }))
}

async fn watch_device(adapter: Adapter, address: Address, tx: mpsc::Sender<Advertisement>) {
    if let Err(e) = follow_device(&adapter, address, &tx).await {
        log::debug!("stopped watching {address}: {e}");
    }
}

async fn follow_device(
    adapter: &Adapter,
    address: Address,
    tx: &mpsc::Sender<Advertisement>,
) -> Result<(), ScanError> {
    let device = adapter.device(address)?;
    if !publish(&device, tx).await? {
        return Ok(());
    }

    let mut events = device.events().await?;
    while let Some(event) = events.next().await {
        match event {
            DeviceEvent::PropertyChanged(DeviceProperty::ServiceData(_) | DeviceProperty::Rssi(_)) => {
                if !publish(&device, tx).await? {
                    break;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Send the device's current advertisement. Returns `false` once the
/// receiver is gone.
async fn publish(device: &Device, tx: &mpsc::Sender<Advertisement>) -> Result<bool, ScanError> {
    let Some(service_data) = device.service_data().await? else {
        return Ok(true);
    };

    let advertisement = Advertisement {
        address: device.address().into(),
        service_data,
        rssi: device.rssi().await?,
        local_name: device.name().await?,
    };
    Ok(tx.send(advertisement).await.is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertisement::uuid_from_u16;
    use crate::mac_address::MacAddress;

    #[test]
    fn test_address_to_mac_address() {
        let addr = Address([0xA4, 0xC1, 0x38, 0x00, 0x99, 0x5B]);
        let mac: MacAddress = addr.into();
        assert_eq!(mac, MacAddress([0xA4, 0xC1, 0x38, 0x00, 0x99, 0x5B]));
    }

    #[test]
    fn test_monitor_pattern_matches_service_uuid() {
        let short = u16::from_le_bytes(ATC_SERVICE_UUID_BYTES);
        assert_eq!(uuid_from_u16(short), ATC_SERVICE_UUID);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let transport = BluerTransport::default();
        transport.stop().await.unwrap();
    }
}
