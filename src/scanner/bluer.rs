//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! BlueZ hands out device properties rather than raw advertising reports, so
//! observations from this backend carry no raw payload and are never marked
//! connectable.

use super::{OBSERVATION_CHANNEL_BUFFER_SIZE, Observation, ObservationResult, ReportError, ScanError};
use crate::advertisement::{AdvertisementData, ServiceData};
use crate::mac_address::{AddressKind, DeviceAddress};
use bluer::{
    Adapter, AdapterEvent, Address, AddressType, DiscoveryFilter, DiscoveryTransport, Session,
};
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Apple company identifier, preferred when a device reports several.
const APPLE_COMPANY_ID: u16 = 0x004C;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

impl From<bluer::Error> for ReportError {
    fn from(err: bluer::Error) -> Self {
        ReportError::Bluetooth(err.to_string())
    }
}

impl From<AddressType> for AddressKind {
    fn from(kind: AddressType) -> Self {
        match kind {
            AddressType::LePublic | AddressType::BrEdr => AddressKind::Public,
            AddressType::LeRandom => AddressKind::Random,
        }
    }
}

/// Start scanning for advertisements using the BlueZ D-Bus backend.
///
/// This function powers the default adapter and runs an LE discovery that
/// reports every property change. Observations are sent through the returned
/// channel until the receiver is dropped.
///
/// # Arguments
/// * `verbose` - If true, report errors are sent as Err values; otherwise they're only logged.
///
/// # Returns
/// A receiver for observations (or report errors if verbose).
pub async fn start_scan(verbose: bool) -> Result<mpsc::Receiver<ObservationResult>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    adapter
        .set_discovery_filter(DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        })
        .await?;

    let mut events = adapter.discover_devices_with_changes().await?;
    let (tx, rx) = mpsc::channel(OBSERVATION_CHANNEL_BUFFER_SIZE);

    // Spawn a task that owns all Bluetooth state and runs the event loop
    tokio::spawn(async move {
        // Keep the D-Bus session alive by moving it into this task
        let _session = session;

        while let Some(event) = events.next().await {
            let AdapterEvent::DeviceAdded(address) = event else {
                continue;
            };

            let result = read_device(&adapter, address).await.map(Observation::now);
            if let Err(e) = &result {
                log::warn!("cannot read device {address}: {e}");
                if !verbose {
                    continue;
                }
            }
            if tx.send(result).await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

/// Read the advertised properties BlueZ currently holds for a device.
async fn read_device(adapter: &Adapter, address: Address) -> Result<AdvertisementData, ReportError> {
    let device = adapter.device(address)?;
    let kind = AddressKind::from(device.address_type().await?);

    Ok(AdvertisementData {
        payload: Vec::new(),
        address: Some(DeviceAddress::new(address.into(), kind)),
        connectable: false,
        rssi: device.rssi().await?.map(f64::from),
        local_name: device.name().await?,
        tx_power: device
            .tx_power()
            .await?
            .and_then(|power| i8::try_from(power).ok()),
        manufacturer_data: device
            .manufacturer_data()
            .await?
            .and_then(|data| flatten_manufacturer_data(&data)),
        service_data: device
            .service_data()
            .await?
            .map(|data| data.into_iter().collect::<ServiceData>()),
        service_uuids: device.uuids().await?.map(|uuids| {
            let mut uuids: Vec<_> = uuids.into_iter().collect();
            uuids.sort();
            uuids
        }),
    })
}

/// Rebuild manufacturer data as it appears on air, company identifier first
/// in little-endian order. Apple data wins over other vendors, otherwise the
/// lowest company identifier does.
fn flatten_manufacturer_data(data: &HashMap<u16, Vec<u8>>) -> Option<Vec<u8>> {
    let (id, value) = data
        .get_key_value(&APPLE_COMPANY_ID)
        .or_else(|| data.iter().min_by_key(|(id, _)| **id))?;

    let mut bytes = Vec::with_capacity(2 + value.len());
    bytes.extend_from_slice(&id.to_le_bytes());
    bytes.extend_from_slice(value);
    Some(bytes)
}
