//! BLE scanner abstraction.
//!
//! This module dispatches over the Bluetooth scanning backends. Every backend
//! turns what it receives into [`Observation`]s and hands them over through an
//! `mpsc` channel; the advertising-data parsing shared by the backends lives
//! here.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::advertisement::{AdvertisementData, ServiceData};
use crate::model::uuid16;
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Problems with a single advertising report. The scan goes on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReportError {
    /// Report shorter than its headers claim
    #[error("Truncated report: {0}")]
    Truncated(String),
    /// AD structure whose length runs past the advertising data
    #[error("Malformed AD structure at offset {offset}: length {length}, {available} bytes left")]
    MalformedAdStructure {
        offset: usize,
        length: usize,
        available: usize,
    },
    /// Backend could not read a reported device
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
}

/// One advertisement received from the air, stamped on reception.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub data: AdvertisementData,
    pub received_at: SystemTime,
}

impl Observation {
    /// Stamp `data` with the current time.
    pub fn now(data: AdvertisementData) -> Self {
        Self {
            data,
            received_at: SystemTime::now(),
        }
    }
}

/// Convenience alias for observations or report errors.
pub type ObservationResult = Result<Observation, ReportError>;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Backend not available (not compiled in)
    #[allow(dead_code)]
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Channel buffer size for observation results.
pub const OBSERVATION_CHANNEL_BUFFER_SIZE: usize = 256;

// AD types
pub const AD_TYPE_INCOMPLETE_UUID16: u8 = 0x02;
pub const AD_TYPE_COMPLETE_UUID16: u8 = 0x03;
pub const AD_TYPE_INCOMPLETE_UUID128: u8 = 0x06;
pub const AD_TYPE_COMPLETE_UUID128: u8 = 0x07;
pub const AD_TYPE_SHORTENED_NAME: u8 = 0x08;
pub const AD_TYPE_COMPLETE_NAME: u8 = 0x09;
pub const AD_TYPE_TX_POWER: u8 = 0x0A;
pub const AD_TYPE_SERVICE_DATA_UUID16: u8 = 0x16;
pub const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
            #[cfg(not(any(feature = "bluer", feature = "hci")))]
            _ => unreachable!("Backend enum has no variants when no backend features are enabled"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "bluer")]
            "bluer" | "bluez" => Ok(Backend::Bluer),
            #[cfg(feature = "hci")]
            "hci" | "raw" => Ok(Backend::Hci),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Parse raw advertising data (a sequence of length-type-value AD structures)
/// into the fields a device keeps.
///
/// The returned data carries the raw bytes as its payload; address, RSSI and
/// connectability come from the report around it and are left for the caller.
/// A zero length byte ends the data early, as padding does in practice.
pub fn parse_ad_structures(ad_data: &[u8]) -> Result<AdvertisementData, ReportError> {
    let mut data = AdvertisementData {
        payload: ad_data.to_vec(),
        ..Default::default()
    };

    let mut offset = 0;
    while offset < ad_data.len() {
        let len = ad_data[offset] as usize;
        if len == 0 {
            break;
        }
        if offset + 1 + len > ad_data.len() {
            return Err(ReportError::MalformedAdStructure {
                offset,
                length: len,
                available: ad_data.len() - offset - 1,
            });
        }

        let ad_type = ad_data[offset + 1];
        let value = &ad_data[offset + 2..offset + 1 + len];

        match ad_type {
            AD_TYPE_MANUFACTURER_DATA if value.len() >= 2 => {
                data.manufacturer_data = Some(value.to_vec());
            }
            AD_TYPE_SERVICE_DATA_UUID16 if value.len() >= 2 => {
                let uuid = uuid16(u16::from_le_bytes([value[0], value[1]]));
                data.service_data
                    .get_or_insert_with(ServiceData::new)
                    .insert(uuid, value[2..].to_vec());
            }
            AD_TYPE_INCOMPLETE_UUID16 | AD_TYPE_COMPLETE_UUID16 => {
                let uuids = data.service_uuids.get_or_insert_with(Vec::new);
                uuids.extend(
                    value
                        .chunks_exact(2)
                        .map(|c| uuid16(u16::from_le_bytes([c[0], c[1]]))),
                );
            }
            AD_TYPE_INCOMPLETE_UUID128 | AD_TYPE_COMPLETE_UUID128 => {
                let uuids = data.service_uuids.get_or_insert_with(Vec::new);
                uuids.extend(value.chunks_exact(16).map(|c| {
                    let mut bytes = [0u8; 16];
                    bytes.copy_from_slice(c);
                    bytes.reverse();
                    Uuid::from_bytes(bytes)
                }));
            }
            AD_TYPE_COMPLETE_NAME => {
                data.local_name = Some(String::from_utf8_lossy(value).into_owned());
            }
            AD_TYPE_SHORTENED_NAME if data.local_name.is_none() => {
                data.local_name = Some(String::from_utf8_lossy(value).into_owned());
            }
            AD_TYPE_TX_POWER if value.len() == 1 => {
                data.tx_power = Some(value[0] as i8);
            }
            _ => {}
        }

        offset += 1 + len;
    }

    Ok(data)
}

/// Start scanning for advertisements using the specified backend.
///
/// # Arguments
/// * `backend` - The scanner backend to use
/// * `verbose` - If true, report errors are sent as Err values; otherwise they're only logged.
///
/// # Returns
/// A receiver for observations (or report errors if verbose).
pub async fn start_scan(
    backend: Backend,
    verbose: bool,
) -> Result<mpsc::Receiver<ObservationResult>, ScanError> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan(verbose).await,
        #[cfg(feature = "hci")]
        Backend::Hci => hci::start_scan(verbose).await,
    }
}
