//! Advertisement records.
//!
//! [`AdvertisementData`] is what a scanner backend hands over for one received
//! advertisement. [`Advertisement`] is the record a device keeps: the same
//! identity fields plus the RSSI samples and reception times accumulated
//! every time identical content is received again.

use crate::mac_address::DeviceAddress;
use crate::tlv::TlvPayload;
use std::collections::BTreeMap;
use std::time::SystemTime;
use uuid::Uuid;

/// Service data keyed by service UUID.
pub type ServiceData = BTreeMap<Uuid, Vec<u8>>;

/// One received advertisement, as reported by a scanner backend.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AdvertisementData {
    /// Raw advertising data, if the backend exposes it
    pub payload: Vec<u8>,
    /// Advertiser address and address kind
    pub address: Option<DeviceAddress>,
    /// Whether the advertisement was connectable
    pub connectable: bool,
    /// Received signal strength in dBm
    pub rssi: Option<f64>,
    /// Complete or shortened local name
    pub local_name: Option<String>,
    /// Advertised TX power level in dBm
    pub tx_power: Option<i8>,
    /// Manufacturer specific data, company identifier included
    pub manufacturer_data: Option<Vec<u8>>,
    pub service_data: Option<ServiceData>,
    pub service_uuids: Option<Vec<Uuid>>,
}

/// Fields that decide whether two advertisements carry the same content.
#[derive(Debug, PartialEq, Eq)]
pub struct ContentKey<'a> {
    pub manufacturer_data: Option<&'a [u8]>,
    pub service_data: Option<&'a ServiceData>,
    pub service_uuids: Option<&'a [Uuid]>,
}

/// An advertisement record kept by a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    payload: Vec<u8>,
    tlv: Option<TlvPayload>,
    rssi_samples: Vec<f64>,
    reception_times: Vec<SystemTime>,
    address: Option<DeviceAddress>,
    connectable: bool,
    local_name: Option<String>,
    tx_power: Option<i8>,
    manufacturer_data: Option<Vec<u8>>,
    service_data: Option<ServiceData>,
    service_uuids: Option<Vec<Uuid>>,
}

impl Advertisement {
    /// Build a record from scanner data, parsing Apple TLVs out of the
    /// manufacturer data. The record has no reception time until it is
    /// added to a device.
    pub fn new(data: AdvertisementData) -> Self {
        let tlv = data
            .manufacturer_data
            .as_deref()
            .and_then(TlvPayload::from_manufacturer_data);
        let payload = if data.payload.is_empty() {
            data.manufacturer_data.clone().unwrap_or_default()
        } else {
            data.payload
        };

        Self {
            payload,
            tlv,
            rssi_samples: data.rssi.into_iter().collect(),
            reception_times: Vec::new(),
            address: data.address,
            connectable: data.connectable,
            local_name: data.local_name,
            tx_power: data.tx_power,
            manufacturer_data: data.manufacturer_data,
            service_data: data.service_data,
            service_uuids: data.service_uuids,
        }
    }

    pub fn content_key(&self) -> ContentKey<'_> {
        ContentKey {
            manufacturer_data: self.manufacturer_data.as_deref(),
            service_data: self.service_data.as_ref(),
            service_uuids: self.service_uuids.as_deref(),
        }
    }

    /// Record one more reception of this content.
    pub(crate) fn record_reception(&mut self, time: SystemTime, rssi: Option<f64>) {
        self.reception_times.push(time);
        if let Some(rssi) = rssi {
            self.rssi_samples.push(rssi);
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn tlv(&self) -> Option<&TlvPayload> {
        self.tlv.as_ref()
    }

    pub fn rssi_samples(&self) -> &[f64] {
        &self.rssi_samples
    }

    /// Most recent signal strength reading.
    pub fn rssi(&self) -> Option<f64> {
        self.rssi_samples.last().copied()
    }

    pub fn reception_times(&self) -> &[SystemTime] {
        &self.reception_times
    }

    pub fn last_received(&self) -> Option<SystemTime> {
        self.reception_times.last().copied()
    }

    pub fn address(&self) -> Option<DeviceAddress> {
        self.address
    }

    pub fn connectable(&self) -> bool {
        self.connectable
    }

    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    pub fn tx_power(&self) -> Option<i8> {
        self.tx_power
    }

    pub fn manufacturer_data(&self) -> Option<&[u8]> {
        self.manufacturer_data.as_deref()
    }

    pub fn service_data(&self) -> Option<&ServiceData> {
        self.service_data.as_ref()
    }

    pub fn service_uuids(&self) -> Option<&[Uuid]> {
        self.service_uuids.as_deref()
    }
}

impl From<AdvertisementData> for Advertisement {
    fn from(data: AdvertisementData) -> Self {
        Self::new(data)
    }
}
