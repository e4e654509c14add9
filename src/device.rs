//! Per-device aggregation of advertisements.
//!
//! A [`Device`] collects every advertisement seen from one physical device,
//! merging repeated content into a single record, and keeps the best known
//! identity and OS fingerprint for it. All mutation goes through
//! [`Device::add`], [`Device::update_service`] and [`Device::expire`], so a
//! device has a single owner; other tasks follow it through
//! [`Device::subscribe_state`] and [`Device::subscribe_advertisements`].

use crate::advertisement::Advertisement;
use crate::decoder::{self, DATA_FLAGS, FieldValue, NEARBY_INFO};
use crate::export;
use crate::fingerprint::{self, OsVersion};
use crate::mac_address::{DeviceAddress, MacAddress};
use crate::model::{DeviceModel, GattService, Manufacturer, ServiceMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::{broadcast, watch};

/// How long a device counts as active after its latest advertisement.
pub const ACTIVE_WINDOW: Duration = Duration::from_secs(1);

/// RSSI reported before any reading has been received.
pub const UNKNOWN_RSSI: f64 = -100.0;

/// Buffered advertisement notifications per subscriber.
pub const ADVERTISEMENT_CHANNEL_CAPACITY: usize = 64;

/// Errors returned when creating a device.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// A device created without a transport handle needs the advertiser address as its id
    #[error("advertisement carries no device address")]
    MissingAddress,
}

/// Handle to a peripheral owned by a transport layer.
pub trait Peripheral: fmt::Debug + Send + Sync {
    /// Stable identifier assigned by the transport.
    fn identifier(&self) -> String;
    /// Name reported by the transport, if any.
    fn name(&self) -> Option<String>;
}

#[derive(Debug, Clone)]
enum Source {
    Peripheral(Arc<dyn Peripheral>),
    Advertisement,
}

/// Read-only view of a device, published after every mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub id: String,
    pub name: Option<String>,
    pub mac_address: Option<MacAddress>,
    pub manufacturer: Manufacturer,
    pub device_model: Option<DeviceModel>,
    pub last_rssi: f64,
    pub os_version: Option<OsVersion>,
    pub wifi_on: Option<bool>,
    pub is_active: bool,
    pub last_update_time: SystemTime,
    pub advertisement_count: usize,
}

/// Sent to advertisement subscribers once per [`Device::add`].
///
/// Carries the advertisement as received, with this reception only. The
/// accumulated record stays with the device at `index`.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvertisementUpdate {
    /// Position of the record in [`Device::advertisements`]
    pub index: usize,
    /// Whether the content matched an existing record
    pub merged: bool,
    pub advertisement: Advertisement,
}

/// Aggregate state of one advertising device.
#[derive(Debug)]
pub struct Device {
    id: String,
    source: Source,
    name: Option<String>,
    advertised_name: Option<String>,
    advertisements: Vec<Advertisement>,
    manufacturer: Manufacturer,
    device_model: Option<DeviceModel>,
    address: Option<DeviceAddress>,
    last_rssi: f64,
    rssi_history: Vec<(SystemTime, f64)>,
    os_version: Option<OsVersion>,
    wifi_on: Option<bool>,
    last_update_time: SystemTime,
    active: bool,
    /// The single pending liveness deadline. Re-arming replaces it.
    active_until: Option<SystemTime>,
    services: ServiceMap,
    advertisement_tx: broadcast::Sender<AdvertisementUpdate>,
    state_tx: watch::Sender<DeviceSnapshot>,
}

impl Device {
    /// Create a device discovered by a transport. The peripheral identifier
    /// becomes the device id.
    pub fn with_peripheral(
        peripheral: Arc<dyn Peripheral>,
        first: Advertisement,
        time: SystemTime,
    ) -> Self {
        let id = peripheral.identifier();
        Self::init(id, Source::Peripheral(peripheral), first, time)
    }

    /// Create a device from an advertisement alone. The advertiser MAC
    /// address becomes the device id, so the advertisement must carry one.
    pub fn from_advertisement(first: Advertisement, time: SystemTime) -> Result<Self, DeviceError> {
        let address = first.address().ok_or(DeviceError::MissingAddress)?;
        Ok(Self::init(
            address.mac.to_string(),
            Source::Advertisement,
            first,
            time,
        ))
    }

    fn init(id: String, source: Source, first: Advertisement, time: SystemTime) -> Self {
        let manufacturer = Manufacturer::from_manufacturer_data(first.manufacturer_data());
        let device_model = (manufacturer == Manufacturer::Internal).then(DeviceModel::internal);

        let (advertisement_tx, _) = broadcast::channel(ADVERTISEMENT_CHANNEL_CAPACITY);
        let (state_tx, _) = watch::channel(DeviceSnapshot {
            id: id.clone(),
            name: None,
            mac_address: None,
            manufacturer,
            device_model: device_model.clone(),
            last_rssi: UNKNOWN_RSSI,
            os_version: None,
            wifi_on: None,
            is_active: false,
            last_update_time: time,
            advertisement_count: 0,
        });

        let mut device = Self {
            id,
            source,
            name: None,
            advertised_name: None,
            advertisements: Vec::new(),
            manufacturer,
            device_model,
            address: None,
            last_rssi: UNKNOWN_RSSI,
            rssi_history: Vec::new(),
            os_version: None,
            wifi_on: None,
            last_update_time: time,
            active: false,
            active_until: None,
            services: ServiceMap::new(),
            advertisement_tx,
            state_tx,
        };
        device.add(first, time);
        device
    }

    /// Record an advertisement received at `time`.
    ///
    /// Identical content (manufacturer data, service data and service UUIDs)
    /// is merged into the first record holding it; new content is appended.
    /// Returns the merged or appended record.
    pub fn add(&mut self, advertisement: Advertisement, time: SystemTime) -> &Advertisement {
        let rssi = advertisement.rssi();

        if let Some(address) = advertisement.address() {
            self.address = Some(address);
        }
        if let Some(name) = advertisement.local_name() {
            self.advertised_name = Some(name.to_string());
        }

        self.infer_fingerprint(&advertisement);

        let mut received = advertisement;
        // The incoming RSSI is already its first sample.
        received.record_reception(time, None);
        let notification = (self.advertisement_tx.receiver_count() > 0).then(|| received.clone());

        let existing = self
            .advertisements
            .iter()
            .position(|stored| stored.content_key() == received.content_key());
        let merged = existing.is_some();

        let index = match existing {
            Some(index) => {
                self.advertisements[index].record_reception(time, rssi);
                log::trace!("{}: merged advertisement into record {index}", self.id);
                index
            }
            None => {
                self.advertisements.push(received);
                log::debug!(
                    "{}: new advertisement content, {} records",
                    self.id,
                    self.advertisements.len()
                );
                self.advertisements.len() - 1
            }
        };

        self.last_update_time = time;
        if let Some(rssi) = rssi {
            self.last_rssi = rssi;
            self.rssi_history.push((time, rssi));
        }
        self.active = true;
        self.active_until = Some(time + ACTIVE_WINDOW);

        if let Some(advertisement) = notification {
            // Every receiver may have gone away since the count was taken.
            let _ = self.advertisement_tx.send(AdvertisementUpdate {
                index,
                merged,
                advertisement,
            });
        }
        self.publish();

        &self.advertisements[index]
    }

    /// Clear the active flag if its deadline has passed at `now`.
    /// Returns `true` if the device went inactive.
    pub fn expire(&mut self, now: SystemTime) -> bool {
        match self.active_until {
            Some(deadline) if now >= deadline => {
                self.active = false;
                self.active_until = None;
                self.publish();
                true
            }
            _ => false,
        }
    }

    /// Store a GATT service discovered by the transport, replacing any
    /// previous service with the same UUID.
    pub fn update_service(&mut self, service: GattService) {
        self.apply_service(service);
        self.publish();
    }

    pub fn add_services(&mut self, services: impl IntoIterator<Item = GattService>) {
        for service in services {
            self.apply_service(service);
        }
        self.publish();
    }

    fn apply_service(&mut self, service: GattService) {
        if let Some(model) = service.device_model() {
            if self.manufacturer == Manufacturer::Internal {
                log::debug!("{}: ignoring model {} for internal device", self.id, model.model_name);
            } else {
                self.device_model = Some(model);
            }
        }
        self.services.insert(service.uuid, service);
    }

    /// Set a name that takes precedence over transport and advertised names.
    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
        self.publish();
    }

    fn infer_fingerprint(&mut self, advertisement: &Advertisement) {
        let Some(value) = advertisement
            .tlv()
            .and_then(|tlv| tlv.value_of(NEARBY_INFO))
        else {
            return;
        };

        let fields = match decoder::decode(NEARBY_INFO, value) {
            Ok(fields) => fields,
            Err(e) => {
                log::debug!("{}: skipping fingerprint: {e}", self.id);
                return;
            }
        };

        let Some(code) = fields.get(DATA_FLAGS).and_then(FieldValue::as_u8) else {
            return;
        };

        match fingerprint::infer(code, self.device_model.as_ref()) {
            Some(fingerprint) => {
                self.os_version = Some(fingerprint.os);
                self.wifi_on = Some(fingerprint.wifi_on);
            }
            None => log::trace!("{}: unrecognised nearby data flags {code:#04x}", self.id),
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.snapshot());
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            id: self.id.clone(),
            name: self.display_name(),
            mac_address: self.mac_address(),
            manufacturer: self.manufacturer,
            device_model: self.device_model.clone(),
            last_rssi: self.last_rssi,
            os_version: self.os_version,
            wifi_on: self.wifi_on,
            is_active: self.active,
            last_update_time: self.last_update_time,
            advertisement_count: self.advertisements.len(),
        }
    }

    /// Follow the published snapshot of this device.
    pub fn subscribe_state(&self) -> watch::Receiver<DeviceSnapshot> {
        self.state_tx.subscribe()
    }

    /// Receive one update per [`Device::add`], naming the merged or appended record.
    pub fn subscribe_advertisements(&self) -> broadcast::Receiver<AdvertisementUpdate> {
        self.advertisement_tx.subscribe()
    }

    /// Advertisement history as delimited text.
    pub fn to_delimited_text(&self) -> String {
        export::to_delimited_text(&self.advertisements)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Explicit name, else the transport name, else the latest advertised name.
    pub fn display_name(&self) -> Option<String> {
        self.name
            .clone()
            .or_else(|| match &self.source {
                Source::Peripheral(peripheral) => peripheral.name(),
                Source::Advertisement => None,
            })
            .or_else(|| self.advertised_name.clone())
    }

    pub fn advertisements(&self) -> &[Advertisement] {
        &self.advertisements
    }

    pub fn manufacturer(&self) -> Manufacturer {
        self.manufacturer
    }

    pub fn device_model(&self) -> Option<&DeviceModel> {
        self.device_model.as_ref()
    }

    pub fn address(&self) -> Option<DeviceAddress> {
        self.address
    }

    pub fn mac_address(&self) -> Option<MacAddress> {
        self.address.map(|address| address.mac)
    }

    pub fn last_rssi(&self) -> f64 {
        self.last_rssi
    }

    pub fn rssi_history(&self) -> &[(SystemTime, f64)] {
        &self.rssi_history
    }

    pub fn os_version(&self) -> Option<OsVersion> {
        self.os_version
    }

    pub fn wifi_on(&self) -> Option<bool> {
        self.wifi_on
    }

    pub fn last_update_time(&self) -> SystemTime {
        self.last_update_time
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// When the active flag will drop if nothing else arrives.
    pub fn active_until(&self) -> Option<SystemTime> {
        self.active_until
    }

    pub fn services(&self) -> &ServiceMap {
        &self.services
    }
}
