//! Registry of devices seen by the listener.
//!
//! Routes every observation to the device aggregate for its advertiser
//! address, creating it on first sight, and drives the liveness deadlines
//! and the optional time-to-live eviction of all devices it owns.

use crate::advertisement::Advertisement;
use crate::alias::AliasMap;
use crate::device::{Device, DeviceError};
use crate::scanner::Observation;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::time::{Duration, SystemTime};

/// Devices keyed by id, in id order.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, Device>,
    aliases: AliasMap,
    ttl: Option<Duration>,
}

impl DeviceRegistry {
    /// Create a registry. `aliases` name devices on creation; `ttl` drops
    /// devices not heard from for that long when [`Self::evict_stale`] runs.
    pub fn new(aliases: AliasMap, ttl: Option<Duration>) -> Self {
        Self {
            devices: BTreeMap::new(),
            aliases,
            ttl,
        }
    }

    /// Add an observation to its device, creating the device if needed.
    pub fn ingest(&mut self, observation: Observation) -> Result<&Device, DeviceError> {
        let address = observation
            .data
            .address
            .ok_or(DeviceError::MissingAddress)?;
        let advertisement = Advertisement::new(observation.data);

        match self.devices.entry(address.mac.to_string()) {
            Entry::Occupied(entry) => {
                let device = entry.into_mut();
                device.add(advertisement, observation.received_at);
                Ok(device)
            }
            Entry::Vacant(entry) => {
                let mut device = Device::from_advertisement(advertisement, observation.received_at)?;
                if let Some(name) = self.aliases.get(&address.mac) {
                    device.set_name(Some(name.clone()));
                }
                log::info!(
                    "discovered {} ({}, {})",
                    device.id(),
                    device.manufacturer(),
                    address.kind
                );
                Ok(entry.insert(device))
            }
        }
    }

    /// Fire every liveness deadline due at `now`. Returns the ids of devices
    /// that went inactive.
    pub fn expire(&mut self, now: SystemTime) -> Vec<String> {
        self.devices
            .values_mut()
            .filter_map(|device| device.expire(now).then(|| device.id().to_string()))
            .collect()
    }

    /// Remove devices whose last update is older than the configured TTL.
    /// Returns the removed ids; without a TTL nothing is ever removed.
    pub fn evict_stale(&mut self, now: SystemTime) -> Vec<String> {
        let Some(ttl) = self.ttl else {
            return Vec::new();
        };

        let stale: Vec<String> = self
            .devices
            .values()
            .filter(|device| {
                now.duration_since(device.last_update_time())
                    .is_ok_and(|age| age > ttl)
            })
            .map(|device| device.id().to_string())
            .collect();

        for id in &stale {
            self.devices.remove(id);
            log::info!("evicted {id}: not seen for more than {ttl:?}");
        }
        stale
    }

    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
