use crate::advertisement::AdvertisementData;
use crate::mac_address::{AddressKind, DeviceAddress, MacAddress};
use crate::model::{
    DEVICE_INFORMATION_SERVICE, GattCharacteristic, GattService, MODEL_NUMBER_CHARACTERISTIC,
};
use std::time::{Duration, SystemTime};

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// A fixed point in time, `secs` seconds after the epoch.
pub fn t(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

/// Apple manufacturer data with a single Nearby Info record carrying `code`
/// as its data flags (screen on, primary device).
pub fn nearby_info(code: u8) -> Vec<u8> {
    vec![0x4C, 0x00, 0x10, 0x05, 0x17, code, 0xAA, 0xBB, 0xCC]
}

/// Advertisement from [`TEST_MAC`] carrying a Nearby Info record.
pub fn apple_advertisement(code: u8, rssi: Option<f64>) -> AdvertisementData {
    AdvertisementData {
        address: Some(DeviceAddress::new(TEST_MAC, AddressKind::Random)),
        manufacturer_data: Some(nearby_info(code)),
        rssi,
        ..Default::default()
    }
}

/// Device Information service announcing `model`.
pub fn device_information(model: &str) -> GattService {
    GattService {
        uuid: DEVICE_INFORMATION_SERVICE,
        characteristics: vec![GattCharacteristic {
            uuid: MODEL_NUMBER_CHARACTERISTIC,
            value: Some(model.as_bytes().to_vec()),
        }],
    }
}
