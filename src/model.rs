//! Vendor and device-model classification.

use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Expand a 16-bit SIG-assigned number onto the Bluetooth base UUID.
pub const fn uuid16(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb)
}

/// Device Information service.
pub const DEVICE_INFORMATION_SERVICE: Uuid = uuid16(0x180A);
/// Model Number String characteristic.
pub const MODEL_NUMBER_CHARACTERISTIC: Uuid = uuid16(0x2A24);

/// Company identifier reserved by the SIG for internal use. Beacons run by
/// this listener's own tooling advertise with it.
pub const INTERNAL_COMPANY_ID: u16 = 0xFFFF;

/// Vendor classification derived from the manufacturer data company identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Manufacturer {
    Apple,
    Microsoft,
    Samsung,
    Google,
    /// Same ecosystem as this listener.
    Internal,
    Other(u16),
    /// No manufacturer data was advertised.
    Unknown,
}

impl Manufacturer {
    pub fn from_company_id(id: u16) -> Self {
        match id {
            0x004C => Manufacturer::Apple,
            0x0006 => Manufacturer::Microsoft,
            0x0075 => Manufacturer::Samsung,
            0x00E0 => Manufacturer::Google,
            INTERNAL_COMPANY_ID => Manufacturer::Internal,
            other => Manufacturer::Other(other),
        }
    }

    /// Classify raw manufacturer data, whose first two bytes are the
    /// little-endian company identifier.
    pub fn from_manufacturer_data(data: Option<&[u8]>) -> Self {
        match data {
            Some([lo, hi, ..]) => Self::from_company_id(u16::from_le_bytes([*lo, *hi])),
            _ => Manufacturer::Unknown,
        }
    }
}

impl fmt::Display for Manufacturer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Manufacturer::Apple => write!(f, "Apple"),
            Manufacturer::Microsoft => write!(f, "Microsoft"),
            Manufacturer::Samsung => write!(f, "Samsung"),
            Manufacturer::Google => write!(f, "Google"),
            Manufacturer::Internal => write!(f, "Internal"),
            Manufacturer::Other(id) => write!(f, "{id:#06x}"),
            Manufacturer::Unknown => write!(f, "unknown"),
        }
    }
}

/// Coarse device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Phone,
    Tablet,
    Desktop,
    Watch,
    Headphones,
    Speaker,
    /// Same ecosystem as this listener.
    Internal,
    Other,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::Phone => "phone",
            DeviceType::Tablet => "tablet",
            DeviceType::Desktop => "desktop",
            DeviceType::Watch => "watch",
            DeviceType::Headphones => "headphones",
            DeviceType::Speaker => "speaker",
            DeviceType::Internal => "internal",
            DeviceType::Other => "other",
        };
        f.write_str(name)
    }
}

/// A device model, as read from the GATT Model Number characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceModel {
    pub model_name: String,
    pub device_type: DeviceType,
}

impl DeviceModel {
    pub fn new(model_name: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            model_name: model_name.into(),
            device_type,
        }
    }

    /// Classify a model number string such as `iPhone12,1` or `MacBookPro16,1`.
    pub fn from_model_number(model: &str) -> Self {
        let model = model.trim_end_matches('\0').trim();
        let device_type = if model.starts_with("iPhone") {
            DeviceType::Phone
        } else if model.starts_with("iPad") {
            DeviceType::Tablet
        } else if model.starts_with("Mac") || model.starts_with("iMac") {
            DeviceType::Desktop
        } else if model.starts_with("Watch") {
            DeviceType::Watch
        } else if model.starts_with("AirPods") {
            DeviceType::Headphones
        } else if model.starts_with("AudioAccessory") {
            DeviceType::Speaker
        } else {
            DeviceType::Other
        };
        Self::new(model, device_type)
    }

    /// Model forced onto devices advertising the internal company identifier.
    pub fn internal() -> Self {
        Self::new("Internal", DeviceType::Internal)
    }

    pub fn is_tablet(&self) -> bool {
        self.device_type == DeviceType::Tablet
    }

    pub fn is_desktop(&self) -> bool {
        self.device_type == DeviceType::Desktop || self.model_name.contains("Mac")
    }
}

/// A GATT characteristic value discovered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub value: Option<Vec<u8>>,
}

/// A GATT service discovered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    /// Device model announced by a Device Information service, if any.
    pub fn device_model(&self) -> Option<DeviceModel> {
        if self.uuid != DEVICE_INFORMATION_SERVICE {
            return None;
        }
        let value = self
            .characteristics
            .iter()
            .find(|c| c.uuid == MODEL_NUMBER_CHARACTERISTIC)?
            .value
            .as_deref()?;
        let model = std::str::from_utf8(value).ok()?;
        Some(DeviceModel::from_model_number(model))
    }
}

/// Services keyed by service UUID.
pub type ServiceMap = BTreeMap<Uuid, GattService>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::device_information;

    #[test]
    fn test_uuid16() {
        assert_eq!(
            DEVICE_INFORMATION_SERVICE.to_string(),
            "0000180a-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_manufacturer_from_data() {
        assert_eq!(
            Manufacturer::from_manufacturer_data(Some(&[0x4C, 0x00, 0x10][..])),
            Manufacturer::Apple
        );
        assert_eq!(
            Manufacturer::from_manufacturer_data(Some(&[0xFF, 0xFF][..])),
            Manufacturer::Internal
        );
        assert_eq!(
            Manufacturer::from_manufacturer_data(Some(&[0x99, 0x04, 0x05][..])),
            Manufacturer::Other(0x0499)
        );
        assert_eq!(
            Manufacturer::from_manufacturer_data(Some(&[0x4C][..])),
            Manufacturer::Unknown
        );
        assert_eq!(Manufacturer::from_manufacturer_data(None), Manufacturer::Unknown);
    }

    #[test]
    fn test_model_classification() {
        assert_eq!(DeviceModel::from_model_number("iPhone12,1").device_type, DeviceType::Phone);
        assert_eq!(DeviceModel::from_model_number("iPad8,1").device_type, DeviceType::Tablet);
        assert_eq!(
            DeviceModel::from_model_number("MacBookPro16,1").device_type,
            DeviceType::Desktop
        );
        assert_eq!(DeviceModel::from_model_number("Watch5,2").device_type, DeviceType::Watch);
        assert_eq!(DeviceModel::from_model_number("Pixel 4").device_type, DeviceType::Other);
    }

    #[test]
    fn test_desktop_by_model_name_substring() {
        let model = DeviceModel::new("VirtualMac2,1", DeviceType::Other);
        assert!(model.is_desktop());
        assert!(!model.is_tablet());
    }

    #[test]
    fn test_service_device_model() {
        let service = device_information("iPad8,1\0");
        let model = service.device_model().unwrap();
        assert_eq!(model.model_name, "iPad8,1");
        assert!(model.is_tablet());

        let other = GattService {
            uuid: uuid16(0x180F),
            characteristics: vec![],
        };
        assert!(other.device_model().is_none());
    }
}
