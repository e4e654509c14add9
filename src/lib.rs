//! `continuity-listener` library.
//!
//! Aggregates BLE advertisements per device, merges repeats of identical
//! content, tracks liveness, and infers the OS family and Wi-Fi state of Apple
//! devices from the Continuity Nearby Info message.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. The run loop lives in [`crate::app`] where it can be
//! tested deterministically with an injected scanner + injected output streams.

pub mod advertisement;
pub mod alias;
pub mod app;
pub mod decoder;
pub mod device;
pub mod export;
pub mod fingerprint;
pub mod mac_address;
pub mod model;
pub mod output;
pub mod registry;
pub mod scanner;
pub mod throttle;
pub mod tlv;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::{Advertisement, AdvertisementData};
pub use alias::{Alias, AliasMap, parse_alias, to_map};
pub use device::{
    ACTIVE_WINDOW, AdvertisementUpdate, Device, DeviceError, DeviceSnapshot, Peripheral,
};
pub use fingerprint::{Fingerprint, OsVersion, infer};
pub use mac_address::{AddressKind, DeviceAddress, MacAddress};
pub use model::{DeviceModel, DeviceType, Manufacturer};
pub use output::{OutputFormatter, StatusLineFormatter};
pub use registry::DeviceRegistry;
pub use scanner::{Backend, Observation, ObservationResult, ReportError, ScanError};
pub use throttle::{Throttle, parse_duration};
pub use tlv::{Tlv, TlvPayload};
