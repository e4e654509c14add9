//! OS / Wi-Fi fingerprinting from the Nearby Info data flags.
//!
//! Apple devices broadcast a Nearby Info message whose second byte changes
//! with the OS release and the Wi-Fi state. Two codes are shared between
//! families and need the device model to tell them apart: `0x1C` is sent by
//! both iOS 12 and macOS, `0x1E` by both iOS 13 and iPadOS 13.

use crate::model::DeviceModel;
use std::fmt;

/// Operating system family and release inferred from an advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsVersion {
    Ios10,
    Ios11,
    Ios12,
    Ios13,
    IpadOs13,
    MacOs,
    WatchOs,
}

impl OsVersion {
    pub fn label(&self) -> &'static str {
        match self {
            OsVersion::Ios10 => "iOS 10",
            OsVersion::Ios11 => "iOS 11",
            OsVersion::Ios12 => "iOS 12",
            OsVersion::Ios13 => "iOS 13",
            OsVersion::IpadOs13 => "iPadOS 13",
            OsVersion::MacOs => "macOS",
            OsVersion::WatchOs => "watchOS",
        }
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of a successful inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub os: OsVersion,
    pub wifi_on: bool,
}

impl Fingerprint {
    const fn new(os: OsVersion, wifi_on: bool) -> Self {
        Self { os, wifi_on }
    }
}

/// Every data-flags code the table knows about.
pub const KNOWN_CODES: [u8; 12] = [
    0x00, 0x04, 0x09, 0x0C, 0x0E, 0x10, 0x14, 0x18, 0x1A, 0x1C, 0x1E, 0x98,
];

/// Map a Nearby Info data-flags code to a fingerprint.
///
/// `model` is the device model already known from GATT, if any. Codes not in
/// the table return `None`, which callers treat as "leave the previous
/// fingerprint alone".
pub fn infer(code: u8, model: Option<&DeviceModel>) -> Option<Fingerprint> {
    let tablet = model.is_some_and(DeviceModel::is_tablet);
    let desktop = model.is_some_and(DeviceModel::is_desktop);

    let fingerprint = match code {
        0x00 => Fingerprint::new(OsVersion::Ios10, false),
        0x04 => Fingerprint::new(OsVersion::Ios13, true),
        0x09 => Fingerprint::new(OsVersion::MacOs, false),
        0x0C => Fingerprint::new(OsVersion::Ios12, true),
        0x0E => Fingerprint::new(OsVersion::Ios13, true),
        0x10 => Fingerprint::new(OsVersion::Ios11, false),
        0x14 => Fingerprint::new(OsVersion::MacOs, true),
        0x18 => Fingerprint::new(OsVersion::Ios12, false),
        0x1A => Fingerprint::new(OsVersion::Ios13, false),
        0x1C if desktop => Fingerprint::new(OsVersion::MacOs, true),
        0x1C => Fingerprint::new(OsVersion::Ios12, true),
        0x1E if tablet => Fingerprint::new(OsVersion::IpadOs13, true),
        0x1E => Fingerprint::new(OsVersion::Ios13, true),
        0x98 => Fingerprint::new(OsVersion::WatchOs, false),
        _ => return None,
    };
    Some(fingerprint)
}
