//! Link-layer addresses for advertising devices.
//!
//! A compact 6-byte MAC address plus the address kind reported alongside it,
//! decoupled from any specific Bluetooth library.

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use thiserror::Error;

/// A Bluetooth MAC address stored as a compact 6-byte array, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Build an address from HCI wire order (least significant byte first).
    pub fn from_le_bytes(bytes: [u8; 6]) -> Self {
        let mut be = bytes;
        be.reverse();
        Self(be)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Errors returned when parsing a MAC address string.
#[derive(Error, Debug, PartialEq)]
pub enum ParseMacError {
    #[error("invalid MAC address: expected 6 parts, got {0}")]
    InvalidLength(usize),
    #[error("invalid MAC address: part {0} has wrong length")]
    InvalidPartLength(usize),
    #[error("invalid MAC address: '{0}' is not valid hex")]
    InvalidHex(String),
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(ParseMacError::InvalidLength(parts.len()));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(ParseMacError::InvalidPartLength(i));
            }
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseMacError::InvalidHex(part.to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

/// Kind of link-layer address, as carried in the advertising report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    Public,
    Random,
    /// Any discriminator this listener does not know about.
    Other(u8),
}

impl From<u8> for AddressKind {
    fn from(raw: u8) -> Self {
        match raw {
            0x00 => AddressKind::Public,
            0x01 => AddressKind::Random,
            other => AddressKind::Other(other),
        }
    }
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressKind::Public => write!(f, "public"),
            AddressKind::Random => write!(f, "random"),
            AddressKind::Other(raw) => write!(f, "type-{raw:#04x}"),
        }
    }
}

/// Address of the advertiser together with its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    pub mac: MacAddress,
    pub kind: AddressKind,
}

impl DeviceAddress {
    pub fn new(mac: MacAddress, kind: AddressKind) -> Self {
        Self { mac, kind }
    }

    /// Address as laid out in an HCI advertising report: type discriminator
    /// plus little-endian address bytes. Returns `None` unless exactly six
    /// address bytes are given.
    pub fn from_hci(kind: u8, bytes: &[u8]) -> Option<Self> {
        let mac: [u8; 6] = bytes.try_into().ok()?;
        Some(Self::new(MacAddress::from_le_bytes(mac), AddressKind::from(kind)))
    }
}
