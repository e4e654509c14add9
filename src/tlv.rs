//! Type-length-value records carried in Apple manufacturer data.
//!
//! Apple packs several Continuity messages into a single manufacturer data
//! field: `[type][length][value…]` repeated. The company identifier in front
//! (`4c 00`) parses as a zero-length record of type `0x4c`, which is kept as
//! the vendor marker rather than stripped.

use std::fmt;
use thiserror::Error;

/// Apple company identifier, little-endian as it appears on air.
pub const APPLE_COMPANY_ID_BYTES: [u8; 2] = [0x4C, 0x00];

/// Errors returned when a byte sequence is not a well-formed TLV sequence.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TlvError {
    #[error("truncated TLV at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
}

/// One `(type, length, value)` record.
///
/// Records only come out of [`TlvPayload::parse`], so a value always fits
/// the one-byte length it was read with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    tlv_type: u8,
    value: Vec<u8>,
}

impl Tlv {
    fn new(tlv_type: u8, value: &[u8]) -> Self {
        debug_assert!(value.len() <= usize::from(u8::MAX));
        Self {
            tlv_type,
            value: value.to_vec(),
        }
    }

    pub fn tlv_type(&self) -> u8 {
        self.tlv_type
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Encoded length byte.
    pub fn len(&self) -> u8 {
        // Bounded by the length byte the value was parsed with.
        u8::try_from(self.value.len()).unwrap_or(u8::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl fmt::Display for Tlv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x} {:02x}", self.tlv_type, self.len())?;
        if !self.value.is_empty() {
            write!(f, " {}", hex::encode(&self.value))?;
        }
        Ok(())
    }
}

/// An ordered sequence of TLV records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TlvPayload {
    tlvs: Vec<Tlv>,
}

impl TlvPayload {
    /// Parse a complete TLV sequence. Trailing bytes that do not form a whole
    /// record make the entire payload invalid.
    pub fn parse(data: &[u8]) -> Result<Self, TlvError> {
        let mut tlvs = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            if offset + 2 > data.len() {
                return Err(TlvError::Truncated {
                    offset,
                    needed: 2,
                    available: data.len() - offset,
                });
            }

            let tlv_type = data[offset];
            let len = data[offset + 1] as usize;
            let start = offset + 2;
            if start + len > data.len() {
                return Err(TlvError::Truncated {
                    offset,
                    needed: len,
                    available: data.len() - start,
                });
            }

            tlvs.push(Tlv::new(tlv_type, &data[start..start + len]));
            offset = start + len;
        }

        Ok(Self { tlvs })
    }

    /// Parse manufacturer data only if it belongs to Apple.
    pub fn from_manufacturer_data(data: &[u8]) -> Option<Self> {
        if !data.starts_with(&APPLE_COMPANY_ID_BYTES) {
            return None;
        }
        match Self::parse(data) {
            Ok(payload) => Some(payload),
            Err(e) => {
                log::debug!("undecodable Apple manufacturer data {}: {e}", hex::encode(data));
                None
            }
        }
    }

    /// Value of the first record with the given type.
    pub fn value_of(&self, tlv_type: u8) -> Option<&[u8]> {
        self.tlvs
            .iter()
            .find(|tlv| tlv.tlv_type == tlv_type)
            .map(|tlv| tlv.value.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tlv> {
        self.tlvs.iter()
    }

    pub fn len(&self) -> usize {
        self.tlvs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tlvs.is_empty()
    }
}
