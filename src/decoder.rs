//! Field decoders for Apple Continuity TLV records.
//!
//! Each decoder turns the value bytes of one TLV into an ordered map of named
//! fields. Layouts follow the publicly reverse-engineered Continuity formats;
//! anything beyond the fixed prefix of a message is kept as raw bytes.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Zero-length record created by the `4c 00` company identifier.
pub const VENDOR_MARKER: u8 = 0x4C;
pub const AIRDROP: u8 = 0x05;
pub const PROXIMITY_PAIRING: u8 = 0x07;
pub const HEY_SIRI: u8 = 0x08;
pub const AIRPLAY_TARGET: u8 = 0x09;
pub const HANDOFF: u8 = 0x0C;
pub const TETHERING_SOURCE: u8 = 0x0E;
pub const NEARBY_ACTION: u8 = 0x0F;
pub const NEARBY_INFO: u8 = 0x10;
pub const FIND_MY: u8 = 0x12;

/// Nearby Info field holding the OS / Wi-Fi status code.
pub const DATA_FLAGS: &str = "dataFlags";

/// Error types for decoding a single TLV value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// No decoder is registered for this TLV type
    #[error("no decoder for TLV type {0:#04x}")]
    UnknownType(u8),
    /// The value is shorter than the fixed part of the message
    #[error("{name} value too short: need {needed} bytes, got {actual}")]
    TooShort {
        name: &'static str,
        needed: usize,
        actual: usize,
    },
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(u64),
    Flag(bool),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// The value as a single byte, if it is a number that fits or a one-byte sequence.
    pub fn as_u8(&self) -> Option<u8> {
        match self {
            FieldValue::Number(n) => u8::try_from(*n).ok(),
            FieldValue::Bytes(b) if b.len() == 1 => Some(b[0]),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Flag(b) => write!(f, "{b}"),
            FieldValue::Text(s) => write!(f, "{s}"),
            FieldValue::Bytes(bytes) => {
                let parts: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
                write!(f, "{}", parts.join(" "))
            }
            FieldValue::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(" "))
            }
        }
    }
}

/// Ordered field name → value map produced by a decoder.
pub type DecodedFields = BTreeMap<&'static str, FieldValue>;

/// Human-readable name of a TLV type, if it is a known Continuity message.
pub fn type_name(tlv_type: u8) -> Option<&'static str> {
    let name = match tlv_type {
        0x03 => "AirPrint",
        AIRDROP => "AirDrop",
        0x06 => "HomeKit",
        PROXIMITY_PAIRING => "Proximity Pairing",
        HEY_SIRI => "Hey Siri",
        AIRPLAY_TARGET => "AirPlay Target",
        0x0A => "AirPlay Source",
        0x0B => "Magic Switch",
        HANDOFF => "Handoff",
        0x0D => "Tethering Target",
        TETHERING_SOURCE => "Tethering Source",
        NEARBY_ACTION => "Nearby Action",
        NEARBY_INFO => "Nearby Info",
        FIND_MY => "Find My",
        VENDOR_MARKER => "Apple BLE",
        _ => return None,
    };
    Some(name)
}

/// Decode the value of a TLV record according to its type.
pub fn decode(tlv_type: u8, value: &[u8]) -> Result<DecodedFields, DecodeError> {
    match tlv_type {
        AIRDROP => decode_airdrop(value),
        PROXIMITY_PAIRING => decode_proximity_pairing(value),
        HEY_SIRI => decode_hey_siri(value),
        AIRPLAY_TARGET => decode_airplay_target(value),
        HANDOFF => decode_handoff(value),
        TETHERING_SOURCE => decode_tethering_source(value),
        NEARBY_ACTION => decode_nearby_action(value),
        NEARBY_INFO => decode_nearby_info(value),
        FIND_MY => decode_find_my(value),
        other => Err(DecodeError::UnknownType(other)),
    }
}

fn require(name: &'static str, value: &[u8], needed: usize) -> Result<(), DecodeError> {
    if value.len() < needed {
        return Err(DecodeError::TooShort {
            name,
            needed,
            actual: value.len(),
        });
    }
    Ok(())
}

fn number(byte: u8) -> FieldValue {
    FieldValue::Number(u64::from(byte))
}

fn bytes(slice: &[u8]) -> FieldValue {
    FieldValue::Bytes(slice.to_vec())
}

fn decode_airdrop(v: &[u8]) -> Result<DecodedFields, DecodeError> {
    require("AirDrop", v, 17)?;
    let mut fields = DecodedFields::new();
    fields.insert("version", number(v[8]));
    fields.insert("appleIdHash", bytes(&v[9..11]));
    fields.insert("phoneHash", bytes(&v[11..13]));
    fields.insert("emailHash", bytes(&v[13..15]));
    fields.insert("email2Hash", bytes(&v[15..17]));
    Ok(fields)
}

fn decode_proximity_pairing(v: &[u8]) -> Result<DecodedFields, DecodeError> {
    require("Proximity Pairing", v, 9)?;
    let mut fields = DecodedFields::new();
    fields.insert("deviceModel", bytes(&v[1..3]));
    fields.insert("status", number(v[3]));
    // Battery levels in tens of percent: right, left, case.
    fields.insert(
        "battery",
        FieldValue::List(vec![number(v[4] >> 4), number(v[4] & 0x0F), number(v[5] & 0x0F)]),
    );
    fields.insert("charging", number(v[5] >> 4));
    fields.insert("lidOpenCount", number(v[6]));
    fields.insert("color", number(v[7]));
    if v.len() > 9 {
        fields.insert("encrypted", bytes(&v[9..]));
    }
    Ok(fields)
}

fn decode_hey_siri(v: &[u8]) -> Result<DecodedFields, DecodeError> {
    require("Hey Siri", v, 7)?;
    let mut fields = DecodedFields::new();
    fields.insert("perceptualHash", bytes(&v[0..2]));
    fields.insert("snr", number(v[2]));
    fields.insert("confidence", number(v[3]));
    fields.insert("deviceClass", bytes(&v[4..6]));
    fields.insert("random", number(v[6]));
    Ok(fields)
}

fn decode_airplay_target(v: &[u8]) -> Result<DecodedFields, DecodeError> {
    require("AirPlay Target", v, 6)?;
    let mut fields = DecodedFields::new();
    fields.insert("flags", number(v[0]));
    fields.insert("seed", number(v[1]));
    let ip = Ipv4Addr::new(v[2], v[3], v[4], v[5]);
    fields.insert("ipAddress", FieldValue::Text(ip.to_string()));
    Ok(fields)
}

fn decode_handoff(v: &[u8]) -> Result<DecodedFields, DecodeError> {
    require("Handoff", v, 4)?;
    let mut fields = DecodedFields::new();
    fields.insert("clipboard", FieldValue::Flag(v[0] & 0x08 != 0));
    fields.insert(
        "sequenceNumber",
        FieldValue::Number(u64::from(u16::from_be_bytes([v[1], v[2]]))),
    );
    fields.insert("authTag", number(v[3]));
    if v.len() > 4 {
        fields.insert("encrypted", bytes(&v[4..]));
    }
    Ok(fields)
}

fn decode_tethering_source(v: &[u8]) -> Result<DecodedFields, DecodeError> {
    require("Tethering Source", v, 6)?;
    let mut fields = DecodedFields::new();
    fields.insert("version", number(v[0]));
    fields.insert("flags", number(v[1]));
    fields.insert("batteryLife", number(v[2]));
    fields.insert("cellServiceType", number(v[4]));
    fields.insert("cellBars", number(v[5]));
    Ok(fields)
}

fn nearby_action_name(action: u8) -> Option<&'static str> {
    let name = match action {
        0x01 => "Apple TV setup",
        0x04 => "Mobile backup",
        0x05 => "Watch setup",
        0x06 => "Apple TV pair",
        0x07 => "Internet relay",
        0x08 => "Wi-Fi password",
        0x09 => "iOS setup",
        0x0A => "Repair",
        0x0B => "Speaker setup",
        0x0C => "Apple Pay",
        0x0D => "Whole home audio setup",
        0x0E => "Developer tools pairing request",
        0x0F => "Answered call",
        0x10 => "Ended call",
        0x11 => "DD ping",
        0x12 => "DD pong",
        0x13 => "Remote auto fill",
        0x14 => "Companion link proximity",
        0x15 => "Remote management",
        0x16 => "Remote auto fill pong",
        0x17 => "Remote display",
        _ => return None,
    };
    Some(name)
}

fn decode_nearby_action(v: &[u8]) -> Result<DecodedFields, DecodeError> {
    require("Nearby Action", v, 5)?;
    let mut fields = DecodedFields::new();
    fields.insert("flags", number(v[0]));
    fields.insert("actionType", number(v[1]));
    if let Some(name) = nearby_action_name(v[1]) {
        fields.insert("action", FieldValue::Text(name.to_string()));
    }
    fields.insert("authTag", bytes(&v[2..5]));
    if v.len() > 5 {
        fields.insert("parameters", bytes(&v[5..]));
    }
    Ok(fields)
}

fn activity_name(code: u8) -> &'static str {
    match code {
        0x00 => "unknown",
        0x01 => "reporting disabled",
        0x03 => "idle",
        0x05 => "audio playing with screen off",
        0x07 => "screen on",
        0x09 => "video playing",
        0x0A => "watch on wrist",
        0x0B => "recent interaction",
        0x0D => "driving",
        0x0E => "call",
        _ => "other",
    }
}

fn status_flags(nibble: u8) -> FieldValue {
    let mut flags = Vec::new();
    for bit in 0..4 {
        let mask = 1u8 << bit;
        if nibble & mask == 0 {
            continue;
        }
        let name = match mask {
            0x01 => "primaryDevice".to_string(),
            0x04 => "airDropReceiving".to_string(),
            other => format!("flag{other:#x}"),
        };
        flags.push(FieldValue::Text(name));
    }
    FieldValue::List(flags)
}

fn decode_nearby_info(v: &[u8]) -> Result<DecodedFields, DecodeError> {
    require("Nearby Info", v, 2)?;
    let mut fields = DecodedFields::new();
    fields.insert("statusFlags", status_flags(v[0] >> 4));
    fields.insert("activityLevel", number(v[0] & 0x0F));
    fields.insert("activity", FieldValue::Text(activity_name(v[0] & 0x0F).to_string()));
    fields.insert(DATA_FLAGS, number(v[1]));
    if v.len() > 2 {
        fields.insert("authTag", bytes(&v[2..]));
    }
    Ok(fields)
}

fn decode_find_my(v: &[u8]) -> Result<DecodedFields, DecodeError> {
    require("Find My", v, 2)?;
    let mut fields = DecodedFields::new();
    fields.insert("status", number(v[0]));
    if v.len() >= 25 {
        fields.insert("publicKey", bytes(&v[1..23]));
        fields.insert("keyBits", number(v[23]));
        fields.insert("hint", number(v[24]));
    } else {
        // Nearby mode only carries the top bits of the key.
        fields.insert("keyBits", number(v[1]));
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_nearby_info() {
        let fields = decode(NEARBY_INFO, &[0x17, 0x1C, 0xAA, 0xBB, 0xCC]).unwrap();
        assert_eq!(fields.get(DATA_FLAGS), Some(&FieldValue::Number(0x1C)));
        assert_eq!(fields.get("activityLevel"), Some(&FieldValue::Number(7)));
        assert_eq!(
            fields.get("activity"),
            Some(&FieldValue::Text("screen on".to_string()))
        );
        assert_eq!(
            fields.get("statusFlags"),
            Some(&FieldValue::List(vec![FieldValue::Text("primaryDevice".into())]))
        );
        assert_eq!(
            fields.get("authTag"),
            Some(&FieldValue::Bytes(vec![0xAA, 0xBB, 0xCC]))
        );
    }

    #[test]
    fn test_decode_nearby_info_too_short() {
        assert_eq!(
            decode(NEARBY_INFO, &[0x01]),
            Err(DecodeError::TooShort {
                name: "Nearby Info",
                needed: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_decode_unknown_type() {
        assert_eq!(decode(0x42, &[1, 2]), Err(DecodeError::UnknownType(0x42)));
        assert_eq!(
            decode(VENDOR_MARKER, &[]),
            Err(DecodeError::UnknownType(VENDOR_MARKER))
        );
    }

    #[test]
    fn test_decode_handoff() {
        let fields = decode(HANDOFF, &[0x08, 0x01, 0x02, 0x7F, 0xDE, 0xAD]).unwrap();
        assert_eq!(fields.get("clipboard"), Some(&FieldValue::Flag(true)));
        assert_eq!(fields.get("sequenceNumber"), Some(&FieldValue::Number(258)));
        assert_eq!(fields.get("encrypted"), Some(&FieldValue::Bytes(vec![0xDE, 0xAD])));
    }

    #[test]
    fn test_decode_proximity_pairing_battery_list() {
        let value = [0x01, 0x20, 0x0E, 0x55, 0x98, 0x34, 0x02, 0x00, 0x05];
        let fields = decode(PROXIMITY_PAIRING, &value).unwrap();
        assert_eq!(
            fields.get("battery"),
            Some(&FieldValue::List(vec![
                FieldValue::Number(9),
                FieldValue::Number(8),
                FieldValue::Number(4)
            ]))
        );
        assert_eq!(fields.get("charging"), Some(&FieldValue::Number(3)));
        assert!(!fields.contains_key("encrypted"));
    }

    #[test]
    fn test_decode_airplay_target_ip() {
        let fields = decode(AIRPLAY_TARGET, &[0x03, 0x07, 192, 168, 1, 20]).unwrap();
        assert_eq!(
            fields.get("ipAddress"),
            Some(&FieldValue::Text("192.168.1.20".to_string()))
        );
    }

    #[test]
    fn test_decode_find_my_short_and_full() {
        let short = decode(FIND_MY, &[0x00, 0x02]).unwrap();
        assert_eq!(short.get("keyBits"), Some(&FieldValue::Number(2)));
        assert!(!short.contains_key("publicKey"));

        let mut full = vec![0x10];
        full.extend([0xAB; 22]);
        full.extend([0x01, 0x9C]);
        let fields = decode(FIND_MY, &full).unwrap();
        assert_eq!(fields.get("publicKey"), Some(&FieldValue::Bytes(vec![0xAB; 22])));
        assert_eq!(fields.get("hint"), Some(&FieldValue::Number(0x9C)));
    }

    #[test]
    fn test_decode_nearby_action_names_known_actions() {
        let fields = decode(NEARBY_ACTION, &[0x00, 0x08, 1, 2, 3, 9, 9]).unwrap();
        assert_eq!(
            fields.get("action"),
            Some(&FieldValue::Text("Wi-Fi password".to_string()))
        );
        assert_eq!(fields.get("parameters"), Some(&FieldValue::Bytes(vec![9, 9])));
    }

    #[test]
    fn test_field_value_display() {
        assert_eq!(FieldValue::Number(12).to_string(), "12");
        assert_eq!(FieldValue::Flag(false).to_string(), "false");
        assert_eq!(FieldValue::Bytes(vec![0x01, 0xAB]).to_string(), "01 ab");
        assert_eq!(
            FieldValue::List(vec![FieldValue::Number(1), FieldValue::Bytes(vec![2])]).to_string(),
            "[1 02]"
        );
    }

    #[test]
    fn test_field_value_as_u8() {
        assert_eq!(FieldValue::Number(0x1E).as_u8(), Some(0x1E));
        assert_eq!(FieldValue::Number(300).as_u8(), None);
        assert_eq!(FieldValue::Bytes(vec![0x04]).as_u8(), Some(0x04));
        assert_eq!(FieldValue::Text("x".into()).as_u8(), None);
    }

    #[test]
    fn test_type_name() {
        assert_eq!(type_name(NEARBY_INFO), Some("Nearby Info"));
        assert_eq!(type_name(VENDOR_MARKER), Some("Apple BLE"));
        assert_eq!(type_name(0x42), None);
    }
}
