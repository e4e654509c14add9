//! Delimited-text export of advertisement histories.
//!
//! One line per record: `manufacturer data;tlvs;description`. Raw bytes are
//! hex encoded, so the only `;` and `,` characters in a line are delimiters.

use crate::advertisement::Advertisement;
use crate::decoder::{self, DecodeError, FieldValue, VENDOR_MARKER};
use crate::tlv::Tlv;

pub const HEADER: &str = "manufacturerData;tlv;description";

/// Column value for absent or undecodable data.
pub const NO_DATA: &str = "no data";
/// Description of a TLV type without a decoder.
pub const UNKNOWN_TYPE: &str = "unknown type";
/// Description of the `4c 00` vendor marker.
pub const VENDOR_MARKER_LABEL: &str = "Apple BLE";

const COLUMN_SEPARATOR: char = ';';
const ITEM_SEPARATOR: &str = ", ";

/// Render a full advertisement history, header first.
pub fn to_delimited_text(advertisements: &[Advertisement]) -> String {
    let mut text = String::with_capacity(64 * (advertisements.len() + 1));
    text.push_str(HEADER);
    text.push('\n');
    for advertisement in advertisements {
        text.push_str(&format_row(advertisement));
        text.push('\n');
    }
    text
}

/// Render one advertisement record as a single line, without the newline.
pub fn format_row(advertisement: &Advertisement) -> String {
    let manufacturer = advertisement
        .manufacturer_data()
        .map(hex::encode)
        .unwrap_or_else(|| NO_DATA.to_string());

    let (tlvs, description) = match advertisement.tlv() {
        Some(payload) if !payload.is_empty() => {
            let tlvs: Vec<String> = payload.iter().map(ToString::to_string).collect();
            let descriptions: Vec<String> = payload.iter().map(describe_tlv).collect();
            (tlvs.join(ITEM_SEPARATOR), descriptions.join(ITEM_SEPARATOR))
        }
        _ => (NO_DATA.to_string(), NO_DATA.to_string()),
    };

    format!("{manufacturer}{COLUMN_SEPARATOR}{tlvs}{COLUMN_SEPARATOR}{description}")
}

/// Human description of one TLV. Decode failures stay local to the TLV.
pub fn describe_tlv(tlv: &Tlv) -> String {
    if tlv.tlv_type() == VENDOR_MARKER {
        return VENDOR_MARKER_LABEL.to_string();
    }

    let name = decoder::type_name(tlv.tlv_type())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:#04x}", tlv.tlv_type()));

    match decoder::decode(tlv.tlv_type(), tlv.value()) {
        Ok(fields) if fields.is_empty() => format!("{name}: {NO_DATA}"),
        Ok(fields) => {
            let rendered: Vec<String> = fields
                .iter()
                .map(|(key, value)| format!("{key}={}", render_value(value)))
                .collect();
            format!("{name}: {}", rendered.join(" "))
        }
        Err(DecodeError::UnknownType(_)) => format!("{name}: {UNKNOWN_TYPE}"),
        Err(e) => {
            log::debug!("cannot describe TLV {:#04x}: {e}", tlv.tlv_type());
            format!("{name}: {NO_DATA}")
        }
    }
}

fn render_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(text) if needs_escape(text) => format!("0x{}", hex::encode(text)),
        FieldValue::List(items) => {
            let rendered: Vec<String> = items.iter().map(render_value).collect();
            format!("[{}]", rendered.join(" "))
        }
        other => other.to_string(),
    }
}

fn needs_escape(text: &str) -> bool {
    text.contains([COLUMN_SEPARATOR, ',', '\n', '\r'])
}
