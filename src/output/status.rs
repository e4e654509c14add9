//! Status lines for device snapshots.
//!
//! `<id> key=value ... <unix millis>`, keys in alphabetical order. Text values
//! are quoted; unknown values are left out rather than printed as blanks.

use crate::device::DeviceSnapshot;
use crate::output::OutputFormatter;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Number(num) => write!(f, "{num}"),
            FieldValue::Bool(flag) => write!(f, "{flag}"),
            FieldValue::Text(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
        }
    }
}

/// One formatted status line.
#[derive(Debug)]
pub struct StatusLine {
    pub id: String,
    pub fields: BTreeMap<&'static str, FieldValue>,
    pub timestamp: SystemTime,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.id)?;
        for (key, value) in &self.fields {
            write!(fmt, " {key}={value}")?;
        }
        // Times before the epoch only come from a broken clock; print 0.
        let millis = self
            .timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        write!(fmt, " {millis}")
    }
}

/// Formats snapshots as status lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusLineFormatter;

impl StatusLineFormatter {
    pub fn new() -> Self {
        Self
    }

    /// Build the field set. Absent name, model, OS and Wi-Fi state are omitted.
    fn fields(snapshot: &DeviceSnapshot) -> BTreeMap<&'static str, FieldValue> {
        let mut fields = BTreeMap::new();
        fields.insert("active", FieldValue::Bool(snapshot.is_active));
        fields.insert(
            "ads",
            FieldValue::Number(snapshot.advertisement_count as f64),
        );
        fields.insert(
            "manufacturer",
            FieldValue::Text(snapshot.manufacturer.to_string()),
        );
        fields.insert("rssi", FieldValue::Number(snapshot.last_rssi));

        if let Some(name) = &snapshot.name {
            fields.insert("name", FieldValue::Text(name.clone()));
        }
        if let Some(model) = &snapshot.device_model {
            fields.insert("model", FieldValue::Text(model.model_name.clone()));
            fields.insert("type", FieldValue::Text(model.device_type.to_string()));
        }
        if let Some(os) = snapshot.os_version {
            fields.insert("os", FieldValue::Text(os.label().to_string()));
        }
        if let Some(wifi) = snapshot.wifi_on {
            fields.insert("wifi", FieldValue::Bool(wifi));
        }
        fields
    }
}

impl OutputFormatter for StatusLineFormatter {
    fn format(&self, snapshot: &DeviceSnapshot) -> String {
        StatusLine {
            id: snapshot.id.clone(),
            fields: Self::fields(snapshot),
            timestamp: snapshot.last_update_time,
        }
        .to_string()
    }
}
