//! Output formatters for device state.
//!
//! This module provides a trait for turning a [`DeviceSnapshot`] into one line
//! of output, and the status-line format the listener prints.

pub mod status;

use crate::device::DeviceSnapshot;

pub use status::StatusLineFormatter;

/// Trait for formatting device snapshots into output strings.
pub trait OutputFormatter: Send + Sync {
    /// Format a snapshot as a single line, without the trailing newline.
    fn format(&self, snapshot: &DeviceSnapshot) -> String;
}
