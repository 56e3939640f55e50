//! Device identification strings.

use serde::{Deserialize, Serialize};

/// Manufacturer/model/firmware identification of a connected peripheral.
///
/// Filled once at connect time from the transport descriptor, optionally
/// normalised by a device's vendor heuristics, then read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    pub manufacturer: String,
    pub model: String,
    pub firmware_id: String,
    pub firmware_revision: String,
    pub protocol: String,
    pub serial_number: String,
}

impl DeviceConfiguration {
    /// Generic configuration handling: trims surrounding whitespace.
    pub fn normalized(mut self) -> Self {
        for field in [
            &mut self.manufacturer,
            &mut self.model,
            &mut self.firmware_id,
            &mut self.firmware_revision,
            &mut self.protocol,
            &mut self.serial_number,
        ] {
            let trimmed = field.trim();
            if trimmed.len() != field.len() {
                *field = trimmed.to_string();
            }
        }
        self
    }
}
