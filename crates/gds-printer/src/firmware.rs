//! Vendor firmware-string normalisation.
//!
//! Printers report their identity in vendor-specific shapes. The rules below
//! are checked in order and the first match wins; model substrings overlap
//! between vendors, so the order is significant.

use gds::DeviceConfiguration;

const TRANSACT: &str = "TransAct";
const NEXTGEN_MARKER: &str = "NEXTGEN PAYCHECK";
const NEXTGEN_MODEL: &str = "Paycheck NextGen";
const FUTURELOGIC_RAW: &str = "FUTURELOGICinc";
const FUTURELOGIC: &str = "FutureLogic";
const GEN2_MODEL: &str = "Gen2 Universal";
const GEN5_MODEL: &str = "Gen5 Universal";

/// Which rule produced a normalised configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    TransAct,
    NextGen,
    FutureLogic,
    Generic,
}

/// Map raw descriptor strings to a canonical identity.
///
/// Malformed FutureLogic strings are logged and returned unmodified.
pub fn normalize(config: DeviceConfiguration) -> (Vendor, DeviceConfiguration) {
    let comma_tokens: Vec<&str> = config.model.split(',').map(str::trim).collect();

    if config.manufacturer == TRANSACT && comma_tokens.len() > 3 {
        let normalized = DeviceConfiguration {
            model: comma_tokens[1].to_string(),
            firmware_id: comma_tokens[0].to_string(),
            firmware_revision: comma_tokens[2].to_string(),
            ..config.clone()
        };
        return (Vendor::TransAct, normalized);
    }

    if config.model.contains(NEXTGEN_MARKER) {
        let mut normalized = config.clone();
        if let Some(manufacturer) = config.manufacturer.split_whitespace().next() {
            normalized.manufacturer = manufacturer.to_string();
        }
        normalized.model = NEXTGEN_MODEL.to_string();
        let space_tokens: Vec<&str> = config.model.split(' ').collect();
        if space_tokens.len() >= 4 {
            normalized.firmware_id = space_tokens[3].to_string();
            normalized.firmware_revision = space_tokens[2].to_string();
        }
        return (Vendor::NextGen, normalized);
    }

    let lower_model = config.model.to_lowercase();
    let gen2 = lower_model.contains("gen2");
    let gen5 = lower_model.contains("gen5");
    if config.manufacturer == FUTURELOGIC_RAW || (comma_tokens.len() >= 3 && (gen2 || gen5)) {
        if comma_tokens.len() < 3 {
            tracing::warn!(
                manufacturer = %config.manufacturer,
                model = %config.model,
                "Malformed FutureLogic firmware string, leaving configuration unmodified"
            );
            return (Vendor::FutureLogic, config);
        }
        let model = if gen5 { GEN5_MODEL } else { GEN2_MODEL };
        let normalized = DeviceConfiguration {
            manufacturer: FUTURELOGIC.to_string(),
            model: model.to_string(),
            firmware_id: comma_tokens[1].to_string(),
            ..config.clone()
        };
        return (Vendor::FutureLogic, normalized);
    }

    (Vendor::Generic, config)
}
