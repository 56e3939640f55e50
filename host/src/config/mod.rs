//! Host configuration: defaults, validation, loading from the environment.

pub mod defaults;
pub mod validation;

use std::time::Duration;

use gds::{DeviceConfiguration, EngineOptions};

pub use defaults::{DEFAULT_SETTINGS, get_default};
pub use validation::validate_setting;

/// Runtime configuration of the headless host.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub normal_timeout: Duration,
    pub extended_timeout: Duration,
    pub long_timeout: Duration,
    pub max_reels: u8,
    pub crc_seed: u32,
    pub log_filter: String,
    pub printer_manufacturer: String,
    pub printer_model: String,
    pub reel_count: u8,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl HostConfig {
    /// Load from the process environment. Call after [`crate::load_dotenv`].
    pub fn load() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from `lookup`, falling back to the default for any key that is
    /// missing, empty or invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let g = |key: &str| setting(&lookup, key);

        Self {
            normal_timeout: Duration::from_millis(parse_u64(&g("GDS_NORMAL_TIMEOUT_MS"), 3000)),
            extended_timeout: Duration::from_millis(parse_u64(&g("GDS_EXTENDED_TIMEOUT_MS"), 20_000)),
            long_timeout: Duration::from_millis(parse_u64(&g("GDS_LONG_TIMEOUT_MS"), 30_000)),
            max_reels: parse_u8(&g("GDS_MAX_REELS"), 12),
            crc_seed: parse_u32(&g("GDS_CRC_SEED")).unwrap_or(0xffff),
            log_filter: g("GDS_LOG_FILTER"),
            printer_manufacturer: g("GDS_PRINTER_MANUFACTURER"),
            printer_model: g("GDS_PRINTER_MODEL"),
            reel_count: parse_u8(&g("GDS_REEL_COUNT"), 5),
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions::new()
            .with_normal_timeout(self.normal_timeout)
            .with_extended_timeout(self.extended_timeout)
            .with_long_timeout(self.long_timeout)
    }

    /// Descriptor strings the simulated printer reports on connect.
    pub fn printer_descriptor(&self) -> DeviceConfiguration {
        DeviceConfiguration {
            manufacturer: self.printer_manufacturer.clone(),
            model: self.printer_model.clone(),
            protocol: "GDS".into(),
            serial_number: "SIM-PRN-0001".into(),
            ..Default::default()
        }
    }

    /// Descriptor strings the simulated reel controller reports on connect.
    pub fn reel_descriptor(&self) -> DeviceConfiguration {
        DeviceConfiguration {
            manufacturer: "Simulated".into(),
            model: format!("Reel Controller x{}", self.reel_count),
            firmware_id: "RC-SIM".into(),
            firmware_revision: "1.0".into(),
            protocol: "GDS".into(),
            serial_number: "SIM-RC-0001".into(),
        }
    }
}

fn setting(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> String {
    let default = get_default(key).unwrap_or_default();
    let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) else {
        return default.to_string();
    };
    let value = value.trim().to_string();
    match validate_setting(key, &value) {
        Ok(()) => value,
        Err(e) => {
            tracing::warn!(key, value = %value, error = %e, default, "Invalid setting, using default");
            default.to_string()
        }
    }
}

fn parse_u64(s: &str, default: u64) -> u64 {
    s.parse().unwrap_or(default)
}

fn parse_u8(s: &str, default: u8) -> u8 {
    s.parse().unwrap_or(default)
}

/// Parse a decimal or `0x`-prefixed hexadecimal `u32`.
pub(crate) fn parse_u32(s: &str) -> Option<u32> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> HostConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        HostConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.normal_timeout, Duration::from_secs(3));
        assert_eq!(config.extended_timeout, Duration::from_secs(20));
        assert_eq!(config.long_timeout, Duration::from_secs(30));
        assert_eq!(config.max_reels, 12);
        assert_eq!(config.crc_seed, 0xffff);
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.reel_count, 5);
    }

    #[test]
    fn test_every_key_has_default() {
        for (key, def) in DEFAULT_SETTINGS.iter() {
            assert!(validate_setting(key, def.default).is_ok(), "{key}");
        }
    }

    #[test]
    fn test_overrides_and_invalid_fallback() {
        let config = from_pairs(&[
            ("GDS_NORMAL_TIMEOUT_MS", "250"),
            ("GDS_MAX_REELS", "99"),
            ("GDS_CRC_SEED", "0x1D0F"),
            ("GDS_PRINTER_MODEL", "  TransAct,Epic,1.0,x  "),
        ]);
        assert_eq!(config.normal_timeout, Duration::from_millis(250));
        assert_eq!(config.max_reels, 12);
        assert_eq!(config.crc_seed, 0x1d0f);
        assert_eq!(config.printer_model, "TransAct,Epic,1.0,x");
        assert_eq!(config.engine_options().normal_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_parse_u32() {
        assert_eq!(parse_u32("42"), Some(42));
        assert_eq!(parse_u32("0xff"), Some(255));
        assert_eq!(parse_u32("-1"), None);
    }
}
