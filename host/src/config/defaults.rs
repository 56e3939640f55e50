//! All setting definitions with their default values.

use std::collections::HashMap;
use std::sync::LazyLock;

type DefTuple = (&'static str, &'static str, &'static str);

const DEFS: &[DefTuple] = &[
    ("GDS_NORMAL_TIMEOUT_MS", "3000", "Protocol default wait for a correlated report"),
    ("GDS_EXTENDED_TIMEOUT_MS", "20000", "Wait for self test and NVM checks"),
    ("GDS_LONG_TIMEOUT_MS", "30000", "Wait for reel initialisation, homing and light discovery"),
    ("GDS_MAX_REELS", "12", "Highest reel id considered when homing all reels"),
    ("GDS_CRC_SEED", "0xFFFF", "Seed for the firmware CRC check run on reset"),
    ("GDS_LOG_FILTER", "info", "Tracing filter used when RUST_LOG is not set"),
    ("GDS_PRINTER_MANUFACTURER", "FUTURELOGICinc", "Manufacturer string reported by the simulated printer"),
    ("GDS_PRINTER_MODEL", "GURFL,4.2.1,gen2", "Model string reported by the simulated printer"),
    ("GDS_REEL_COUNT", "5", "Number of reels on the simulated reel controller"),
];

/// A single setting definition.
#[derive(Debug, Clone)]
pub struct SettingDef {
    pub key: &'static str,
    pub default: &'static str,
    pub description: &'static str,
}

/// Global setting definitions indexed by key.
pub static DEFAULT_SETTINGS: LazyLock<HashMap<&'static str, SettingDef>> = LazyLock::new(|| {
    DEFS.iter()
        .map(|&(key, default, description)| {
            (
                key,
                SettingDef {
                    key,
                    default,
                    description,
                },
            )
        })
        .collect()
});

/// Get the default value for a setting key, or `None` if not defined.
pub fn get_default(key: &str) -> Option<&'static str> {
    DEFAULT_SETTINGS.get(key).map(|d| d.default)
}
