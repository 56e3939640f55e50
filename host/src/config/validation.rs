//! Setting value validation.

use tracing_subscriber::EnvFilter;

use super::parse_u32;

/// Validate a setting value. Returns `Ok(())` if valid, or an error message.
pub fn validate_setting(key: &str, value: &str) -> Result<(), String> {
    match key {
        "GDS_NORMAL_TIMEOUT_MS" => validate_int_range(value, 10, 60_000)?,
        "GDS_EXTENDED_TIMEOUT_MS" | "GDS_LONG_TIMEOUT_MS" => validate_int_range(value, 10, 600_000)?,
        "GDS_MAX_REELS" | "GDS_REEL_COUNT" => validate_int_range(value, 1, 32)?,
        "GDS_CRC_SEED" => {
            parse_u32(value).ok_or("must be a decimal or 0x-prefixed hex u32")?;
        }
        "GDS_LOG_FILTER" => {
            EnvFilter::try_new(value).map_err(|e| format!("invalid filter: {e}"))?;
        }
        "GDS_PRINTER_MANUFACTURER" | "GDS_PRINTER_MODEL" => {
            if value.is_empty() || value.len() > 64 {
                return Err("must be 1-64 characters".into());
            }
        }
        _ => {}
    }
    Ok(())
}

fn validate_int_range(value: &str, min: u64, max: u64) -> Result<(), String> {
    let v: u64 = value.parse().map_err(|_| "must be an integer")?;
    if v < min || v > max {
        return Err(format!("must be between {min} and {max}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts() {
        assert!(validate_setting("GDS_NORMAL_TIMEOUT_MS", "3000").is_ok());
        assert!(validate_setting("GDS_NORMAL_TIMEOUT_MS", "0").is_err());
        assert!(validate_setting("GDS_LONG_TIMEOUT_MS", "abc").is_err());
    }

    #[test]
    fn test_reel_counts() {
        assert!(validate_setting("GDS_MAX_REELS", "12").is_ok());
        assert!(validate_setting("GDS_REEL_COUNT", "33").is_err());
    }

    #[test]
    fn test_crc_seed() {
        assert!(validate_setting("GDS_CRC_SEED", "0xFFFF").is_ok());
        assert!(validate_setting("GDS_CRC_SEED", "1234").is_ok());
        assert!(validate_setting("GDS_CRC_SEED", "0xZZ").is_err());
    }

    #[test]
    fn test_strings() {
        assert!(validate_setting("GDS_LOG_FILTER", "info,gds=trace").is_ok());
        assert!(validate_setting("GDS_PRINTER_MODEL", "").is_err());
        assert!(validate_setting("UNKNOWN_KEY", "anything").is_ok());
    }
}
