//! Reel and reel-controller fault bitmasks.

gds::fault_flags! {
    /// Per-reel conditions. `DISCONNECTED` is driven by `ReelStatus`
    /// connectivity, the rest by failure reports.
    pub struct ReelFaults: u8 {
        const DISCONNECTED = 1 << 0;
        const REEL_STALL = 1 << 1;
        const REEL_TAMPER = 1 << 2;
        const LOW_VOLTAGE = 1 << 3;
        const FAILED_HOME = 1 << 4;
    }
}

gds::fault_flags! {
    /// Conditions of the controller board itself, not tied to a reel.
    pub struct ReelControllerFaults: u8 {
        const COMMUNICATION_ERROR = 1 << 0;
        const HARDWARE_ERROR = 1 << 1;
        const REQUEST_ERROR = 1 << 2;
        const FIRMWARE_FAULT = 1 << 3;
    }
}

impl ReelFaults {
    /// Faults cleared before re-homing a reel.
    pub const CLEARABLE: [Self; 3] = [Self::REEL_STALL, Self::REEL_TAMPER, Self::LOW_VOLTAGE];
}

impl ReelControllerFaults {
    /// Controller faults cleared before re-homing a reel.
    pub const CLEARABLE: [Self; 3] = [
        Self::REQUEST_ERROR,
        Self::COMMUNICATION_ERROR,
        Self::HARDWARE_ERROR,
    ];
}
