//! Printer fault and warning bitmasks.

gds::fault_flags! {
    /// Conditions that stop the printer from producing tickets.
    pub struct PrinterFaultTypes: u16 {
        const TEMPERATURE_ERROR = 1 << 0;
        const PRINT_HEAD_DAMAGED = 1 << 1;
        const NVM_FAULT = 1 << 2;
        const FIRMWARE_FAULT = 1 << 3;
        const OTHER_FAULT = 1 << 4;
        const PAPER_JAM = 1 << 5;
        const PAPER_EMPTY = 1 << 6;
        const PAPER_NOT_TOP_OF_FORM = 1 << 7;
        const PRINT_HEAD_OPEN = 1 << 8;
        const CHASSIS_OPEN = 1 << 9;
    }
}

gds::fault_flags! {
    /// Conditions that should be serviced but do not halt printing.
    pub struct PrinterWarningTypes: u8 {
        const PAPER_LOW = 1 << 0;
        const PAPER_IN_CHUTE = 1 << 1;
    }
}
