//! GDS mechanical reel controller.
//!
//! Tracks per-reel connectivity and faults, aggregates controller-level
//! faults, and fans reel commands out to the controller board.

mod controller;
pub mod faults;

// Re-exports for convenience
pub use controller::{DEFAULT_MAX_REELS, GdsReelController, ReelControllerEvent};
pub use faults::{ReelControllerFaults, ReelFaults};
