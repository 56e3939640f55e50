//! Headless host wiring a GDS printer and reel controller to in-memory
//! simulators.

pub mod config;
pub mod devices;
pub mod simulator;

pub use config::HostConfig;
pub use devices::Devices;

/// Load `.env` from the first candidate path that exists. Returns the path
/// that was loaded.
pub fn load_dotenv() -> Option<&'static str> {
    let candidates = [".env", "../.env"];
    candidates
        .into_iter()
        .find(|path| dotenvy::from_filename(path).is_ok())
}
