//! Configuration document model and fleet-input parsing.
//!
//! The configuration travels to devices as a compact JSON string and is
//! validated once at load time: a document missing its `config`,
//! `system`, or `sensors` element fails the whole run before any device
//! is contacted. Individual leaf fields are optional and default to 0,
//! matching the zero bits an absent field contributes to the UID.

mod document;
mod inputs;

pub use document::{ConfigDocument, ConfigSections, SensorConfig, SystemConfig};
pub use inputs::{parse_config_input, parse_device_input, InputError};

/// Tunable knobs for one update run.
///
/// Defaults match the values the firmware team has been running with;
/// all of them are overridable from the CLI.
#[derive(Debug, Clone, Copy)]
pub struct UpdateSettings {
    /// Outer retry attempts per device.
    pub max_retries: u32,
    /// Seconds to wait for a device to reboot before polling.
    pub restart_wait_secs: u64,
    /// Seconds to wait for a device to come back online.
    pub online_timeout_secs: u64,
    /// Read-back attempts during UID verification.
    pub uid_check_retries: u32,
    /// Maximum devices processed simultaneously.
    pub max_concurrent_devices: usize,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            restart_wait_secs: 30,
            online_timeout_secs: 120,
            uid_check_retries: 5,
            max_concurrent_devices: 5,
        }
    }
}
