//! Configuration UID codec.
//!
//! The firmware identifies its active configuration by two bit-packed
//! 32-bit UIDs (one for the `system` section, one for `sensors`). We
//! compute the same UIDs locally from the configuration document and
//! compare them against what the device reports after a restart.
//!
//! Encoding is lossy by contract: each field is masked to its declared
//! bit width before packing, so a value wider than its field silently
//! wraps (e.g. `backhaul_count = 20` encodes and decodes as `4`). This
//! mirrors the firmware and is not an error condition.

use crate::config::{SensorConfig, SystemConfig};

/// Expected system/sensor UID pair for one fleet run.
///
/// Computed once at orchestrator start and shared read-only by all
/// device workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigUidPair {
    pub system: u32,
    pub sensor: u32,
}

/// Pack the `system` section into its UID.
///
/// Layout (most-significant field first): log_period 16 bits @ 16,
/// backhaul_count 4 @ 12, power_save_mode 2 @ 10, logging_mode 2 @ 8,
/// num_aux_talons 2 @ 6, num_i2c_talons 2 @ 4, num_sdi12_talons 2 @ 2.
/// Bits 0-1 are unused and always zero.
pub fn encode_system_uid(system: &SystemConfig) -> u32 {
    ((system.log_period & 0xFFFF) << 16)
        | ((system.backhaul_count & 0xF) << 12)
        | ((system.power_save_mode & 0x3) << 10)
        | ((system.logging_mode & 0x3) << 8)
        | ((system.num_aux_talons & 0x3) << 6)
        | ((system.num_i2c_talons & 0x3) << 4)
        | ((system.num_sdi12_talons & 0x3) << 2)
}

/// Pack the `sensors` section into its UID.
///
/// Seven 4-bit counts at offsets 28, 24, 20, 16, 12, 8, 4. Bits 0-3
/// are unused and always zero.
pub fn encode_sensor_uid(sensors: &SensorConfig) -> u32 {
    ((sensors.num_et & 0xF) << 28)
        | ((sensors.num_haar & 0xF) << 24)
        | ((sensors.num_soil & 0xF) << 20)
        | ((sensors.num_apogee_solar & 0xF) << 16)
        | ((sensors.num_co2 & 0xF) << 12)
        | ((sensors.num_o2 & 0xF) << 8)
        | ((sensors.num_pressure & 0xF) << 4)
}

/// Unpack a system UID back into its fields.
pub fn decode_system_uid(uid: u32) -> SystemConfig {
    SystemConfig {
        log_period: (uid >> 16) & 0xFFFF,
        backhaul_count: (uid >> 12) & 0xF,
        power_save_mode: (uid >> 10) & 0x3,
        logging_mode: (uid >> 8) & 0x3,
        num_aux_talons: (uid >> 6) & 0x3,
        num_i2c_talons: (uid >> 4) & 0x3,
        num_sdi12_talons: (uid >> 2) & 0x3,
    }
}

/// Unpack a sensor UID back into its counts.
pub fn decode_sensor_uid(uid: u32) -> SensorConfig {
    SensorConfig {
        num_et: (uid >> 28) & 0xF,
        num_haar: (uid >> 24) & 0xF,
        num_soil: (uid >> 20) & 0xF,
        num_apogee_solar: (uid >> 16) & 0xF,
        num_co2: (uid >> 12) & 0xF,
        num_o2: (uid >> 8) & 0xF,
        num_pressure: (uid >> 4) & 0xF,
    }
}

/// Parse a UID from a CLI argument, accepting decimal or `0x` hex.
pub fn parse_uid(s: &str) -> Result<u32, String> {
    let parsed = if let Some(hex) = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
    {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|_| {
        format!("Invalid UID format: {s}. Use decimal or hexadecimal (0x prefix)")
    })
}

/// Human-readable breakdown of a system UID.
pub fn format_system_uid(uid: u32) -> String {
    let c = decode_system_uid(uid);
    [
        format!("System Configuration UID: 0x{uid:08X} ({uid})"),
        "=".repeat(50),
        format!("Log Period:           {}", c.log_period),
        format!("Backhaul Count:       {}", c.backhaul_count),
        format!("Power Save Mode:      {}", c.power_save_mode),
        format!("Logging Mode:         {}", c.logging_mode),
        format!("Num Aux Talons:       {}", c.num_aux_talons),
        format!("Num I2C Talons:       {}", c.num_i2c_talons),
        format!("Num SDI12 Talons:     {}", c.num_sdi12_talons),
    ]
    .join("\n")
}

/// Human-readable breakdown of a sensor UID.
pub fn format_sensor_uid(uid: u32) -> String {
    let c = decode_sensor_uid(uid);
    [
        format!("Sensor Configuration UID: 0x{uid:08X} ({uid})"),
        "=".repeat(50),
        format!("Num ET Sensors:       {}", c.num_et),
        format!("Num Haar Sensors:     {}", c.num_haar),
        format!("Num Soil Sensors:     {}", c.num_soil),
        format!("Num Apogee Solar:     {}", c.num_apogee_solar),
        format!("Num CO2 Sensors:      {}", c.num_co2),
        format!("Num O2 Sensors:       {}", c.num_o2),
        format!("Num Pressure Sensors: {}", c.num_pressure),
    ]
    .join("\n")
}
