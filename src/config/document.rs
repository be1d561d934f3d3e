//! Typed configuration document matching the firmware's JSON schema.

use serde::{Deserialize, Serialize};

use super::inputs::InputError;

/// The `system` section: logging cadence, power profile, and Talon
/// carrier-board counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemConfig {
    #[serde(default)]
    pub log_period: u32,
    #[serde(default)]
    pub backhaul_count: u32,
    #[serde(default)]
    pub power_save_mode: u32,
    #[serde(default)]
    pub logging_mode: u32,
    #[serde(default)]
    pub num_aux_talons: u32,
    #[serde(default, rename = "numI2CTalons")]
    pub num_i2c_talons: u32,
    #[serde(default, rename = "numSDI12Talons")]
    pub num_sdi12_talons: u32,
}

/// The `sensors` section: per-type sensor counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorConfig {
    #[serde(default, rename = "numET")]
    pub num_et: u32,
    #[serde(default)]
    pub num_haar: u32,
    #[serde(default)]
    pub num_soil: u32,
    #[serde(default)]
    pub num_apogee_solar: u32,
    #[serde(default, rename = "numCO2")]
    pub num_co2: u32,
    #[serde(default, rename = "numO2")]
    pub num_o2: u32,
    #[serde(default)]
    pub num_pressure: u32,
}

/// Inner `config` object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigSections {
    pub system: SystemConfig,
    pub sensors: SensorConfig,
}

/// Root configuration document as sent to `updateConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub config: ConfigSections,
}

impl ConfigDocument {
    /// Parse and validate a configuration document from JSON text.
    ///
    /// The three structural elements are checked explicitly so the
    /// error names the missing one, matching what the firmware itself
    /// rejects with its format error codes.
    pub fn from_json_str(text: &str) -> Result<Self, InputError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| InputError::InvalidJson(e.to_string()))?;

        let config = value
            .get("config")
            .ok_or(InputError::MissingSection("config"))?;
        if config.get("system").is_none() {
            return Err(InputError::MissingSection("system"));
        }
        if config.get("sensors").is_none() {
            return Err(InputError::MissingSection("sensors"));
        }

        serde_json::from_value(value).map_err(|e| InputError::InvalidJson(e.to_string()))
    }

    /// Compact JSON string, the exact argument passed to the device's
    /// `updateConfig` function.
    pub fn to_compact_json(&self) -> String {
        // Serialization of a plain struct with integer fields cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Pretty JSON for logs and the dry-run report.
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_DOC: &str = r#"{
        "config": {
            "system": {
                "logPeriod": 300,
                "backhaulCount": 1,
                "powerSaveMode": 2,
                "loggingMode": 2,
                "numAuxTalons": 1,
                "numI2CTalons": 1,
                "numSDI12Talons": 1
            },
            "sensors": {
                "numET": 0,
                "numHaar": 1,
                "numSoil": 3,
                "numApogeeSolar": 0,
                "numCO2": 0,
                "numO2": 0,
                "numPressure": 1
            }
        }
    }"#;

    #[test]
    fn parses_full_document() {
        let doc = ConfigDocument::from_json_str(FULL_DOC).unwrap();
        assert_eq!(doc.config.system.log_period, 300);
        assert_eq!(doc.config.system.num_sdi12_talons, 1);
        assert_eq!(doc.config.sensors.num_soil, 3);
        assert_eq!(doc.config.sensors.num_pressure, 1);
    }

    #[test]
    fn missing_fields_default_to_zero() {
        let doc =
            ConfigDocument::from_json_str(r#"{"config":{"system":{},"sensors":{}}}"#).unwrap();
        assert_eq!(doc.config.system, SystemConfig::default());
        assert_eq!(doc.config.sensors, SensorConfig::default());
    }

    #[test]
    fn missing_sections_are_fatal() {
        let missing_config = ConfigDocument::from_json_str(r#"{"system":{}}"#);
        assert!(matches!(
            missing_config,
            Err(InputError::MissingSection("config"))
        ));

        let missing_system = ConfigDocument::from_json_str(r#"{"config":{"sensors":{}}}"#);
        assert!(matches!(
            missing_system,
            Err(InputError::MissingSection("system"))
        ));

        let missing_sensors = ConfigDocument::from_json_str(r#"{"config":{"system":{}}}"#);
        assert!(matches!(
            missing_sensors,
            Err(InputError::MissingSection("sensors"))
        ));
    }

    #[test]
    fn compact_json_uses_firmware_field_names() {
        let doc = ConfigDocument::from_json_str(FULL_DOC).unwrap();
        let json = doc.to_compact_json();
        assert!(json.contains("\"numI2CTalons\":1"));
        assert!(json.contains("\"numSDI12Talons\":1"));
        assert!(json.contains("\"numET\":0"));
        assert!(json.contains("\"numCO2\":0"));
        assert!(!json.contains('\n'));
    }

    #[test]
    fn compact_json_round_trips() {
        let doc = ConfigDocument::from_json_str(FULL_DOC).unwrap();
        let reparsed = ConfigDocument::from_json_str(&doc.to_compact_json()).unwrap();
        assert_eq!(reparsed, doc);
    }
}
