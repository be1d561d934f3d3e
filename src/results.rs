//! Run result types and the persisted JSON results document.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// The device's response to `updateConfig`, as recorded in results.
///
/// Serialized as the raw integer code, or the literal string
/// `"timeout"` when the call timed out (the historical artifact format
/// downstream tooling already parses).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Code(i64),
    Timeout,
}

impl Serialize for ResponseCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ResponseCode::Code(code) => serializer.serialize_i64(*code),
            ResponseCode::Timeout => serializer.serialize_str("timeout"),
        }
    }
}

impl<'de> Deserialize<'de> for ResponseCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(ResponseCode::Code)
                .ok_or_else(|| serde::de::Error::custom("response code out of range")),
            serde_json::Value::String(s) if s == "timeout" => Ok(ResponseCode::Timeout),
            other => Err(serde::de::Error::custom(format!(
                "unexpected response code: {other}"
            ))),
        }
    }
}

/// Terminal outcome for one device. Created exactly once, by the worker
/// that owned the device, and never revised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceResult {
    pub device_id: String,
    pub success: bool,
    pub attempts: u32,
    pub error: Option<String>,
    pub response_code: Option<ResponseCode>,
    /// System UID read back from the device, when a read-back happened.
    pub system_uid: Option<u32>,
    /// Sensor UID read back from the device.
    pub sensor_uid: Option<u32>,
    pub expected_system_uid: u32,
    pub expected_sensor_uid: u32,
    pub uid_verified: bool,
    pub timestamp: DateTime<Utc>,
}

/// Fleet-level rollup for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSummary {
    pub total_devices: usize,
    pub successful: usize,
    pub failed: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub concurrent_threads: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub expected_system_uid: u32,
    pub expected_sensor_uid: u32,
    pub config_json: String,
}

/// Complete result set for one fleet run.
///
/// Invariant: `summary.successful + summary.failed == summary.total_devices`,
/// and `device_results` holds exactly one entry per input device once
/// the run completes. A run that fails before any device contact (bad
/// configuration document) carries the run error in the summary and an
/// empty `device_results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetResult {
    pub summary: FleetSummary,
    pub device_results: Vec<DeviceResult>,
}

impl FleetResult {
    pub fn all_succeeded(&self) -> bool {
        self.summary.failed == 0
    }
}

/// Write the results document as pretty-printed JSON.
pub fn save_results(results: &FleetResult, path: &Path) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(results).map_err(std::io::Error::other)?;
    std::fs::write(path, json)?;
    info!(path = %path.display(), "Results saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_code_serializes_number_or_timeout() {
        assert_eq!(
            serde_json::to_string(&ResponseCode::Code(-3)).unwrap(),
            "-3"
        );
        assert_eq!(
            serde_json::to_string(&ResponseCode::Timeout).unwrap(),
            "\"timeout\""
        );
    }

    #[test]
    fn response_code_round_trips() {
        let code: ResponseCode = serde_json::from_str("1").unwrap();
        assert_eq!(code, ResponseCode::Code(1));
        let timeout: ResponseCode = serde_json::from_str("\"timeout\"").unwrap();
        assert_eq!(timeout, ResponseCode::Timeout);
        assert!(serde_json::from_str::<ResponseCode>("\"other\"").is_err());
    }

    #[test]
    fn results_document_shape() {
        let now = Utc::now();
        let results = FleetResult {
            summary: FleetSummary {
                total_devices: 1,
                successful: 1,
                failed: 0,
                start_time: now,
                end_time: now,
                concurrent_threads: 5,
                error: None,
                expected_system_uid: 0x012C_1A54,
                expected_sensor_uid: 0x0030_0010,
                config_json: "{}".to_string(),
            },
            device_results: vec![DeviceResult {
                device_id: "e00fce681234567890abcdef".to_string(),
                success: true,
                attempts: 1,
                error: None,
                response_code: Some(ResponseCode::Timeout),
                system_uid: Some(0x012C_1A54),
                sensor_uid: Some(0x0030_0010),
                expected_system_uid: 0x012C_1A54,
                expected_sensor_uid: 0x0030_0010,
                uid_verified: true,
                timestamp: now,
            }],
        };

        let value = serde_json::to_value(&results).unwrap();
        assert_eq!(value["summary"]["total_devices"], 1);
        assert_eq!(value["summary"]["concurrent_threads"], 5);
        assert!(value["summary"].get("error").is_none());
        assert_eq!(value["device_results"][0]["response_code"], "timeout");
        assert_eq!(value["device_results"][0]["uid_verified"], true);
    }

    #[test]
    fn save_results_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("update_results.json");
        let now = Utc::now();
        let results = FleetResult {
            summary: FleetSummary {
                total_devices: 0,
                successful: 0,
                failed: 0,
                start_time: now,
                end_time: now,
                concurrent_threads: 5,
                error: None,
                expected_system_uid: 0,
                expected_sensor_uid: 0,
                config_json: "{}".to_string(),
            },
            device_results: Vec::new(),
        };

        save_results(&results, &path).unwrap();
        let reloaded: FleetResult =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reloaded.summary.total_devices, 0);
    }
}
