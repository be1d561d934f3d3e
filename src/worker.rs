//! Per-device update worker.
//!
//! Runs the apply/restart/verify protocol against one device:
//!
//! ```text
//! CheckOnline -> ApplyConfig -> AwaitRestart -> AwaitOnline -> VerifyUid
//!      ^                                                          |
//!      +------------------ bounded retry loop --------------------+
//! ```
//!
//! The protocol has to live with an ambiguous transport signal: a
//! device that accepts the configuration reboots before finishing the
//! HTTP response, so the apply call times out. The worker treats that
//! timeout as "accepted, restarting" and relies on the UID read-back
//! after the reboot to establish ground truth, independent of anything
//! the gateway claimed.
//!
//! Every failure path lands in a [`DeviceResult`]; nothing escapes the
//! worker.

use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::client::{CallResult, DeviceTransport};
use crate::codec::ConfigUidPair;
use crate::config::UpdateSettings;
use crate::results::{DeviceResult, ResponseCode};

/// Cloud function that applies a configuration document.
const FN_UPDATE_CONFIG: &str = "updateConfig";
/// Cloud functions that report the active configuration UIDs.
const FN_GET_SYSTEM_CONFIG: &str = "getSystemConfig";
const FN_GET_SENSOR_CONFIG: &str = "getSensorConfig";

/// Wait after a hard transport failure before the next attempt.
const TRANSPORT_RETRY_WAIT: Duration = Duration::from_secs(10);
/// Standard wait between attempts after a retryable device error.
const INTER_ATTEMPT_WAIT: Duration = Duration::from_secs(15);
/// Gap between UID read-back retries.
const UID_RETRY_WAIT: Duration = Duration::from_secs(5);

/// Map an `updateConfig` return code to the firmware's documented
/// failure meaning.
fn update_error_message(code: i64) -> String {
    match code {
        -1 => "Failed to remove configuration from SD card".to_string(),
        -2 => "Invalid configuration format - Missing 'config' element".to_string(),
        -3 => "Invalid configuration format - Missing 'system' element".to_string(),
        -4 => "Invalid configuration format - Missing 'sensors' element".to_string(),
        -5 => "Failed to write test file to SD card".to_string(),
        -6 => "Failed to remove current configuration from SD card".to_string(),
        -7 => "Failed to write new configuration to SD card".to_string(),
        other => format!("Unknown error code: {other}"),
    }
}

/// Format-rejection codes: the document itself is structurally invalid,
/// so retrying the same document is pointless.
fn is_fatal_format_code(code: i64) -> bool {
    matches!(code, -2 | -3 | -4)
}

/// UIDs come back through the gateway as the firmware's signed 32-bit
/// return value widened to i64; recover the unsigned bit pattern.
fn uid_from_return(value: i64) -> u32 {
    value as u32
}

/// State machine for updating and verifying one device.
///
/// Owns its transport session outright; workers share nothing mutable.
pub struct DeviceUpdateWorker<T: DeviceTransport> {
    transport: T,
    settings: UpdateSettings,
    expected: ConfigUidPair,
    config_json: String,
    /// Fleet-wide progress ordinal, for log correlation only.
    progress: usize,
}

impl<T: DeviceTransport> DeviceUpdateWorker<T> {
    pub fn new(
        transport: T,
        settings: UpdateSettings,
        expected: ConfigUidPair,
        config_json: String,
        progress: usize,
    ) -> Self {
        Self {
            transport,
            settings,
            expected,
            config_json,
            progress,
        }
    }

    /// Run the full update protocol for one device.
    ///
    /// Always returns a result; the caller decides nothing about the
    /// device beyond scheduling.
    pub async fn run(self, device_id: &str) -> DeviceResult {
        let progress = self.progress;
        info!(progress, device_id, "Starting configuration update");

        let mut result = DeviceResult {
            device_id: device_id.to_string(),
            success: false,
            attempts: 0,
            error: None,
            response_code: None,
            system_uid: None,
            sensor_uid: None,
            expected_system_uid: self.expected.system,
            expected_sensor_uid: self.expected.sensor,
            uid_verified: false,
            timestamp: Utc::now(),
        };

        for attempt in 1..=self.settings.max_retries {
            result.attempts = attempt;
            info!(
                progress,
                device_id,
                attempt,
                max_retries = self.settings.max_retries,
                "Update attempt"
            );

            if !self.transport.is_online(device_id).await {
                warn!(progress, device_id, "Device is offline, skipping attempt");
                result.error = Some("Device offline".to_string());
                self.wait_before_retry(attempt, INTER_ATTEMPT_WAIT).await;
                continue;
            }

            let apply = self
                .transport
                .call_function(device_id, FN_UPDATE_CONFIG, &self.config_json)
                .await;

            match apply {
                CallResult::TimedOut => {
                    // Expected signature of a successful apply: the
                    // device rebooted before answering.
                    info!(
                        progress,
                        device_id, "Apply timed out - assuming device accepted and is restarting"
                    );
                    result.response_code = Some(ResponseCode::Timeout);
                    if self.confirm_after_restart(device_id, &mut result).await {
                        break;
                    }
                }
                CallResult::Value(1) => {
                    info!(
                        progress,
                        device_id, "Configuration accepted, device will restart"
                    );
                    result.response_code = Some(ResponseCode::Code(1));
                    if self.confirm_after_restart(device_id, &mut result).await {
                        break;
                    }
                }
                CallResult::Value(0) => {
                    // Configuration removed; no restart follows and no
                    // UID verification applies. Current UIDs are still
                    // read back for the report.
                    info!(progress, device_id, "Configuration removed");
                    result.response_code = Some(ResponseCode::Code(0));
                    result.success = true;
                    let (system_uid, sensor_uid) = self.read_uid_pair(device_id).await;
                    result.system_uid = system_uid;
                    result.sensor_uid = sensor_uid;
                    break;
                }
                CallResult::Value(code) => {
                    let message = update_error_message(code);
                    error!(progress, device_id, code, %message, "Device rejected configuration");
                    result.response_code = Some(ResponseCode::Code(code));
                    result.error = Some(message);

                    if is_fatal_format_code(code) {
                        error!(
                            progress,
                            device_id, code, "Configuration format error, not retrying"
                        );
                        break;
                    }
                    self.wait_before_retry(attempt, INTER_ATTEMPT_WAIT).await;
                }
                CallResult::Offline => {
                    warn!(progress, device_id, "Device went offline during apply");
                    result.error = Some("Failed to call updateConfig: Device offline".to_string());
                    self.wait_before_retry(attempt, TRANSPORT_RETRY_WAIT).await;
                }
                CallResult::Failed(message) => {
                    warn!(progress, device_id, %message, "Failed to call updateConfig");
                    result.error = Some(format!("Failed to call updateConfig: {message}"));
                    self.wait_before_retry(attempt, TRANSPORT_RETRY_WAIT).await;
                }
            }
        }

        if result.success {
            info!(
                progress,
                device_id,
                attempts = result.attempts,
                uid_verified = result.uid_verified,
                "Configuration update completed"
            );
        } else {
            error!(
                progress,
                device_id,
                attempts = result.attempts,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Configuration update failed"
            );
        }

        result.timestamp = Utc::now();
        result
    }

    /// Restart path: wait out the reboot, wait for the device to
    /// reappear, then verify the active UIDs against the expected pair.
    ///
    /// Returns true when the attempt succeeded; otherwise records the
    /// error in `result` and leaves the outer loop to retry.
    async fn confirm_after_restart(&self, device_id: &str, result: &mut DeviceResult) -> bool {
        info!(
            device_id,
            wait_secs = self.settings.restart_wait_secs,
            "Waiting for device restart"
        );
        tokio::time::sleep(Duration::from_secs(self.settings.restart_wait_secs)).await;

        if !self
            .transport
            .wait_for_online(device_id, self.settings.online_timeout_secs)
            .await
        {
            result.error = Some("Device did not come back online after restart".to_string());
            return false;
        }

        let (verified, system_uid, sensor_uid) = self.verify_uids(device_id).await;
        result.system_uid = system_uid;
        result.sensor_uid = sensor_uid;
        result.uid_verified = verified;

        if verified {
            result.success = true;
            true
        } else {
            result.error = Some("Configuration UID verification failed".to_string());
            warn!(device_id, "UID verification failed, will retry");
            false
        }
    }

    /// Read back both UIDs and compare against the expected pair,
    /// retrying on transport failure or mismatch.
    ///
    /// Returns the verification verdict and the last UIDs observed.
    async fn verify_uids(&self, device_id: &str) -> (bool, Option<u32>, Option<u32>) {
        let mut last_system = None;
        let mut last_sensor = None;

        for attempt in 1..=self.settings.uid_check_retries {
            match self.read_uid_pair_once(device_id).await {
                Some((system_uid, sensor_uid)) => {
                    last_system = Some(system_uid);
                    last_sensor = Some(sensor_uid);

                    if system_uid == self.expected.system && sensor_uid == self.expected.sensor {
                        info!(
                            device_id,
                            system_uid = format_args!("0x{system_uid:08X}"),
                            sensor_uid = format_args!("0x{sensor_uid:08X}"),
                            "Configuration UIDs verified"
                        );
                        return (true, last_system, last_sensor);
                    }
                    warn!(
                        device_id,
                        attempt,
                        system_uid = format_args!("0x{system_uid:08X}"),
                        expected_system = format_args!("0x{:08X}", self.expected.system),
                        sensor_uid = format_args!("0x{sensor_uid:08X}"),
                        expected_sensor = format_args!("0x{:08X}", self.expected.sensor),
                        "Configuration UID mismatch"
                    );
                }
                None => {
                    warn!(device_id, attempt, "Failed to read configuration UIDs");
                }
            }

            if attempt < self.settings.uid_check_retries {
                tokio::time::sleep(UID_RETRY_WAIT).await;
            }
        }

        (false, last_system, last_sensor)
    }

    /// Best-effort UID read for reporting, retrying transport failures.
    async fn read_uid_pair(&self, device_id: &str) -> (Option<u32>, Option<u32>) {
        for attempt in 1..=self.settings.uid_check_retries {
            if let Some((system_uid, sensor_uid)) = self.read_uid_pair_once(device_id).await {
                return (Some(system_uid), Some(sensor_uid));
            }
            if attempt < self.settings.uid_check_retries {
                tokio::time::sleep(UID_RETRY_WAIT).await;
            }
        }
        (None, None)
    }

    /// One read of both UID functions. Any non-value outcome on either
    /// call counts as a failed read.
    async fn read_uid_pair_once(&self, device_id: &str) -> Option<(u32, u32)> {
        let system = match self
            .transport
            .call_function(device_id, FN_GET_SYSTEM_CONFIG, "")
            .await
        {
            CallResult::Value(v) => uid_from_return(v),
            other => {
                warn!(device_id, outcome = ?other, "getSystemConfig did not return a value");
                return None;
            }
        };
        let sensor = match self
            .transport
            .call_function(device_id, FN_GET_SENSOR_CONFIG, "")
            .await
        {
            CallResult::Value(v) => uid_from_return(v),
            other => {
                warn!(device_id, outcome = ?other, "getSensorConfig did not return a value");
                return None;
            }
        };
        Some((system, sensor))
    }

    /// Inter-attempt wait, skipped after the final attempt.
    async fn wait_before_retry(&self, attempt: u32, wait: Duration) {
        if attempt < self.settings.max_retries {
            info!(wait_secs = wait.as_secs(), "Retrying after wait");
            tokio::time::sleep(wait).await;
        }
    }
}
