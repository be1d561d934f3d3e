//! Fleet orchestration: one worker per device under a bounded
//! concurrency cap, with per-device failure isolation and a single
//! aggregated result set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::client::SessionFactory;
use crate::codec::{encode_sensor_uid, encode_system_uid, ConfigUidPair};
use crate::config::{ConfigDocument, UpdateSettings};
use crate::results::{DeviceResult, FleetResult, FleetSummary};
use crate::worker::DeviceUpdateWorker;

/// Runs a full fleet update: encodes the expected UID pair once, fans
/// out one [`DeviceUpdateWorker`] per device under the concurrency cap,
/// and aggregates every terminal outcome.
///
/// Devices are mutually independent; no ordering is guaranteed between
/// them, and `device_results` reflects completion order.
pub struct FleetOrchestrator<F: SessionFactory> {
    sessions: F,
    settings: UpdateSettings,
}

impl<F: SessionFactory> FleetOrchestrator<F> {
    pub fn new(sessions: F, settings: UpdateSettings) -> Self {
        Self { sessions, settings }
    }

    /// Update every device in the list with the given configuration.
    ///
    /// Blocks until each device has produced exactly one
    /// [`DeviceResult`]; a worker that dies unexpectedly (a defect, not
    /// a protocol outcome) is converted to a failed result at this
    /// boundary and never disturbs its siblings.
    pub async fn run(&self, document: &ConfigDocument, device_ids: &[String]) -> FleetResult {
        let start_time = Utc::now();
        let expected = ConfigUidPair {
            system: encode_system_uid(&document.config.system),
            sensor: encode_sensor_uid(&document.config.sensors),
        };
        let config_json = document.to_compact_json();

        info!(
            devices = device_ids.len(),
            concurrency = self.settings.max_concurrent_devices,
            expected_system_uid = format_args!("0x{:08X}", expected.system),
            expected_sensor_uid = format_args!("0x{:08X}", expected.sensor),
            "Starting fleet configuration update"
        );

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_devices));
        let progress = Arc::new(AtomicUsize::new(0));
        let settings = self.settings;

        let mut tasks: JoinSet<DeviceResult> = JoinSet::new();
        let mut task_devices: HashMap<tokio::task::Id, String> = HashMap::new();

        for device_id in device_ids {
            let semaphore = Arc::clone(&semaphore);
            let progress = Arc::clone(&progress);
            let transport = self.sessions.create_session();
            let config_json = config_json.clone();
            let device_id = device_id.clone();
            let task_device = device_id.clone();

            let handle = tasks.spawn(async move {
                // Closed only when the JoinSet is dropped, which cannot
                // happen while this task runs.
                let _permit = semaphore.acquire().await;
                let ordinal = progress.fetch_add(1, Ordering::SeqCst) + 1;
                DeviceUpdateWorker::new(transport, settings, expected, config_json, ordinal)
                    .run(&device_id)
                    .await
            });
            task_devices.insert(handle.id(), task_device);
        }

        let total_devices = device_ids.len();
        let mut device_results = Vec::with_capacity(total_devices);
        let mut successful = 0usize;
        let mut failed = 0usize;

        while let Some(joined) = tasks.join_next_with_id().await {
            let result = match joined {
                Ok((_, result)) => result,
                Err(join_error) => {
                    // Worker defect: still produce exactly one result
                    // for the device and keep the run going.
                    let device_id = task_devices
                        .get(&join_error.id())
                        .cloned()
                        .unwrap_or_else(|| "unknown".to_string());
                    error!(
                        device_id = device_id.as_str(),
                        error = %join_error,
                        "Worker terminated unexpectedly"
                    );
                    DeviceResult {
                        device_id,
                        success: false,
                        attempts: 0,
                        error: Some(format!("Worker execution error: {join_error}")),
                        response_code: None,
                        system_uid: None,
                        sensor_uid: None,
                        expected_system_uid: expected.system,
                        expected_sensor_uid: expected.sensor,
                        uid_verified: false,
                        timestamp: Utc::now(),
                    }
                }
            };

            if result.success {
                successful += 1;
                info!(
                    completed = successful + failed,
                    total = total_devices,
                    device_id = result.device_id.as_str(),
                    "Device updated"
                );
            } else {
                failed += 1;
                error!(
                    completed = successful + failed,
                    total = total_devices,
                    device_id = result.device_id.as_str(),
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "Device failed"
                );
            }
            device_results.push(result);
        }

        let end_time = Utc::now();
        let duration = (end_time - start_time).num_seconds();
        info!(
            total = total_devices,
            successful,
            failed,
            duration_secs = duration,
            "Fleet configuration update complete"
        );

        FleetResult {
            summary: FleetSummary {
                total_devices,
                successful,
                failed,
                start_time,
                end_time,
                concurrent_threads: self.settings.max_concurrent_devices,
                error: None,
                expected_system_uid: expected.system,
                expected_sensor_uid: expected.sensor,
                config_json,
            },
            device_results,
        }
    }
}
