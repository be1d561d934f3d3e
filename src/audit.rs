//! Execution audit records.
//!
//! Every real (non-dry-run) fleet update leaves a human-readable
//! Markdown record under `logs/device-configuration/` and, when the
//! working directory is a git checkout, commits it so the repository
//! history doubles as the change log for fleet configuration pushes.
//!
//! Auditing is strictly best-effort: a failure to write or commit the
//! record is logged and swallowed, never failing a run that already
//! touched devices.

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::results::FleetResult;

/// Parameters echoed into the run record, as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct RunParameters {
    pub config_source: String,
    pub device_source: String,
    pub max_retries: u32,
    pub restart_wait_secs: u64,
    pub online_timeout_secs: u64,
    pub max_concurrent_devices: usize,
    pub note: Option<String>,
}

/// Writes Markdown run records and optionally commits them.
pub struct AuditLogger {
    logs_dir: PathBuf,
    repo_root: Option<PathBuf>,
}

impl AuditLogger {
    /// Create a logger rooted at the enclosing git repository, or the
    /// current directory when none is found.
    pub fn new() -> Self {
        let repo_root = find_git_root();
        let base = repo_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            logs_dir: base.join("logs").join("device-configuration"),
            repo_root,
        }
    }

    /// Write the run record and commit it when possible.
    ///
    /// Never returns an error; audit failures must not fail the run.
    pub fn record_run(&self, parameters: &RunParameters, results: &FleetResult) {
        let path = match self.write_record(parameters, results) {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Failed to write audit record");
                return;
            }
        };
        info!(path = %path.display(), "Audit record written");

        if let Some(repo_root) = &self.repo_root {
            match commit_record(repo_root, &path) {
                Ok(()) => info!("Audit record committed to repository"),
                Err(e) => warn!(error = %e, "Failed to commit audit record"),
            }
        } else {
            debug!("No git repository found, audit record left uncommitted");
        }
    }

    fn write_record(
        &self,
        parameters: &RunParameters,
        results: &FleetResult,
    ) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.logs_dir)?;
        let name = format!(
            "{}_update-configuration.md",
            Utc::now().format("%Y-%m-%d_%H%M%S")
        );
        let path = self.logs_dir.join(name);
        std::fs::write(&path, render_record(parameters, results))?;
        Ok(path)
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk up from the current directory looking for a `.git` entry.
fn find_git_root() -> Option<PathBuf> {
    let mut dir = std::env::current_dir().ok()?;
    loop {
        if dir.join(".git").exists() {
            return Some(dir);
        }
        if !dir.pop() {
            return None;
        }
    }
}

fn commit_record(repo_root: &Path, record: &Path) -> Result<(), String> {
    run_git(repo_root, &["add", &record.to_string_lossy()])?;
    let summary = format!(
        "Log device configuration update: {}",
        record
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    );
    run_git(repo_root, &["commit", "-m", &summary, "--no-verify"])?;
    Ok(())
}

fn run_git(repo_root: &Path, args: &[&str]) -> Result<(), String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()
        .map_err(|e| format!("git {}: {e}", args.join(" ")))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

fn render_record(parameters: &RunParameters, results: &FleetResult) -> String {
    let summary = &results.summary;
    let success_rate = if summary.total_devices > 0 {
        summary.successful as f64 / summary.total_devices as f64 * 100.0
    } else {
        0.0
    };

    let mut device_lines = String::new();
    for device in &results.device_results {
        if device.success {
            device_lines.push_str(&format!(
                "- ✅ `{}` - Success (System UID: {}, Sensor UID: {})\n",
                device.device_id,
                device
                    .system_uid
                    .map_or_else(|| "N/A".to_string(), |u| format!("0x{u:08X}")),
                device
                    .sensor_uid
                    .map_or_else(|| "N/A".to_string(), |u| format!("0x{u:08X}")),
            ));
        } else {
            device_lines.push_str(&format!(
                "- ❌ `{}` - Failed: {}\n",
                device.device_id,
                device.error.as_deref().unwrap_or("Unknown error"),
            ));
        }
    }

    format!(
        "# Device Configuration Update\n\n\
         **Operation**: Update configuration on {total} devices\n\
         **Start**: {start}\n\
         **End**: {end}\n\n\
         ## Parameters\n\n\
         - **Config source**: `{config_source}`\n\
         - **Device source**: `{device_source}`\n\
         - **Max retries**: {max_retries}\n\
         - **Restart wait**: {restart_wait} s\n\
         - **Online timeout**: {online_timeout} s\n\
         - **Max concurrent**: {max_concurrent}\n\
         - **Note**: {note}\n\n\
         ## Update Summary\n\n\
         - **Successful**: {successful}/{total} devices\n\
         - **Success Rate**: {success_rate:.1}%\n\
         - **Expected System UID**: 0x{system_uid:08X}\n\
         - **Expected Sensor UID**: 0x{sensor_uid:08X}\n\n\
         ## Device Results\n\n\
         {device_lines}\n\
         ## Configuration Applied\n\n\
         ```json\n{config_json}\n```\n",
        total = summary.total_devices,
        start = summary.start_time.to_rfc3339(),
        end = summary.end_time.to_rfc3339(),
        config_source = parameters.config_source,
        device_source = parameters.device_source,
        max_retries = parameters.max_retries,
        restart_wait = parameters.restart_wait_secs,
        online_timeout = parameters.online_timeout_secs,
        max_concurrent = parameters.max_concurrent_devices,
        note = parameters.note.as_deref().unwrap_or("-"),
        successful = summary.successful,
        success_rate = success_rate,
        system_uid = summary.expected_system_uid,
        sensor_uid = summary.expected_sensor_uid,
        device_lines = device_lines,
        config_json = summary.config_json,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{DeviceResult, FleetSummary, ResponseCode};

    fn sample_results() -> FleetResult {
        let now = Utc::now();
        FleetResult {
            summary: FleetSummary {
                total_devices: 2,
                successful: 1,
                failed: 1,
                start_time: now,
                end_time: now,
                concurrent_threads: 5,
                error: None,
                expected_system_uid: 0x012C_1A54,
                expected_sensor_uid: 0x0030_0000,
                config_json: "{\"config\":{}}".to_string(),
            },
            device_results: vec![
                DeviceResult {
                    device_id: "dev-ok".to_string(),
                    success: true,
                    attempts: 1,
                    error: None,
                    response_code: Some(ResponseCode::Timeout),
                    system_uid: Some(0x012C_1A54),
                    sensor_uid: Some(0x0030_0000),
                    expected_system_uid: 0x012C_1A54,
                    expected_sensor_uid: 0x0030_0000,
                    uid_verified: true,
                    timestamp: now,
                },
                DeviceResult {
                    device_id: "dev-bad".to_string(),
                    success: false,
                    attempts: 3,
                    error: Some("Device offline".to_string()),
                    response_code: None,
                    system_uid: None,
                    sensor_uid: None,
                    expected_system_uid: 0x012C_1A54,
                    expected_sensor_uid: 0x0030_0000,
                    uid_verified: false,
                    timestamp: now,
                },
            ],
        }
    }

    #[test]
    fn record_lists_parameters_and_devices() {
        let record = render_record(
            &RunParameters {
                config_source: "config.json".to_string(),
                device_source: "devices.txt".to_string(),
                max_retries: 3,
                restart_wait_secs: 30,
                online_timeout_secs: 120,
                max_concurrent_devices: 5,
                note: Some("spring deployment".to_string()),
            },
            &sample_results(),
        );

        assert!(record.contains("Update configuration on 2 devices"));
        assert!(record.contains("`dev-ok` - Success"));
        assert!(record.contains("`dev-bad` - Failed: Device offline"));
        assert!(record.contains("**Success Rate**: 50.0%"));
        assert!(record.contains("0x012C1A54"));
        assert!(record.contains("spring deployment"));
    }

    #[test]
    fn zero_device_run_renders_without_division() {
        let mut results = sample_results();
        results.summary.total_devices = 0;
        results.summary.successful = 0;
        results.summary.failed = 0;
        results.device_results.clear();

        let record = render_record(&RunParameters::default(), &results);
        assert!(record.contains("**Success Rate**: 0.0%"));
    }
}
