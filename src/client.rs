//! Particle cloud gateway client.
//!
//! All device contact goes through the cloud: a function call is
//! `POST /v1/devices/{id}/{function}` with a form-encoded `arg`, and
//! liveness is `GET /v1/devices/{id}`. The one protocol quirk this
//! module encodes is that a *timeout* on a function call is not a
//! failure: a device that accepts a new configuration reboots
//! immediately and drops the connection mid-response, so the gateway
//! never sees the return value. [`CallResult::TimedOut`] is therefore a
//! distinct outcome the worker treats as a probable success.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Outcome of one remote function call.
///
/// Explicit tagging instead of error propagation: every network signal
/// the protocol cares about is a variant, and the worker branches on
/// all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallResult {
    /// The function ran and returned this value.
    Value(i64),
    /// The call timed out; for `updateConfig` this usually means the
    /// device accepted the change and is rebooting.
    TimedOut,
    /// The gateway reports the device as not connected.
    Offline,
    /// Hard transport failure (connection, TLS, non-2xx status).
    Failed(String),
}

/// Transport seam between the protocol logic and the gateway.
///
/// Workers and the orchestrator are written against this trait; the
/// production implementation is [`ParticleClient`], tests substitute
/// in-memory fakes.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Invoke a named cloud function on a device with one string argument.
    async fn call_function(&self, device_id: &str, function: &str, argument: &str) -> CallResult;

    /// Whether the device is currently connected. Any transport error
    /// is reported as offline, never raised.
    async fn is_online(&self, device_id: &str) -> bool;

    /// Poll [`is_online`](Self::is_online) every 5 s until the device
    /// reappears or `timeout_secs` elapses.
    async fn wait_for_online(&self, device_id: &str, timeout_secs: u64) -> bool {
        info!(device_id, "Waiting for device to come back online");
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
        loop {
            if self.is_online(device_id).await {
                info!(device_id, "Device is back online");
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    device_id,
                    timeout_secs, "Device did not come back online within timeout"
                );
                return false;
            }
            tokio::time::sleep(ONLINE_POLL_INTERVAL).await;
        }
    }
}

/// Creates one transport session per worker task.
///
/// Each worker owns its session outright; nothing mutable is shared
/// across devices.
pub trait SessionFactory: Send + Sync {
    type Transport: DeviceTransport + 'static;

    fn create_session(&self) -> Self::Transport;
}

/// Per-call timeout for cloud function invocations.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Shorter timeout for the lightweight connectivity query.
const ONLINE_CHECK_TIMEOUT: Duration = Duration::from_secs(10);
/// Gap between connectivity polls while waiting out a restart.
const ONLINE_POLL_INTERVAL: Duration = Duration::from_secs(5);

const DEFAULT_BASE_URL: &str = "https://api.particle.io/v1";

#[derive(Debug, Deserialize)]
struct FunctionResponse {
    #[serde(default)]
    connected: Option<bool>,
    #[serde(default)]
    return_value: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DeviceInfo {
    #[serde(default)]
    connected: bool,
}

/// HTTP client for the Particle cloud API.
#[derive(Clone)]
pub struct ParticleClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl ParticleClient {
    /// Build a client against the production Particle API.
    pub fn new(access_token: &str) -> Result<Self, reqwest::Error> {
        Self::with_base_url(access_token, DEFAULT_BASE_URL)
    }

    /// Build a client against an alternate gateway URL (tests, proxies).
    pub fn with_base_url(access_token: &str, base_url: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }
}

#[async_trait]
impl DeviceTransport for ParticleClient {
    async fn call_function(&self, device_id: &str, function: &str, argument: &str) -> CallResult {
        let url = format!("{}/devices/{}/{}", self.base_url, device_id, function);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .form(&[("arg", argument)])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                info!(
                    device_id,
                    function, "Call timed out - expected if the device is restarting"
                );
                return CallResult::TimedOut;
            }
            Err(e) => {
                warn!(device_id, function, error = %e, "Call failed");
                return CallResult::Failed(e.to_string());
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            warn!(device_id, function, %status, "Gateway returned error status");
            return CallResult::Failed(format!("Gateway returned status {status}"));
        }

        let body: FunctionResponse = match response.json().await {
            Ok(b) => b,
            Err(e) if e.is_timeout() => {
                // Connection dropped mid-body; same restart signal.
                info!(device_id, function, "Response read timed out");
                return CallResult::TimedOut;
            }
            Err(e) => return CallResult::Failed(format!("Malformed gateway response: {e}")),
        };

        if body.connected == Some(false) {
            warn!(device_id, "Device is offline");
            return CallResult::Offline;
        }

        match body.return_value {
            Some(value) => {
                debug!(device_id, function, value, "Function returned");
                CallResult::Value(value)
            }
            None => CallResult::Failed("Gateway response missing return_value".to_string()),
        }
    }

    async fn is_online(&self, device_id: &str) -> bool {
        let url = format!("{}/devices/{}", self.base_url, device_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .timeout(ONLINE_CHECK_TIMEOUT)
            .send()
            .await;

        match response {
            Ok(r) if r.status().is_success() => match r.json::<DeviceInfo>().await {
                Ok(info) => info.connected,
                Err(e) => {
                    warn!(device_id, error = %e, "Malformed device info response");
                    false
                }
            },
            Ok(r) => {
                warn!(device_id, status = %r.status(), "Device status query rejected");
                false
            }
            Err(e) => {
                warn!(device_id, error = %e, "Device status query failed");
                false
            }
        }
    }
}

/// Builds a fresh [`ParticleClient`] per worker, mirroring the
/// session-per-thread discipline the gateway API expects.
pub struct ParticleSessionFactory {
    access_token: String,
    base_url: String,
}

impl ParticleSessionFactory {
    pub fn new(access_token: &str) -> Self {
        Self {
            access_token: access_token.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(access_token: &str, base_url: &str) -> Self {
        Self {
            access_token: access_token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl SessionFactory for ParticleSessionFactory {
    type Transport = ParticleClient;

    fn create_session(&self) -> ParticleClient {
        // Client construction only fails on TLS backend misconfiguration;
        // fall back to a default-config client rather than propagating.
        ParticleClient::with_base_url(&self.access_token, &self.base_url).unwrap_or_else(|_| {
            ParticleClient {
                http: reqwest::Client::new(),
                base_url: self.base_url.clone(),
                access_token: self.access_token.clone(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn wait_for_online_polls_until_timeout() {
        struct NeverOnline;

        #[async_trait]
        impl DeviceTransport for NeverOnline {
            async fn call_function(&self, _: &str, _: &str, _: &str) -> CallResult {
                CallResult::Failed("not under test".to_string())
            }
            async fn is_online(&self, _: &str) -> bool {
                false
            }
        }

        let start = tokio::time::Instant::now();
        assert!(!NeverOnline.wait_for_online("dev", 120).await);
        assert!(start.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_online_returns_when_device_reappears() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct OnlineAfter {
            polls: AtomicU32,
        }

        #[async_trait]
        impl DeviceTransport for OnlineAfter {
            async fn call_function(&self, _: &str, _: &str, _: &str) -> CallResult {
                CallResult::Failed("not under test".to_string())
            }
            async fn is_online(&self, _: &str) -> bool {
                self.polls.fetch_add(1, Ordering::SeqCst) >= 3
            }
        }

        let transport = OnlineAfter {
            polls: AtomicU32::new(0),
        };
        assert!(transport.wait_for_online("dev", 120).await);
        assert_eq!(transport.polls.load(Ordering::SeqCst), 4);
    }
}
