use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmcTargetConfig {
    pub endpoint: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub insecure_tls: bool,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl BmcTargetConfig {
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("BMC_ENDPOINT")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())?;
        let username = std::env::var("BMC_USERNAME").ok()?;
        let password = std::env::var("BMC_PASSWORD").ok()?;
        let insecure_tls = std::env::var("BMC_INSECURE_TLS")
            .ok()
            .map(|value| parse_flag(&value))
            .unwrap_or(false);
        let request_timeout_seconds = env_u64("BMC_REQUEST_TIMEOUT_SECONDS")
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECONDS);

        Some(Self {
            endpoint,
            username,
            password,
            insecure_tls,
            request_timeout_seconds,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl fmt::Debug for BmcTargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BmcTargetConfig")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("insecure_tls", &self.insecure_tls)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

fn default_request_timeout_seconds() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECONDS
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SlotResolutionMode {
    #[default]
    Lenient,
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SupervisionSettings {
    pub job_poll_interval_seconds: u64,
    pub job_log_segment: String,
    pub delete_terminal_jobs: bool,
    pub convergence_grace_seconds: u64,
    pub convergence_interval_seconds: u64,
    pub media_mount_attempts: u32,
    pub media_mount_interval_seconds: u64,
    pub reconnect_timeout_seconds: u64,
    pub reconnect_retry_seconds: u64,
    pub warm_up_seconds: u64,
    pub readiness_interval_seconds: u64,
    pub readiness_timeout_seconds: u64,
    pub liveness_path: String,
    pub slot_resolution: SlotResolutionMode,
}

impl Default for SupervisionSettings {
    fn default() -> Self {
        Self {
            job_poll_interval_seconds: 5,
            job_log_segment: "Log".to_string(),
            delete_terminal_jobs: false,
            convergence_grace_seconds: 5,
            convergence_interval_seconds: 5,
            media_mount_attempts: 20,
            media_mount_interval_seconds: 1,
            reconnect_timeout_seconds: 600,
            reconnect_retry_seconds: 30,
            warm_up_seconds: 45,
            readiness_interval_seconds: 10,
            readiness_timeout_seconds: 600,
            liveness_path: "/redfish/v1".to_string(),
            slot_resolution: SlotResolutionMode::Lenient,
        }
    }
}

impl SupervisionSettings {
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(value) = env_u64("BMC_JOB_POLL_INTERVAL_SECONDS") {
            self.job_poll_interval_seconds = value;
        }
        if let Some(value) = env_u64("BMC_CONVERGENCE_INTERVAL_SECONDS") {
            self.convergence_interval_seconds = value;
        }
        if let Some(value) = env_u64("BMC_RECONNECT_TIMEOUT_SECONDS") {
            self.reconnect_timeout_seconds = value;
        }
        if let Some(value) = env_u64("BMC_READINESS_TIMEOUT_SECONDS") {
            self.readiness_timeout_seconds = value;
        }
        if let Ok(value) = std::env::var("BMC_DELETE_TERMINAL_JOBS") {
            self.delete_terminal_jobs = parse_flag(&value);
        }
        if let Ok(value) = std::env::var("BMC_STRICT_SLOTS") {
            self.slot_resolution = if parse_flag(&value) {
                SlotResolutionMode::Strict
            } else {
                SlotResolutionMode::Lenient
            };
        }
        self
    }

    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_secs(self.job_poll_interval_seconds)
    }

    pub fn convergence_grace(&self) -> Duration {
        Duration::from_secs(self.convergence_grace_seconds)
    }

    pub fn convergence_interval(&self) -> Duration {
        Duration::from_secs(self.convergence_interval_seconds)
    }

    pub fn media_mount_interval(&self) -> Duration {
        Duration::from_secs(self.media_mount_interval_seconds)
    }

    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.reconnect_timeout_seconds)
    }

    pub fn reconnect_retry(&self) -> Duration {
        Duration::from_secs(self.reconnect_retry_seconds)
    }

    pub fn warm_up(&self) -> Duration {
        Duration::from_secs(self.warm_up_seconds)
    }

    pub fn readiness_interval(&self) -> Duration {
        Duration::from_secs(self.readiness_interval_seconds)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_seconds)
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
