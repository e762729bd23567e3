//! Centralized configuration for the handler bridge.
//!
//! Constants live on unit structs grouped by concern; `BridgeConfig` carries
//! the values a running bridge actually uses and can be built from the
//! environment.

use crate::{BridgeError, Result};
use std::net::SocketAddr;
use std::time::Duration;

/// Control-plane client defaults.
pub struct ControlConfig;

impl ControlConfig {
    /// Deadline for every request/reply control call.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
    /// Fixed pause between a failed session and the next connect attempt.
    pub const RECONNECT_DELAY: Duration = Duration::from_millis(500);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
    /// Upper bound on joining the session tasks during `stop()`.
    pub const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB
}

/// Invoke endpoint defaults.
pub struct InvokeConfig;

impl InvokeConfig {
    pub const DEFAULT_WORKERS: usize = 8;
    pub const NOT_FOUND_CODE: i32 = 1;
    pub const HANDLER_FAULT_CODE: i32 = 1;
}

/// Environment variable names and their fallbacks.
pub struct EnvConfig;

impl EnvConfig {
    pub const BIND_VAR: &'static str = "BRIDGE_BIND";
    pub const CONTROL_TARGET_VAR: &'static str = "CONTROL_TARGET";
    pub const DEFAULT_BIND: &'static str = "127.0.0.1:52055";
    pub const DEFAULT_CONTROL_TARGET: &'static str = "127.0.0.1:52070";
}

/// Runtime configuration for one bridge instance.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address the invoke endpoint binds to.
    pub bind: SocketAddr,
    /// `host:port` of the orchestrator's control service.
    pub control_target: String,
    /// Maximum number of handlers running at once.
    pub workers: usize,
    pub request_timeout: Duration,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 52055)),
            control_target: EnvConfig::DEFAULT_CONTROL_TARGET.to_string(),
            workers: InvokeConfig::DEFAULT_WORKERS,
            request_timeout: ControlConfig::REQUEST_TIMEOUT,
            reconnect_delay: ControlConfig::RECONNECT_DELAY,
            connect_timeout: ControlConfig::CONNECT_TIMEOUT,
        }
    }
}

impl BridgeConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `BRIDGE_BIND` and `CONTROL_TARGET`, falling back to defaults
    /// for unset or empty variables.
    pub fn from_env() -> Result<Self> {
        let bind = env_or(EnvConfig::BIND_VAR, EnvConfig::DEFAULT_BIND);
        let target = env_or(
            EnvConfig::CONTROL_TARGET_VAR,
            EnvConfig::DEFAULT_CONTROL_TARGET,
        );
        Self::new().with_bind_str(&bind)?.with_control_target(target).validated()
    }

    /// Set the bind address.
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    /// Parse and set the bind address.
    pub fn with_bind_str(mut self, bind: &str) -> Result<Self> {
        self.bind = bind.parse().map_err(|e| BridgeError::Config {
            message: format!("invalid bind address '{}': {}", bind, e),
        })?;
        Ok(self)
    }

    /// Set the control service target.
    pub fn with_control_target(mut self, target: impl Into<String>) -> Self {
        self.control_target = target.into();
        self
    }

    /// Set the worker pool size.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the request/reply deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the fixed reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Check invariants that the rest of the bridge relies on.
    pub fn validated(self) -> Result<Self> {
        if self.workers == 0 {
            return Err(BridgeError::Validation {
                field: "workers".to_string(),
                message: "worker pool needs at least one worker".to_string(),
            });
        }
        if self.control_target.trim().is_empty() {
            return Err(BridgeError::Validation {
                field: "control_target".to_string(),
                message: "control target must not be empty".to_string(),
            });
        }
        if self.reconnect_delay.is_zero() {
            return Err(BridgeError::Validation {
                field: "reconnect_delay".to_string(),
                message: "reconnect delay must be non-zero".to_string(),
            });
        }
        Ok(self)
    }
}

fn env_or(var: &str, fallback: &str) -> String {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => fallback.to_string(),
    }
}
