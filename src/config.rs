//! Configuration for the pairing service.
//!
//! All values have working defaults; deployments override them through
//! environment variables (a `.env` file is honored via `dotenvy`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Pairing code issuance and expiry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingConfig {
    /// Number of digits in a pairing code.
    pub code_length: usize,
    /// Number of digits in a verification code.
    pub verification_length: usize,
    /// How long a pairing code stays valid (seconds).
    pub expiry_secs: u64,
    /// Wrong verification attempts allowed before the code is invalidated.
    pub max_attempts: u32,
    /// How often the background sweep removes expired entries (seconds).
    pub sweep_interval_secs: u64,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            code_length: 8,
            verification_length: 6,
            expiry_secs: 600, // 10 minutes
            max_attempts: 3,
            sweep_interval_secs: 60,
        }
    }
}

/// Reconnection policy for supervised transport connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Base delay for exponential backoff (milliseconds).
    pub base_delay_ms: u64,
    /// Backoff ceiling (milliseconds).
    pub max_delay_ms: u64,
    /// Maximum reconnect attempts per drop (0 = unlimited).
    pub max_attempts: u32,
    /// Upper bound on a single transport connect call (milliseconds).
    pub connect_timeout_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5_000,
            max_delay_ms: 300_000, // 5 minute ceiling
            max_attempts: 10,
            connect_timeout_ms: 30_000,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay for a reconnect attempt: `base * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
        Duration::from_millis(exp.min(self.max_delay_ms))
    }

    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub pairing: PairingConfig,
    pub reconnect: ReconnectConfig,
    /// Message sent on a freshly opened session. Send failures are logged,
    /// never fatal.
    pub welcome_message: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            pairing: PairingConfig::default(),
            reconnect: ReconnectConfig::default(),
            welcome_message: "Connected. Send /help to see available commands.".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the process environment, falling back to
    /// defaults for anything unset. Reads a `.env` file if present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = parse(&lookup, "PAIRGATE_CODE_LENGTH") {
            config.pairing.code_length = v;
        }
        if let Some(v) = parse(&lookup, "PAIRGATE_VERIFICATION_LENGTH") {
            config.pairing.verification_length = v;
        }
        if let Some(v) = parse(&lookup, "PAIRGATE_EXPIRY_SECS") {
            config.pairing.expiry_secs = v;
        }
        if let Some(v) = parse(&lookup, "PAIRGATE_MAX_ATTEMPTS") {
            config.pairing.max_attempts = v;
        }
        if let Some(v) = parse(&lookup, "PAIRGATE_SWEEP_INTERVAL_SECS") {
            config.pairing.sweep_interval_secs = v;
        }
        if let Some(v) = parse(&lookup, "PAIRGATE_RECONNECT_BASE_DELAY_MS") {
            config.reconnect.base_delay_ms = v;
        }
        if let Some(v) = parse(&lookup, "PAIRGATE_RECONNECT_MAX_DELAY_MS") {
            config.reconnect.max_delay_ms = v;
        }
        if let Some(v) = parse(&lookup, "PAIRGATE_RECONNECT_MAX_ATTEMPTS") {
            config.reconnect.max_attempts = v;
        }
        if let Some(v) = parse(&lookup, "PAIRGATE_CONNECT_TIMEOUT_MS") {
            config.reconnect.connect_timeout_ms = v;
        }
        if let Some(v) = lookup("PAIRGATE_WELCOME_MESSAGE") {
            config.welcome_message = v;
        }

        config
    }
}

fn parse<T: std::str::FromStr>(lookup: impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable configuration value");
            None
        }
    }
}
