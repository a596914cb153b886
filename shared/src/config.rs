//! Session configuration and the context handed to every component.

use crate::error::ConfigError;
use crate::protocol::MAX_ROSTER_SIZE;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Network impairment applied by the transport beneath the core.
///
/// These are debugging knobs; the lockstep core never reads them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpairmentConfig {
    /// Fixed delay added to every outgoing frame
    pub delay_ms: u64,
    /// Random extra delay in `0..=jitter_ms`
    pub jitter_ms: u64,
    /// Chance that a frame is "lost" and has to be retransmitted, which on a
    /// reliable stream shows up as one more delay period
    pub drop_percent: u8,
    /// Chance that a frame is written twice
    pub duplication_percent: u8,
}

impl ImpairmentConfig {
    pub fn is_enabled(&self) -> bool {
        self.delay_ms > 0
            || self.jitter_ms > 0
            || self.drop_percent > 0
            || self.duplication_percent > 0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.drop_percent > 100 {
            return Err(ConfigError::InvalidPercentage {
                name: "drop_percent",
                value: self.drop_percent,
            });
        }
        if self.duplication_percent > 100 {
            return Err(ConfigError::InvalidPercentage {
                name: "duplication_percent",
                value: self.duplication_percent,
            });
        }
        Ok(())
    }
}

/// Session-level settings, fixed before the session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub server_port: u16,
    pub tick_rate: u16,
    pub forced_latency_ticks: u32,
    pub max_connections: u16,
    pub max_ticks_per_frame: u32,
    /// Start with fewer peers than `max_connections` once this much time has
    /// passed since the first connection
    pub lobby_timeout: Option<Duration>,
    pub impairment: ImpairmentConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_port: 8080,
            tick_rate: 30,
            forced_latency_ticks: 4,
            max_connections: 2,
            max_ticks_per_frame: 10,
            lobby_timeout: None,
            impairment: ImpairmentConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Checks every field the core depends on.
    ///
    /// A forced latency of zero would deadlock the clients: nothing is ever
    /// sent before the first confirmation, which itself needs an input.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        if self.forced_latency_ticks == 0 {
            return Err(ConfigError::ZeroForcedLatency);
        }
        if self.max_ticks_per_frame == 0 {
            return Err(ConfigError::ZeroMaxTicksPerFrame);
        }
        if self.max_connections == 0 {
            return Err(ConfigError::ZeroMaxConnections);
        }
        if self.max_connections as usize > MAX_ROSTER_SIZE {
            return Err(ConfigError::TooManyConnections {
                value: self.max_connections,
                limit: MAX_ROSTER_SIZE,
            });
        }
        self.impairment.validate()
    }

    pub fn tick_rate_config(&self) -> TickRateConfig {
        TickRateConfig {
            tick_rate: self.tick_rate,
            forced_latency_ticks: self.forced_latency_ticks,
            max_ticks_per_frame: self.max_ticks_per_frame,
        }
    }
}

/// Fixed-step parameters, immutable for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickRateConfig {
    pub tick_rate: u16,
    pub forced_latency_ticks: u32,
    pub max_ticks_per_frame: u32,
}

impl TickRateConfig {
    /// Seconds between two ticks.
    pub fn tick_interval(&self) -> f64 {
        1.0 / self.tick_rate as f64
    }
}

/// Configuration plus log label, passed by reference to every component.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub config: SessionConfig,
    label: String,
}

impl SessionContext {
    pub fn new(config: SessionConfig, label: impl Into<String>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            label: label.into(),
        })
    }

    /// Prefix used on every log line of this session, e.g. `[client 2]`.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Same configuration, different label. Used once a client learns its id.
    pub fn relabel(&self, label: impl Into<String>) -> Self {
        Self {
            config: self.config.clone(),
            label: label.into(),
        }
    }
}
