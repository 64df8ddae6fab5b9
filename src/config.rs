//! Runtime configuration, validated once at startup.
//!
//! The binary builds a [`WallConfig`] from its command line; tests build
//! one with [`WallConfig::default`] and override single fields.

use crate::{PanelConfig, WallError};
use serde::Serialize;
use std::time::Duration;

/// Longest the dispatcher will sleep for a single frame.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_millis(3000);

/// Frames buffered between the parser and the dispatcher.
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Where the broker lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
}

impl BrokerConfig {
    /// `host:port`, the form `tokio::net::lookup_host` expects.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "192.168.4.1".to_string(),
            port: 4222,
        }
    }
}

/// The one subscription this wall listens on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub topic: String,
    pub sid: String,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, sid: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            sid: sid.into(),
        }
    }

    /// The `SUB <topic> <sid>\r\n` control line.
    pub fn sub_line(&self) -> Vec<u8> {
        format!("SUB {} {}\r\n", self.topic, self.sid).into_bytes()
    }

    /// Everything of a matching `MSG` header line before the byte count:
    /// `MSG <topic> <sid> `.
    pub fn msg_prefix(&self) -> Vec<u8> {
        format!("MSG {} {} ", self.topic, self.sid).into_bytes()
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new("matrix1.in", "1")
    }
}

/// Full configuration of one wall segment.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WallConfig {
    pub broker: BrokerConfig,
    pub subscription: Subscription,
    pub panel: PanelConfig,
    pub queue_capacity: usize,
    pub max_wait: Duration,
    /// Brightness applied by the sink, 0-100.
    pub brightness: u8,
    /// Interval between readiness checks while waiting for network and clock.
    pub readiness_poll: Duration,
}

impl Default for WallConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            subscription: Subscription::default(),
            panel: PanelConfig::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_wait: DEFAULT_MAX_WAIT,
            brightness: 100,
            readiness_poll: Duration::from_millis(500),
        }
    }
}

impl WallConfig {
    /// Reject configurations the parser or queue cannot work with.
    pub fn validate(&self) -> Result<(), WallError> {
        if self.broker.host.is_empty() {
            return Err(WallError::Config("broker host is empty".to_string()));
        }
        validate_token("topic", &self.subscription.topic)?;
        validate_token("sid", &self.subscription.sid)?;

        if self.panel.rows == 0 || self.panel.cols == 0 {
            return Err(WallError::Config(format!(
                "panel {}x{} has no pixels",
                self.panel.cols, self.panel.rows
            )));
        }
        // The declared byte count is parsed into a u32-sized field.
        match self.panel.checked_payload_len() {
            Some(len) if len <= u32::MAX as usize => {}
            _ => {
                return Err(WallError::Config(format!(
                    "payload for a {}x{} panel is too large",
                    self.panel.cols, self.panel.rows
                )));
            }
        }
        if self.queue_capacity == 0 {
            return Err(WallError::Config(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        if self.max_wait.is_zero() {
            return Err(WallError::Config("max wait must be positive".to_string()));
        }
        if self.brightness > 100 {
            return Err(WallError::Config(format!(
                "brightness {} is above 100",
                self.brightness
            )));
        }
        Ok(())
    }
}

/// Topics and sids are single protocol tokens: printable, no spaces.
fn validate_token(what: &str, value: &str) -> Result<(), WallError> {
    if value.is_empty() {
        return Err(WallError::Config(format!("{what} is empty")));
    }
    if !value.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(WallError::Config(format!(
            "{what} {value:?} must be printable ASCII without spaces"
        )));
    }
    Ok(())
}
