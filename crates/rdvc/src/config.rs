use clap::Parser;
use rdv_common::types::DEFAULT_PORT;

/// CLI interface for the signaling client.
#[derive(Parser, Debug)]
#[command(name = "rdvc", about = "Rendezvous signaling client")]
#[command(version)]
pub struct Cli {
    /// Identifier to register under.
    #[arg(value_name = "LOCAL_ID")]
    pub local_id: String,

    /// Relay WebSocket URL.
    #[arg(long, env = "RDVC_URL", default_value_t = default_url())]
    pub url: String,

    /// Interval between keepalive pings in seconds.
    #[arg(long, default_value = "30", env = "RDVC_PING_INTERVAL")]
    pub ping_interval: u64,

    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn default_url() -> String {
    format!("ws://127.0.0.1:{DEFAULT_PORT}")
}

/// Runtime configuration for a [`crate::Signaling`] client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base WebSocket URL of the relay; the local identifier is appended.
    pub url: String,
    /// Identifier to register under.
    pub local_id: String,
    /// Reconnection backoff settings.
    pub reconnect: ReconnectConfig,
    /// Interval between keepalive pings in seconds.
    pub ping_interval_s: u64,
    /// Capacity of the queue of messages waiting to be sent.
    pub outbox_depth: usize,
    /// Capacity of the default inbox and of each peer subscription.
    pub inbox_depth: usize,
}

/// Reconnect backoff parameters.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before the first reconnect attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between reconnect attempts, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_factor: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            local_id: String::new(),
            reconnect: ReconnectConfig::default(),
            ping_interval_s: 30,
            outbox_depth: 256,
            inbox_depth: 256,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
        }
    }
}

impl From<Cli> for ClientConfig {
    fn from(cli: Cli) -> Self {
        Self {
            url: cli.url,
            local_id: cli.local_id,
            ping_interval_s: cli.ping_interval,
            ..Self::default()
        }
    }
}

impl ClientConfig {
    /// Config connecting to `url` as `local_id`, defaults elsewhere.
    #[must_use]
    pub fn new(url: impl Into<String>, local_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            local_id: local_id.into(),
            ..Self::default()
        }
    }

    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(format!(
                "relay URL must start with ws:// or wss://, got: {}",
                self.url
            ));
        }

        if self.local_id.is_empty() {
            return Err("local_id must not be empty".to_string());
        }
        if self.local_id.contains(['/', '?', '#', ' ']) {
            return Err(format!(
                "local_id must be a single path segment, got: {}",
                self.local_id
            ));
        }

        if self.reconnect.initial_delay_ms == 0 {
            return Err("reconnect.initial_delay_ms must be greater than 0".to_string());
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err("reconnect.max_delay_ms must be >= initial_delay_ms".to_string());
        }
        if !self.reconnect.backoff_factor.is_finite() || self.reconnect.backoff_factor < 1.0 {
            return Err("reconnect.backoff_factor must be a finite number of at least 1".to_string());
        }

        if self.ping_interval_s == 0 {
            return Err("ping_interval_s must be greater than 0".to_string());
        }
        if self.outbox_depth == 0 || self.inbox_depth == 0 {
            return Err("queue depths must be greater than 0".to_string());
        }
        Ok(())
    }
}
