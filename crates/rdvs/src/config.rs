use clap::Parser;
use rdv_common::types::DEFAULT_PORT;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Largest accepted WebSocket message, in bytes.
const MAX_ALLOWED_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// CLI arguments for the relay server.
#[derive(Parser, Debug, Clone)]
#[command(name = "rdvs")]
#[command(about = "Rendezvous relay for peer-to-peer signaling")]
#[command(version)]
pub struct Args {
    /// TCP port to listen on.
    #[arg(value_name = "PORT", env = "RDVS_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1", env = "RDVS_HOST")]
    pub host: IpAddr,
    /// PEM file holding the TLS certificate chain. Enables TLS.
    #[arg(long, env = "RDVS_CERT")]
    pub cert: Option<PathBuf>,
    /// PEM file holding the TLS private key. Defaults to the certificate file.
    #[arg(long, env = "RDVS_KEY", requires = "cert")]
    pub key: Option<PathBuf>,
    /// Socket address for the metrics and health endpoint.
    #[arg(long, env = "RDVS_METRICS")]
    pub metrics_addr: Option<SocketAddr>,
    /// Maximum WebSocket message size in bytes.
    #[arg(long, default_value = "65536", env = "RDVS_MAX_MESSAGE")]
    pub max_message_size: usize,
    /// Capacity of each connection's delivery queue.
    #[arg(long, default_value = "256", env = "RDVS_QUEUE_DEPTH")]
    pub queue_depth: usize,
    /// Interval between keepalive pings in seconds.
    #[arg(long, default_value = "30", env = "RDVS_PING_INTERVAL")]
    pub ping_interval: u64,
    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub listen: SocketAddr,
    /// TLS certificate chain; plaintext WebSocket when `None`.
    pub cert: Option<PathBuf>,
    /// TLS private key; read from `cert` when `None`.
    pub key: Option<PathBuf>,
    /// Metrics and health endpoint; disabled when `None`.
    pub metrics_addr: Option<SocketAddr>,
    /// Maximum WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Capacity of each connection's delivery queue.
    pub queue_depth: usize,
    /// Interval between keepalive pings in seconds.
    pub ping_interval: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            cert: None,
            key: None,
            metrics_addr: None,
            max_message_size: 65_536,
            queue_depth: 256,
            ping_interval: 30,
        }
    }
}

impl ServerConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.key.is_some() && self.cert.is_none() {
            return Err("key requires cert".to_string());
        }

        if self.max_message_size == 0 {
            return Err("max_message_size must be greater than 0".to_string());
        }
        if self.max_message_size > MAX_ALLOWED_MESSAGE_SIZE {
            return Err(format!(
                "max_message_size exceeds maximum allowed ({MAX_ALLOWED_MESSAGE_SIZE} bytes)"
            ));
        }

        if self.queue_depth == 0 {
            return Err("queue_depth must be greater than 0".to_string());
        }
        if self.queue_depth > 65_536 {
            return Err("queue_depth exceeds reasonable limit (65536)".to_string());
        }

        if self.ping_interval == 0 {
            return Err("ping_interval must be greater than 0".to_string());
        }
        if self.ping_interval > 3600 {
            return Err("ping_interval exceeds reasonable limit (3600 seconds)".to_string());
        }

        if let Some(metrics_addr) = self.metrics_addr {
            if metrics_addr == self.listen {
                return Err("metrics_addr must differ from the listen address".to_string());
            }
        }
        Ok(())
    }

    /// Returns `true` when connections are TLS-terminated.
    #[must_use]
    pub fn tls_enabled(&self) -> bool {
        self.cert.is_some()
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: SocketAddr::new(args.host, args.port),
            cert: args.cert,
            key: args.key,
            metrics_addr: args.metrics_addr,
            max_message_size: args.max_message_size,
            queue_depth: args.queue_depth,
            ping_interval: args.ping_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes() {
        let c = ServerConfig::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.listen, "127.0.0.1:8000".parse().unwrap());
        assert!(!c.tls_enabled());
    }

    #[test]
    fn key_without_cert() {
        let c = ServerConfig {
            key: Some("key.pem".into()),
            ..ServerConfig::default()
        };
        assert!(c.validate().unwrap_err().contains("cert"));
    }

    #[test]
    fn max_message_size_zero() {
        let mut c = ServerConfig::default();
        c.max_message_size = 0;
        assert!(c.validate().unwrap_err().contains("max_message_size"));
    }

    #[test]
    fn max_message_size_too_large() {
        let mut c = ServerConfig::default();
        c.max_message_size = MAX_ALLOWED_MESSAGE_SIZE + 1;
        assert!(c.validate().unwrap_err().contains("max_message_size"));
    }

    #[test]
    fn queue_depth_bounds() {
        let mut c = ServerConfig::default();
        c.queue_depth = 0;
        assert!(c.validate().unwrap_err().contains("queue_depth"));
        c.queue_depth = 65_537;
        assert!(c.validate().unwrap_err().contains("queue_depth"));
    }

    #[test]
    fn ping_interval_bounds() {
        let mut c = ServerConfig::default();
        c.ping_interval = 0;
        assert!(c.validate().unwrap_err().contains("ping_interval"));
        c.ping_interval = 3601;
        assert!(c.validate().unwrap_err().contains("ping_interval"));
    }

    #[test]
    fn metrics_addr_collides_with_listen() {
        let mut c = ServerConfig::default();
        c.metrics_addr = Some(c.listen);
        assert!(c.validate().unwrap_err().contains("metrics_addr"));
    }

    #[test]
    fn upper_boundary_values_valid() {
        let mut c = ServerConfig::default();
        c.max_message_size = MAX_ALLOWED_MESSAGE_SIZE;
        c.queue_depth = 65_536;
        c.ping_interval = 3600;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn args_positional_port_and_cert() {
        let args = Args::try_parse_from(["rdvs", "9000", "--cert", "chain.pem"]).unwrap();
        let c: ServerConfig = args.into();
        assert_eq!(c.listen.port(), 9000);
        assert_eq!(c.listen.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(c.tls_enabled());
        assert!(c.key.is_none());
    }

    #[test]
    fn args_key_requires_cert() {
        assert!(Args::try_parse_from(["rdvs", "--key", "key.pem"]).is_err());
    }
}
