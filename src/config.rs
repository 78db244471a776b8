use std::time::Duration;

use clap::Parser;

use crate::signaling::{DEFAULT_SIGNALING_PORT, Heartbeat};

/// Switchboard signaling relay
#[derive(Parser, Clone, Debug)]
#[command(name = "switchboard", version, about = "WebSocket signaling relay")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = DEFAULT_SIGNALING_PORT)]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Seconds between keepalive pings
    #[arg(long, env = "PING_INTERVAL_SECS", default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before dropping the client
    #[arg(long, env = "PONG_TIMEOUT_SECS", default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub pong_timeout_secs: u64,
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat(&self) -> Heartbeat {
        Heartbeat {
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            pong_timeout: Duration::from_secs(self.pong_timeout_secs),
        }
    }
}
