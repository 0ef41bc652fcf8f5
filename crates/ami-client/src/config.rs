use std::time::Duration;

/// Manager session configuration
///
/// Host, port, and credentials come from deployment configuration; the two
/// intervals are protocol policy. The reconnect interval is fixed at five
/// seconds by default and is used verbatim between attempts; there is no
/// exponential backoff.
#[derive(Debug, Clone)]
pub struct AmiConfig {
    /// Manager endpoint host
    pub host: String,

    /// Manager endpoint port (5038 is the conventional AMI port)
    pub port: u16,

    /// Manager username
    pub username: String,

    /// Manager secret
    pub secret: String,

    /// Delay between reconnect attempts after a disconnect
    pub reconnect_interval: Duration,

    /// How long to wait for the `Response` frame of any sent action
    pub action_timeout: Duration,
}

impl Default for AmiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5038,
            username: "ringline".to_string(),
            secret: String::new(),
            reconnect_interval: Duration::from_secs(5),
            action_timeout: Duration::from_secs(10),
        }
    }
}

impl AmiConfig {
    /// `host:port` form for connect calls and log lines.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
