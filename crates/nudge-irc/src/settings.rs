use serde::{Deserialize, Serialize};

/// The `[irc]` section: where to connect and which channels to join.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct IrcSettings {
    pub server: String,
    pub port: u16,
    pub nick: String,
    pub realname: String,
    pub channels: Vec<String>,
    /// Upper bound for the TCP connect and the server welcome.
    pub connect_timeout_ms: u64,
    /// How long one read waits for the next line before returning.
    pub read_wait_ms: u64,
}

impl Default for IrcSettings {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: 6667,
            nick: "nudgebot".to_string(),
            realname: "nudgebot".to_string(),
            channels: Vec::new(),
            connect_timeout_ms: 30_000,
            read_wait_ms: 200,
        }
    }
}

impl IrcSettings {
    pub fn new(server: impl Into<String>, nick: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            nick: nick.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_channels(mut self, channels: &[&str]) -> Self {
        self.channels = channels.iter().map(|channel| channel.to_string()).collect();
        self
    }
}
