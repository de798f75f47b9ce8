use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use nudge_core::sha256_hex;
use nudge_endpoint::{Event, EventSource, KnownEvents};
use serde_json::{json, Map};
use tracing::debug;

use crate::{parse_privmsg, ChatConnection, PrivateMessage, IRC_ENDPOINT_KEY, MESSAGE};

pub const MESSAGE_EVENT: &str = "message";
pub const MESSAGE_MENTIONED_ME_EVENT: &str = "message_mentioned_me";

/// Classifies received chat lines into message events.
pub struct IrcEventSource {
    connection: Arc<dyn ChatConnection>,
}

impl IrcEventSource {
    pub fn new(connection: Arc<dyn ChatConnection>) -> Self {
        Self { connection }
    }

    fn classify(&self, message: PrivateMessage, received_at: &str) -> Event {
        // Identical lines from the same sender in the same channel share an id.
        let id = sha256_hex(
            format!("{},{},{}", message.sender, message.channel, message.content).as_bytes(),
        );
        let name = if message.content.contains(self.connection.nick()) {
            MESSAGE_MENTIONED_ME_EVENT
        } else {
            MESSAGE_EVENT
        };
        let mut data = Map::new();
        data.insert("server".to_string(), json!(self.connection.server()));
        data.insert("channel".to_string(), json!(message.channel));
        data.insert("sender".to_string(), json!(message.sender));
        data.insert("content".to_string(), json!(message.content));
        data.insert("datetime".to_string(), json!(received_at));
        Event::new(id, &MESSAGE, name, data)
    }
}

#[async_trait]
impl EventSource for IrcEventSource {
    fn endpoint_key(&self) -> &str {
        IRC_ENDPOINT_KEY
    }

    async fn build_events(&self, known: &KnownEvents) -> anyhow::Result<Vec<Event>> {
        let lines = self.connection.read_lines().await?;
        if lines.is_empty() {
            return Ok(Vec::new());
        }
        let received_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let events = lines
            .iter()
            .filter_map(|line| parse_privmsg(line))
            .map(|message| self.classify(message, &received_at))
            .filter(|event| !known.contains(&event.hash()))
            .collect::<Vec<_>>();
        debug!(lines = lines.len(), events = events.len(), "chat lines classified");
        Ok(events)
    }
}
