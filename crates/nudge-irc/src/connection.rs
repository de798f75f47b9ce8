use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

/// Longest chat line sent in one piece, in characters.
pub const MAX_LINE_CHARS: usize = 256;

static PRIVMSG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^:?([\w\-\[\]`^{}|]+)!\S+ PRIVMSG ([\w\-#&]+) :(.+)$").expect("privmsg regex")
});

/// Connected chat client. The wire protocol stays behind this trait.
#[async_trait]
pub trait ChatConnection: Send + Sync {
    fn server(&self) -> &str;

    fn nick(&self) -> &str;

    /// Raw lines received since the previous call; empty when idle.
    async fn read_lines(&self) -> anyhow::Result<Vec<String>>;

    /// Sends one line to a channel or nick.
    async fn send(&self, target: &str, line: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateMessage {
    pub sender: String,
    pub channel: String,
    pub content: String,
}

/// Parses a `PRIVMSG` line; every other line yields `None`.
pub fn parse_privmsg(line: &str) -> Option<PrivateMessage> {
    let captures = PRIVMSG.captures(line.trim_end_matches(['\r', '\n']))?;
    Some(PrivateMessage {
        sender: captures.get(1)?.as_str().to_string(),
        channel: captures.get(2)?.as_str().to_string(),
        content: captures.get(3)?.as_str().to_string(),
    })
}

/// Splits a message into lines no longer than `max_chars`, breaking on
/// whitespace where possible.
pub fn split_message(message: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    for raw_line in message.lines() {
        let mut current = String::new();
        for word in raw_line.split_whitespace() {
            let extra = usize::from(!current.is_empty());
            if current.chars().count() + extra + word.chars().count() > max_chars
                && !current.is_empty()
            {
                lines.push(std::mem::take(&mut current));
            }
            let mut rest = word;
            while rest.chars().count() > max_chars {
                let split_at = rest
                    .char_indices()
                    .nth(max_chars)
                    .map(|(index, _)| index)
                    .unwrap_or(rest.len());
                lines.push(rest[..split_at].to_string());
                rest = &rest[split_at..];
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(rest);
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }
    lines
}
