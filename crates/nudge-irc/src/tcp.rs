use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};
use tracing::{debug, info};

use crate::{ChatConnection, IrcSettings};

/// Lines drained per read so a flooding channel cannot stall the events loop.
const MAX_LINES_PER_READ: usize = 512;

struct LineReader {
    stream: BufReader<OwnedReadHalf>,
    /// Bytes of a line whose terminator has not arrived yet.
    partial: Vec<u8>,
}

impl LineReader {
    /// Next complete line without its terminator, `None` once `wait` passes.
    async fn next_line(&mut self, wait: Duration) -> Result<Option<String>> {
        match timeout(wait, self.stream.read_until(b'\n', &mut self.partial)).await {
            Err(_) => Ok(None),
            Ok(Err(error)) => Err(error).context("failed to read from chat server"),
            Ok(Ok(0)) => bail!("chat server closed the connection"),
            Ok(Ok(_)) if !self.partial.ends_with(b"\n") => Ok(None),
            Ok(Ok(_)) => {
                let line = String::from_utf8_lossy(&self.partial)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                self.partial.clear();
                Ok(Some(line))
            }
        }
    }
}

/// Plain-text IRC client over TCP. Registers, joins the configured
/// channels and answers server `PING`s while reading.
pub struct TcpChatConnection {
    server: String,
    nick: String,
    read_wait: Duration,
    reader: Mutex<LineReader>,
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpChatConnection {
    pub async fn connect(settings: &IrcSettings) -> Result<Self> {
        let limit = Duration::from_millis(settings.connect_timeout_ms.max(1));
        let address = format!("{}:{}", settings.server, settings.port);
        let stream = timeout(limit, TcpStream::connect(address.as_str()))
            .await
            .with_context(|| format!("timed out connecting to {address}"))?
            .with_context(|| format!("failed to connect to {address}"))?;
        let (read_half, write_half) = stream.into_split();
        let connection = Self {
            server: settings.server.clone(),
            nick: settings.nick.clone(),
            read_wait: Duration::from_millis(settings.read_wait_ms.max(1)),
            reader: Mutex::new(LineReader {
                stream: BufReader::new(read_half),
                partial: Vec::new(),
            }),
            writer: Mutex::new(write_half),
        };

        connection.write_raw(&format!("NICK {}", settings.nick)).await?;
        connection
            .write_raw(&format!("USER {} 0 * :{}", settings.nick, settings.realname))
            .await?;
        connection.await_welcome(limit).await?;
        for channel in &settings.channels {
            connection.write_raw(&format!("JOIN {channel}")).await?;
        }
        info!(
            server = %settings.server,
            nick = %settings.nick,
            channels = settings.channels.len(),
            "connected to chat server"
        );
        Ok(connection)
    }

    async fn write_raw(&self, line: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .context("failed to write to chat server")?;
        writer.flush().await.context("failed to flush chat line")
    }

    /// Answers a `PING`; false for every other line.
    async fn answer_ping(&self, line: &str) -> Result<bool> {
        match line.strip_prefix("PING") {
            Some(token) => {
                self.write_raw(&format!("PONG{token}")).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn await_welcome(&self, limit: Duration) -> Result<()> {
        let deadline = Instant::now() + limit;
        let mut reader = self.reader.lock().await;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                bail!("chat server {} sent no welcome in time", self.server);
            }
            let Some(line) = reader.next_line(remaining).await? else {
                continue;
            };
            if self.answer_ping(&line).await? {
                continue;
            }
            match line.split_whitespace().nth(1) {
                Some("001") => return Ok(()),
                Some("433") => bail!("nick '{}' is already in use on {}", self.nick, self.server),
                _ => debug!(line = %line, "chat line before welcome"),
            }
        }
    }
}

#[async_trait]
impl ChatConnection for TcpChatConnection {
    fn server(&self) -> &str {
        &self.server
    }

    fn nick(&self) -> &str {
        &self.nick
    }

    async fn read_lines(&self) -> Result<Vec<String>> {
        let mut reader = self.reader.lock().await;
        let mut lines = Vec::new();
        while lines.len() < MAX_LINES_PER_READ {
            let Some(line) = reader.next_line(self.read_wait).await? else {
                break;
            };
            if !self.answer_ping(&line).await? {
                lines.push(line);
            }
        }
        Ok(lines)
    }

    async fn send(&self, target: &str, line: &str) -> Result<()> {
        let line = line.replace(['\r', '\n'], " ");
        self.write_raw(&format!("PRIVMSG {target} :{line}")).await
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use super::TcpChatConnection;
    use crate::{ChatConnection, IrcSettings};

    fn settings(port: u16) -> IrcSettings {
        let mut settings = IrcSettings::new("127.0.0.1", "nudgebot")
            .with_port(port)
            .with_channels(&["#dev"]);
        settings.connect_timeout_ms = 5_000;
        settings.read_wait_ms = 100;
        settings
    }

    #[tokio::test]
    async fn registers_joins_and_answers_pings() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let mut received = Vec::new();
            for _ in 0..2 {
                received.push(lines.next_line().await.expect("read").expect("line"));
            }
            write_half
                .write_all(b":irc.test NOTICE * :hello\r\n:irc.test 001 nudgebot :Welcome\r\n")
                .await
                .expect("welcome");
            received.push(lines.next_line().await.expect("read").expect("join"));
            write_half
                .write_all(b"PING :abc\r\n:alice!a@host PRIVMSG #dev :nudgebot, ping\r\n")
                .await
                .expect("traffic");
            for _ in 0..2 {
                received.push(lines.next_line().await.expect("read").expect("line"));
            }
            received
        });

        let connection = TcpChatConnection::connect(&settings(port))
            .await
            .expect("connect");
        let mut lines = Vec::new();
        for _ in 0..50 {
            lines = connection.read_lines().await.expect("read");
            if !lines.is_empty() {
                break;
            }
        }
        assert_eq!(lines, vec![":alice!a@host PRIVMSG #dev :nudgebot, ping"]);
        connection.send("#dev", "pong").await.expect("send");

        assert_eq!(
            server.await.expect("server"),
            vec![
                "NICK nudgebot",
                "USER nudgebot 0 * :nudgebot",
                "JOIN #dev",
                "PONG :abc",
                "PRIVMSG #dev :pong",
            ]
        );
    }

    #[tokio::test]
    async fn connect_fails_when_the_server_hangs_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            drop(stream);
        });

        assert!(TcpChatConnection::connect(&settings(port)).await.is_err());
        server.await.expect("server");
    }
}
