use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use nudge_endpoint::{Endpoint, EndpointScope, ScopeError, ScopeKind, ScopeQuery, ScopeResult};

use crate::IRC_ENDPOINT_KEY;

pub static SERVER: ScopeKind = ScopeKind::new(IRC_ENDPOINT_KEY, "server", &["server"], &[]);

pub static CHANNEL: ScopeKind =
    ScopeKind::new(IRC_ENDPOINT_KEY, "channel", &["server", "channel"], &[&SERVER]);

pub static MESSAGE: ScopeKind = ScopeKind::new(
    IRC_ENDPOINT_KEY,
    "message",
    &["server", "channel", "sender", "content", "datetime"],
    &[&CHANNEL],
);

#[derive(Debug, Clone)]
pub struct ServerScope {
    pub server: String,
}

impl EndpointScope for ServerScope {
    fn kind(&self) -> &'static ScopeKind {
        &SERVER
    }

    fn query(&self) -> ScopeQuery {
        ScopeQuery::new().with("server", self.server.as_str())
    }

    fn parent(&self) -> Option<Arc<dyn EndpointScope>> {
        None
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone)]
pub struct ChannelScope {
    pub server: Arc<ServerScope>,
    pub name: String,
}

impl EndpointScope for ChannelScope {
    fn kind(&self) -> &'static ScopeKind {
        &CHANNEL
    }

    fn query(&self) -> ScopeQuery {
        self.server.query().with("channel", self.name.as_str())
    }

    fn parent(&self) -> Option<Arc<dyn EndpointScope>> {
        Some(self.server.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One received chat line. `datetime` is the RFC 3339 receive time.
#[derive(Debug, Clone)]
pub struct MessageScope {
    pub channel: Arc<ChannelScope>,
    pub sender: String,
    pub content: String,
    pub datetime: String,
}

impl EndpointScope for MessageScope {
    fn kind(&self) -> &'static ScopeKind {
        &MESSAGE
    }

    fn query(&self) -> ScopeQuery {
        self.channel
            .query()
            .with("sender", self.sender.as_str())
            .with("content", self.content.as_str())
            .with("datetime", self.datetime.as_str())
    }

    fn parent(&self) -> Option<Arc<dyn EndpointScope>> {
        Some(self.channel.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Chat scopes carry everything in their keys, so resolution never calls
/// out to the server.
#[derive(Debug, Default, Clone, Copy)]
pub struct IrcEndpoint;

impl IrcEndpoint {
    fn channel(kind: &ScopeKind, query: &ScopeQuery) -> ScopeResult<Arc<ChannelScope>> {
        Ok(Arc::new(ChannelScope {
            server: Arc::new(ServerScope {
                server: query.require_str(kind, "server")?.to_string(),
            }),
            name: query.require_str(kind, "channel")?.to_string(),
        }))
    }
}

#[async_trait]
impl Endpoint for IrcEndpoint {
    fn key(&self) -> &str {
        IRC_ENDPOINT_KEY
    }

    fn scope_kinds(&self) -> Vec<&'static ScopeKind> {
        vec![&SERVER, &CHANNEL, &MESSAGE]
    }

    async fn init_by_keys(
        &self,
        kind: &'static ScopeKind,
        query: &ScopeQuery,
    ) -> ScopeResult<Arc<dyn EndpointScope>> {
        if kind == &SERVER {
            return Ok(Arc::new(ServerScope {
                server: query.require_str(kind, "server")?.to_string(),
            }));
        }
        if kind == &CHANNEL {
            let channel: Arc<dyn EndpointScope> = Self::channel(kind, query)?;
            return Ok(channel);
        }
        if kind == &MESSAGE {
            return Ok(Arc::new(MessageScope {
                channel: Self::channel(kind, query)?,
                sender: query.require_str(kind, "sender")?.to_string(),
                content: query.require_str(kind, "content")?.to_string(),
                datetime: query.require_str(kind, "datetime")?.to_string(),
            }));
        }
        Err(ScopeError::UnsupportedKind {
            endpoint: IRC_ENDPOINT_KEY.to_string(),
            kind: kind.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use nudge_endpoint::{hierarchy, Endpoint, ScopeError, ScopeQuery};

    use super::{IrcEndpoint, MESSAGE};

    fn message_query() -> ScopeQuery {
        ScopeQuery::new()
            .with("server", "irc.example.net")
            .with("channel", "#dev")
            .with("sender", "alice")
            .with("content", "hello")
            .with("datetime", "2024-01-01T00:00:00+00:00")
    }

    #[tokio::test]
    async fn message_scope_round_trips_its_keys() {
        let scope = IrcEndpoint
            .init_by_keys(&MESSAGE, &message_query())
            .await
            .expect("message");
        assert_eq!(scope.query(), message_query());
        let kinds = hierarchy(scope)
            .iter()
            .map(|scope| scope.kind().name)
            .collect::<Vec<_>>();
        assert_eq!(kinds, vec!["message", "channel", "server"]);
    }

    #[tokio::test]
    async fn missing_keys_are_reported() {
        let query = ScopeQuery::new()
            .with("server", "irc.example.net")
            .with("channel", "#dev");
        let error = IrcEndpoint
            .init_by_keys(&MESSAGE, &query)
            .await
            .expect_err("incomplete");
        assert!(matches!(error, ScopeError::MissingKey { ref key, .. } if key == "sender"));
    }
}
