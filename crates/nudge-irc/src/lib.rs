//! Chat endpoint: server, channel and message scopes, line classification,
//! a chat notifier and mention replies, all over a narrow connection trait
//! with a plain TCP implementation.

mod answers;
mod connection;
mod events;
mod notifier;
mod scopes;
mod settings;
mod tcp;

pub use answers::{mention_command, AnswerMentions, REPOSITORY_STATISTICS};
pub use connection::{parse_privmsg, split_message, ChatConnection, PrivateMessage, MAX_LINE_CHARS};
pub use events::{IrcEventSource, MESSAGE_EVENT, MESSAGE_MENTIONED_ME_EVENT};
pub use notifier::ChatNotifier;
pub use scopes::{ChannelScope, IrcEndpoint, MessageScope, ServerScope, CHANNEL, MESSAGE, SERVER};
pub use settings::IrcSettings;
pub use tcp::TcpChatConnection;

pub const IRC_ENDPOINT_KEY: &str = "irc";
