//! Host-facing command surface over the server and the store.
//!
//! Every failure leaves this module as a [`ControlError`] carrying only the
//! first line of the underlying message.

use std::fmt;
use std::str::FromStr;

use pulse_core::seed::{DEFAULT_CHAT_COUNT, DEFAULT_MESSAGES_PER_CHAT};
use pulse_core::{reseed_store, sanitize_error, Chat, ChatStore, MemoryChatStore, Message};
use thiserror::Error;

use crate::feed::PAGE_SIZE;
use crate::protocol::SimulationStatus;
use crate::server::SimulationServer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Stop,
    TriggerMessage { chat_id: Option<i64> },
    ConnectionDrop,
    Status,
    GetChats { limit: usize, offset: usize },
    GetMessages { chat_id: i64, limit: usize, offset: usize },
    MarkAsRead { chat_id: i64 },
    /// Wipe the store and seed fresh demo data.
    Reseed { chats: usize, messages_per_chat: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    Ok,
    Message(Option<Message>),
    Status(SimulationStatus),
    Chats(Vec<Chat>),
    Messages(Vec<Message>),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ControlError {
    pub message: String,
}

impl ControlError {
    pub fn new(err: impl fmt::Display) -> Self {
        Self {
            message: sanitize_error(err),
        }
    }
}

/// Usage line shown by the console on a parse error.
pub const USAGE: &str =
    "commands: start | stop | trigger [chat] | drop | status | chats [limit] [offset] | messages <chat> [limit] [offset] | read <chat> | reseed [chats] [per_chat]";

fn parse_arg<T: FromStr>(word: Option<&str>, name: &str) -> Result<Option<T>, ControlError> {
    word.map(|raw| {
        raw.parse()
            .map_err(|_| ControlError::new(format!("Invalid {name}: {raw}")))
    })
    .transpose()
}

fn required<T>(value: Option<T>, name: &str) -> Result<T, ControlError> {
    value.ok_or_else(|| ControlError::new(format!("Missing {name}")))
}

impl FromStr for ControlCommand {
    type Err = ControlError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default().to_ascii_lowercase();
        let mut arg = || words.next();

        let command = match verb.as_str() {
            "start" => Self::Start,
            "stop" => Self::Stop,
            "trigger" => Self::TriggerMessage {
                chat_id: parse_arg(arg(), "chat id")?,
            },
            "drop" => Self::ConnectionDrop,
            "status" => Self::Status,
            "chats" => Self::GetChats {
                limit: parse_arg(arg(), "limit")?.unwrap_or(PAGE_SIZE),
                offset: parse_arg(arg(), "offset")?.unwrap_or(0),
            },
            "messages" => Self::GetMessages {
                chat_id: required(parse_arg(arg(), "chat id")?, "chat id")?,
                limit: parse_arg(arg(), "limit")?.unwrap_or(PAGE_SIZE),
                offset: parse_arg(arg(), "offset")?.unwrap_or(0),
            },
            "read" => Self::MarkAsRead {
                chat_id: required(parse_arg(arg(), "chat id")?, "chat id")?,
            },
            "reseed" => Self::Reseed {
                chats: parse_arg(arg(), "chat count")?.unwrap_or(DEFAULT_CHAT_COUNT),
                messages_per_chat: parse_arg(arg(), "messages per chat")?
                    .unwrap_or(DEFAULT_MESSAGES_PER_CHAT),
            },
            "" => return Err(ControlError::new("Empty command")),
            other => return Err(ControlError::new(format!("Unknown command: {other}"))),
        };
        Ok(command)
    }
}

/// Run one command against the server and store.
pub async fn dispatch(
    server: &SimulationServer,
    store: &MemoryChatStore,
    command: ControlCommand,
) -> Result<ControlReply, ControlError> {
    log::debug!("Control command: {command:?}");
    let reply = match command {
        ControlCommand::Start => {
            server.start().await.map_err(ControlError::new)?;
            ControlReply::Ok
        }
        ControlCommand::Stop => {
            server.stop().await;
            ControlReply::Ok
        }
        ControlCommand::TriggerMessage { chat_id } => {
            ControlReply::Message(server.trigger_message(chat_id).await.map_err(ControlError::new)?)
        }
        ControlCommand::ConnectionDrop => {
            server.simulate_connection_drop().await;
            ControlReply::Ok
        }
        ControlCommand::Status => ControlReply::Status(server.status().await),
        ControlCommand::GetChats { limit, offset } => {
            ControlReply::Chats(store.get_chats(limit, offset).map_err(ControlError::new)?)
        }
        ControlCommand::GetMessages { chat_id, limit, offset } => ControlReply::Messages(
            store
                .get_messages(chat_id, limit, offset)
                .map_err(ControlError::new)?,
        ),
        ControlCommand::MarkAsRead { chat_id } => {
            store.mark_as_read(chat_id).map_err(ControlError::new)?;
            ControlReply::Ok
        }
        ControlCommand::Reseed { chats, messages_per_chat } => {
            reseed_store(store, chats, messages_per_chat).map_err(ControlError::new)?;
            let cached = server.refresh_chat_ids().await.map_err(ControlError::new)?;
            log::info!("Reseeded store, {cached} chats cached");
            ControlReply::Ok
        }
    };
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerConfig;
    use pulse_core::{MemoryChatStore, PassthroughSecurity};
    use std::sync::Arc;

    #[test]
    fn test_parse_simple_verbs() {
        assert_eq!("start".parse::<ControlCommand>().unwrap(), ControlCommand::Start);
        assert_eq!("  STOP ".parse::<ControlCommand>().unwrap(), ControlCommand::Stop);
        assert_eq!("drop".parse::<ControlCommand>().unwrap(), ControlCommand::ConnectionDrop);
        assert_eq!("status".parse::<ControlCommand>().unwrap(), ControlCommand::Status);
    }

    #[test]
    fn test_parse_arguments_and_defaults() {
        assert_eq!(
            "trigger".parse::<ControlCommand>().unwrap(),
            ControlCommand::TriggerMessage { chat_id: None }
        );
        assert_eq!(
            "trigger 7".parse::<ControlCommand>().unwrap(),
            ControlCommand::TriggerMessage { chat_id: Some(7) }
        );
        assert_eq!(
            "chats".parse::<ControlCommand>().unwrap(),
            ControlCommand::GetChats { limit: PAGE_SIZE, offset: 0 }
        );
        assert_eq!(
            "messages 3 10 20".parse::<ControlCommand>().unwrap(),
            ControlCommand::GetMessages { chat_id: 3, limit: 10, offset: 20 }
        );
        assert_eq!(
            "read 4".parse::<ControlCommand>().unwrap(),
            ControlCommand::MarkAsRead { chat_id: 4 }
        );
        assert_eq!(
            "reseed".parse::<ControlCommand>().unwrap(),
            ControlCommand::Reseed {
                chats: DEFAULT_CHAT_COUNT,
                messages_per_chat: DEFAULT_MESSAGES_PER_CHAT
            }
        );
        assert_eq!(
            "reseed 3 2".parse::<ControlCommand>().unwrap(),
            ControlCommand::Reseed { chats: 3, messages_per_chat: 2 }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<ControlCommand>().unwrap_err().message, "Empty command");
        assert_eq!(
            "explode".parse::<ControlCommand>().unwrap_err().message,
            "Unknown command: explode"
        );
        assert_eq!("read".parse::<ControlCommand>().unwrap_err().message, "Missing chat id");
        assert_eq!(
            "trigger abc".parse::<ControlCommand>().unwrap_err().message,
            "Invalid chat id: abc"
        );
    }

    #[test]
    fn test_error_keeps_first_line_only() {
        let err = ControlError::new("Store unavailable: poisoned\n  at internal frame");
        assert_eq!(err.to_string(), "Store unavailable: poisoned");
    }

    #[tokio::test]
    async fn test_dispatch_round() {
        let store = Arc::new(MemoryChatStore::new(Arc::new(PassthroughSecurity::new())));
        let id = store.create_chat("API Changes #5").unwrap();
        let server = SimulationServer::bind(ServerConfig::with_port(0), store.clone())
            .await
            .unwrap();

        let reply = dispatch(&server, &store, ControlCommand::TriggerMessage { chat_id: Some(id) })
            .await
            .unwrap();
        let ControlReply::Message(Some(message)) = reply else {
            panic!("Expected a generated message, got {reply:?}");
        };
        assert_eq!(message.chat_id, id);

        let reply = dispatch(&server, &store, ControlCommand::GetMessages { chat_id: id, limit: 10, offset: 0 })
            .await
            .unwrap();
        assert_eq!(reply, ControlReply::Messages(vec![message]));

        dispatch(&server, &store, ControlCommand::MarkAsRead { chat_id: id })
            .await
            .unwrap();
        let ControlReply::Chats(chats) = dispatch(&server, &store, ControlCommand::GetChats { limit: 10, offset: 0 })
            .await
            .unwrap()
        else {
            panic!("Expected chats");
        };
        assert_eq!(chats[0].unread_count, 0);

        let err = dispatch(&server, &store, ControlCommand::TriggerMessage { chat_id: Some(999) })
            .await
            .unwrap_err();
        assert_eq!(err.message, "Chat not found: 999");

        let ControlReply::Status(status) = dispatch(&server, &store, ControlCommand::Status).await.unwrap() else {
            panic!("Expected status");
        };
        assert!(!status.running);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_dispatch_reseed_refreshes_cache() {
        let store = Arc::new(MemoryChatStore::new(Arc::new(PassthroughSecurity::new())));
        let old = store.create_chat("Retro Notes #2").unwrap();
        let server = SimulationServer::bind(ServerConfig::with_port(0), store.clone())
            .await
            .unwrap();

        let reply = dispatch(&server, &store, ControlCommand::Reseed { chats: 3, messages_per_chat: 2 })
            .await
            .unwrap();
        assert_eq!(reply, ControlReply::Ok);
        assert_eq!(store.get_chat_by_id(old).unwrap(), None);
        assert_eq!(store.get_chats(10, 0).unwrap().len(), 3);
        assert_eq!(store.message_count().unwrap(), 6);

        // Random picks land only on the fresh chats.
        for _ in 0..10 {
            let message = server.trigger_message(None).await.unwrap().unwrap();
            assert_ne!(message.chat_id, old);
            assert!(store.get_chat_by_id(message.chat_id).unwrap().is_some());
        }
        server.shutdown().await;
    }
}
