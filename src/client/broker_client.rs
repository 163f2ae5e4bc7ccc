//! Daemon connection for the CLI client.
//!
//! Connects as `Role::Client` (or `Role::Admin` for room lifecycle),
//! performs the handshake, and offers one method per wire operation.

use std::path::Path;

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use crate::ipc::codec::LengthPrefixedCodec;
use crate::ipc::protocol::{
    Message, MessageDescriptor, PROTOCOL_VERSION, PresenceDescriptor, Role, RoomDescriptor, Status,
};
use crate::room::RoomId;

use super::ClientError;

/// Fields of a successful `response`.
#[derive(Debug, Default)]
pub struct Reply {
    pub messages: Option<Vec<MessageDescriptor>>,
    pub message_id: Option<i64>,
    pub users: Option<Vec<PresenceDescriptor>>,
    pub rooms: Option<Vec<RoomDescriptor>>,
    pub date: Option<String>,
    pub refresh: Option<u64>,
}

/// Result of `get_presence`.
pub struct PresenceResult {
    pub date: String,
    pub users: Vec<PresenceDescriptor>,
    pub refresh: u64,
}

/// One request-response cycle per call; no split sink/stream needed.
pub struct BrokerClient {
    framed: Framed<UnixStream, LengthPrefixedCodec>,
    next_id: u32,
}

impl BrokerClient {
    /// Connect to the daemon and perform the handshake.
    pub async fn connect(socket_path: &Path, role: Role) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|e| ClientError::Broker(format!("connect {}: {e}", socket_path.display())))?;
        let mut framed = Framed::new(stream, LengthPrefixedCodec::new());

        framed
            .send(Message::Hello {
                id: 0,
                version: PROTOCOL_VERSION,
                role,
            })
            .await
            .map_err(|e| ClientError::Broker(format!("send hello: {e}")))?;

        match framed.next().await {
            Some(Ok(Message::HelloAck {
                status: Status::Ok, ..
            })) => {}
            Some(Ok(Message::HelloAck {
                status: Status::Error,
                error,
                ..
            })) => {
                return Err(ClientError::Broker(format!(
                    "handshake rejected: {}",
                    error.unwrap_or_default()
                )));
            }
            other => {
                return Err(ClientError::Broker(format!(
                    "unexpected handshake response: {other:?}"
                )));
            }
        }

        Ok(Self {
            framed,
            next_id: 1, // 0 = Hello
        })
    }

    /// Send one request and wait for its response.
    async fn request(
        &mut self,
        op: &str,
        build: impl FnOnce(u32) -> Message,
    ) -> Result<Reply, ClientError> {
        let id = self.next_id;
        self.next_id += 1;

        self.framed
            .send(build(id))
            .await
            .map_err(|e| ClientError::Broker(format!("send {op}: {e}")))?;

        match self.framed.next().await {
            Some(Ok(Message::Response {
                id: resp_id,
                status: Status::Ok,
                messages,
                message_id,
                users,
                rooms,
                date,
                refresh,
                ..
            })) if resp_id == id => Ok(Reply {
                messages,
                message_id,
                users,
                rooms,
                date,
                refresh,
            }),
            Some(Ok(Message::Response {
                status: Status::Error,
                error,
                ..
            })) => Err(ClientError::Rejected {
                op: op.to_string(),
                reason: error.unwrap_or_default(),
            }),
            other => Err(ClientError::Broker(format!(
                "unexpected {op} response: {other:?}"
            ))),
        }
    }

    /// Post a message; returns its id.
    pub async fn send_message(
        &mut self,
        room_id: RoomId,
        username: &str,
        content: &str,
    ) -> Result<i64, ClientError> {
        let reply = self
            .request("send_message", |id| Message::SendMessage {
                id,
                room_id,
                username: username.to_string(),
                content: content.to_string(),
            })
            .await?;
        reply
            .message_id
            .ok_or_else(|| ClientError::Broker("send_message: missing message_id".into()))
    }

    pub async fn get_messages(
        &mut self,
        room_id: RoomId,
        since_id: i64,
        timeout_ms: Option<u64>,
    ) -> Result<Vec<MessageDescriptor>, ClientError> {
        let reply = self
            .request("get_messages", |id| Message::GetMessages {
                id,
                room_id,
                since_id,
                timeout_ms,
            })
            .await?;
        Ok(reply.messages.unwrap_or_default())
    }

    pub async fn latest_message_id(&mut self, room_id: RoomId) -> Result<i64, ClientError> {
        let reply = self
            .request("get_latest_message_id", |id| Message::GetLatestMessageId {
                id,
                room_id,
            })
            .await?;
        reply
            .message_id
            .ok_or_else(|| ClientError::Broker("get_latest_message_id: missing message_id".into()))
    }

    pub async fn history(
        &mut self,
        room_id: RoomId,
        since_id: i64,
    ) -> Result<Vec<MessageDescriptor>, ClientError> {
        let reply = self
            .request("get_history", |id| Message::GetHistory {
                id,
                room_id,
                since_id,
            })
            .await?;
        Ok(reply.messages.unwrap_or_default())
    }

    pub async fn notify_presence(&mut self, room_id: RoomId, username: &str) -> Result<(), ClientError> {
        self.request("notify_presence", |id| Message::NotifyPresence {
            id,
            room_id,
            username: username.to_string(),
        })
        .await?;
        Ok(())
    }

    pub async fn get_presence(
        &mut self,
        room_id: RoomId,
        username: &str,
    ) -> Result<PresenceResult, ClientError> {
        let reply = self
            .request("get_presence", |id| Message::GetPresence {
                id,
                room_id,
                username: username.to_string(),
            })
            .await?;
        Ok(PresenceResult {
            date: reply.date.unwrap_or_default(),
            users: reply.users.unwrap_or_default(),
            refresh: reply.refresh.unwrap_or_default(),
        })
    }

    pub async fn get_date(&mut self) -> Result<String, ClientError> {
        let reply = self.request("get_date", |id| Message::GetDate { id }).await?;
        reply
            .date
            .ok_or_else(|| ClientError::Broker("get_date: missing date".into()))
    }

    pub async fn list_rooms(&mut self) -> Result<Vec<RoomDescriptor>, ClientError> {
        let reply = self.request("list_rooms", |id| Message::ListRooms { id }).await?;
        Ok(reply.rooms.unwrap_or_default())
    }

    pub async fn create_room(
        &mut self,
        name: &str,
        slug: &str,
        allow_anonymous: bool,
    ) -> Result<RoomDescriptor, ClientError> {
        let reply = self
            .request("create_room", |id| Message::CreateRoom {
                id,
                name: name.to_string(),
                slug: slug.to_string(),
                allow_anonymous,
            })
            .await?;
        reply
            .rooms
            .and_then(|rooms| rooms.into_iter().next())
            .ok_or_else(|| ClientError::Broker("create_room: missing room".into()))
    }

    pub async fn delete_room(&mut self, room_id: RoomId) -> Result<(), ClientError> {
        self.request("delete_room", |id| Message::DeleteRoom { id, room_id })
            .await?;
        Ok(())
    }
}
