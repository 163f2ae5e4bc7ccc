//! CLI client for daemon operations.
//!
//! One-shot commands: connect, perform a single request, print the
//! result, exit.

mod broker_client;
mod format;

use std::path::PathBuf;

use crate::cli::ClientAction;
use crate::ipc::protocol::Role;
use crate::room::RoomId;
use broker_client::BrokerClient;

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("broker: {0}")]
    Broker(String),
    #[error("{op} failed: {reason}")]
    Rejected { op: String, reason: String },
    #[error("no socket: {0}")]
    NoSocket(#[from] crate::broker::BrokerError),
}

/// Run the client command. Called from `main.rs` for `Command::Client`.
pub async fn run(socket: Option<PathBuf>, action: ClientAction) -> Result<(), ClientError> {
    let socket_path = match socket {
        Some(path) => path,
        None => crate::broker::resolve_socket_path()?,
    };
    let mut broker = BrokerClient::connect(&socket_path, role_for(&action)).await?;

    match action {
        ClientAction::Send {
            room,
            username,
            content,
        } => {
            let id = broker.send_message(RoomId(room), &username, &content).await?;
            format::print_sent(id);
        }
        ClientAction::Get {
            room,
            since,
            timeout_ms,
        } => {
            let messages = broker.get_messages(RoomId(room), since, timeout_ms).await?;
            format::print_messages(&messages);
        }
        ClientAction::Latest { room } => {
            let latest = broker.latest_message_id(RoomId(room)).await?;
            format::print_latest(latest);
        }
        ClientAction::History { room, since } => {
            let messages = broker.history(RoomId(room), since).await?;
            format::print_messages(&messages);
        }
        ClientAction::Who { room, username } => {
            let presence = broker.get_presence(RoomId(room), &username).await?;
            format::print_presence(&presence);
        }
        ClientAction::Touch { room, username } => {
            broker.notify_presence(RoomId(room), &username).await?;
        }
        ClientAction::Rooms => {
            let rooms = broker.list_rooms().await?;
            format::print_rooms(&rooms);
        }
        ClientAction::CreateRoom {
            name,
            slug,
            anonymous,
        } => {
            let room = broker.create_room(&name, &slug, anonymous).await?;
            format::print_created(&room);
        }
        ClientAction::DeleteRoom { room } => {
            broker.delete_room(RoomId(room)).await?;
            format::print_deleted(room);
        }
        ClientAction::Date => {
            println!("{}", broker.get_date().await?);
        }
    }

    Ok(())
}

/// Room lifecycle needs the admin role; everything else is a plain client.
fn role_for(action: &ClientAction) -> Role {
    match action {
        ClientAction::CreateRoom { .. } | ClientAction::DeleteRoom { .. } => Role::Admin,
        _ => Role::Client,
    }
}
