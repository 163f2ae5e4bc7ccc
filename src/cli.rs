use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::pipeline::HandlerKind;

#[derive(Parser)]
#[command(name = "chatroomd", about = "Long-poll chat room daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the chat daemon
    Serve {
        /// Message pipeline variant
        #[arg(long, value_enum, default_value_t = HandlerKind::Buffered)]
        handler: HandlerKind,

        /// Recent messages kept in memory per room
        #[arg(long, default_value_t = 50, value_parser = clap::value_parser!(u32).range(1..))]
        ring_capacity: u32,

        /// Maximum message length in characters
        #[arg(long, default_value_t = 5000)]
        max_content_len: usize,

        /// Longest a message long-poll may block
        #[arg(long, default_value_t = 20)]
        poll_timeout_secs: u64,

        /// How long a presence poll waits for a change
        #[arg(long, default_value_t = 8)]
        presence_refresh_secs: u64,

        /// Participants unseen for this long are dropped
        #[arg(long, default_value_t = 60)]
        presence_staleness_secs: u64,

        /// Socket path (default: $XDG_RUNTIME_DIR/chatroomd/broker.sock)
        #[arg(long)]
        socket: Option<PathBuf>,
    },

    /// One-shot requests against a running daemon
    Client {
        /// Socket path (default: $XDG_RUNTIME_DIR/chatroomd/broker.sock)
        #[arg(long, global = true)]
        socket: Option<PathBuf>,

        #[command(subcommand)]
        action: ClientAction,
    },
}

#[derive(Subcommand)]
pub enum ClientAction {
    /// Post a message to a room
    Send {
        room: u64,
        /// Author label
        #[arg(long, short)]
        username: String,
        content: String,
    },

    /// Long-poll for messages newer than --since
    Get {
        room: u64,
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        since: i64,
        /// Shorter wait than the daemon's poll timeout
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Print the newest message id (-1 if none)
    Latest { room: u64 },

    /// Full stored history, not limited to the recent window
    History {
        room: u64,
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        since: i64,
    },

    /// Wait for presence changes, then list who is here
    Who {
        room: u64,
        #[arg(long, short)]
        username: String,
    },

    /// Mark a participant as present
    Touch {
        room: u64,
        #[arg(long, short)]
        username: String,
    },

    /// List rooms
    Rooms,

    /// Create a room (connects as admin)
    CreateRoom {
        name: String,
        slug: String,
        /// Allow guests without an account
        #[arg(long)]
        anonymous: bool,
    },

    /// Delete a room, releasing its waiters (connects as admin)
    DeleteRoom { room: u64 },

    /// Print the daemon's clock
    Date,
}
