//! Output formatting for CLI client commands.
//!
//! Human-readable tables and status lines on stdout.

use crate::ipc::protocol::{MessageDescriptor, PresenceDescriptor, RoomDescriptor};

use super::broker_client::PresenceResult;

pub fn print_messages(messages: &[MessageDescriptor]) {
    if messages.is_empty() {
        println!("No new messages");
        return;
    }
    for m in messages {
        println!("{}", format_message(m));
    }
}

pub fn print_sent(message_id: i64) {
    println!("Sent message {message_id}");
}

pub fn print_latest(message_id: i64) {
    if message_id < 0 {
        println!("No messages yet");
    } else {
        println!("{message_id}");
    }
}

pub fn print_presence(result: &PresenceResult) {
    println!("As of {} (refresh in {}s)", result.date, result.refresh);
    print_users(&result.users);
}

fn print_users(users: &[PresenceDescriptor]) {
    if users.is_empty() {
        println!("Nobody here");
        return;
    }
    println!("{:<32} LAST_SEEN", "USERNAME");
    println!("{}", "-".repeat(60));
    for u in users {
        println!("{:<32} {}", u.username, u.date);
    }
}

/// Print room descriptors as a table.
pub fn print_rooms(rooms: &[RoomDescriptor]) {
    if rooms.is_empty() {
        println!("No rooms");
        return;
    }
    println!("{:>6} {:<24} {:<24} ANON", "ID", "SLUG", "NAME");
    println!("{}", "-".repeat(62));
    for r in rooms {
        println!(
            "{:>6} {:<24} {:<24} {}",
            r.room_id,
            r.slug,
            r.name,
            if r.allow_anonymous { "yes" } else { "no" }
        );
    }
}

pub fn print_created(room: &RoomDescriptor) {
    println!("Created room {} ({})", room.room_id, room.slug);
}

pub fn print_deleted(room_id: u64) {
    println!("Deleted room {room_id}");
}

/// `[id] date <username> content`
fn format_message(m: &MessageDescriptor) -> String {
    format!("[{}] {} <{}> {}", m.message_id, m.date, m.username, m.content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_message_line() {
        let m = MessageDescriptor {
            message_id: 12,
            username: "john".into(),
            date: "2024-01-02T03:04:05:000006".into(),
            content: "ABCD".into(),
        };
        assert_eq!(
            format_message(&m),
            "[12] 2024-01-02T03:04:05:000006 <john> ABCD"
        );
    }
}
