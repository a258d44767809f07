//! Plain-text transcript format: one `[role] content` line per message.
//!
//! Multi-line messages are written as-is, so only their first line survives
//! a re-import; continuation lines do not start with a role marker.

use super::{Message, Role};

pub fn export(messages: &[Message]) -> String {
    let mut output = String::new();
    for message in messages {
        output.push_str(&format!("[{}] {}\n", message.role.as_str(), message.content));
    }
    output
}

pub fn import(text: &str) -> Vec<Message> {
    text.lines()
        .filter_map(|line| {
            if let Some(content) = line.strip_prefix("[user] ") {
                Some(Message {
                    role: Role::User,
                    content: content.to_string(),
                })
            } else {
                line.strip_prefix("[model] ").map(|content| Message {
                    role: Role::Model,
                    content: content.to_string(),
                })
            }
        })
        .collect()
}
