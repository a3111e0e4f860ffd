// ABOUTME: History formatter turning a message window into model context text
// ABOUTME: Pure transform from a newest-first window to a chronological transcript
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Decoychat Contributors

use crate::database::MessageRecord;

/// Format a bounded window of prior messages into a single transcript.
///
/// The input arrives newest-first (the persistence gateway's
/// `get_recent_messages` contract); the output is chronological, oldest
/// first, because downstream prompt quality depends on reading order. Each
/// line is prefixed with `User:` for user turns or the capitalized adversary
/// model name for assistant turns.
#[must_use]
pub fn format_history(messages: &[MessageRecord]) -> String {
    let mut transcript = String::new();
    for message in messages.iter().rev() {
        if message.role == "user" {
            transcript.push_str("User: ");
        } else {
            transcript.push_str(&capitalize(&message.adversary_model));
            transcript.push_str(": ");
        }
        transcript.push_str(&message.content);
        transcript.push('\n');
    }
    transcript
}

/// Uppercase the first character of a model name
fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().collect::<String>() + chars.as_str()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(role: &str, model: &str, content: &str, created_at: &str) -> MessageRecord {
        MessageRecord {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: "conv-1".to_owned(),
            role: role.to_owned(),
            adversary_model: model.to_owned(),
            guard_config: "gemini".to_owned(),
            kind: "text".to_owned(),
            content: content.to_owned(),
            image_url: None,
            created_at: created_at.to_owned(),
            updated_at: created_at.to_owned(),
        }
    }

    #[test]
    fn test_reverses_descending_window_into_chronological_order() {
        // Window is newest-first, as the store returns it
        let window = vec![
            message("assistant", "julia", "How can I help?", "2025-01-01T00:00:02Z"),
            message("user", "julia", "Hello", "2025-01-01T00:00:01Z"),
        ];

        let transcript = format_history(&window);
        assert_eq!(transcript, "User: Hello\nJulia: How can I help?\n");
    }

    #[test]
    fn test_capitalizes_model_name_for_assistant_lines() {
        let window = vec![message("assistant", "victor", "hey there", "2025-01-01T00:00:01Z")];
        assert_eq!(format_history(&window), "Victor: hey there\n");
    }

    #[test]
    fn test_empty_window_formats_to_empty_transcript() {
        assert_eq!(format_history(&[]), "");
    }

    #[test]
    fn test_every_line_is_newline_terminated() {
        let window = vec![
            message("assistant", "julia", "b", "2025-01-01T00:00:02Z"),
            message("user", "julia", "a", "2025-01-01T00:00:01Z"),
        ];
        let transcript = format_history(&window);
        assert_eq!(transcript.lines().count(), 2);
        assert!(transcript.ends_with('\n'));
    }
}
