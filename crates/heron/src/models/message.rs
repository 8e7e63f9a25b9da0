use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::content::Content;
use super::role::Role;

/// A message to or from an LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub created: i64,
    pub content: Vec<Content>,
}

impl Message {
    fn new(role: Role) -> Self {
        Message {
            role,
            created: Utc::now().timestamp(),
            content: Vec::new(),
        }
    }

    /// Create a new user message with the current timestamp
    pub fn user() -> Self {
        Message::new(Role::User)
    }

    /// Create a new assistant message with the current timestamp
    pub fn assistant() -> Self {
        Message::new(Role::Assistant)
    }

    /// Create a new system message with the current timestamp
    pub fn system() -> Self {
        Message::new(Role::System)
    }

    /// Add any content part to the message
    pub fn with_content(mut self, content: Content) -> Self {
        self.content.push(content);
        self
    }

    /// Add text content to the message
    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(Content::text(text))
    }

    /// Add image content to the message
    pub fn with_image<S: Into<String>, T: Into<String>>(self, data: S, mime_type: T) -> Self {
        self.with_content(Content::image(data, mime_type))
    }

    /// Add file content to the message
    pub fn with_file<S: Into<String>, T: Into<String>, U: Into<String>>(
        self,
        data: S,
        mime_type: T,
        filename: U,
    ) -> Self {
        self.with_content(Content::file(data, mime_type, filename))
    }

    /// The concatenated text parts of this message
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_builders() {
        let message = Message::user().with_text("hello").with_image("aGk=", "image/png");
        assert_eq!(message.role, Role::User);
        assert_eq!(message.content.len(), 2);
        assert_eq!(message.text(), "hello");
    }

    #[test]
    fn test_message_serialization_roundtrip() {
        let message = Message::assistant().with_text("done");
        let json = serde_json::to_string(&message).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(message, back);
    }
}
