use serde::{Deserialize, Serialize};

/// Who produced a chat turn, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Assistant,
    System,
}

/// One chat turn as delivered by the host's message feed (or read back from
/// its message log).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub author: Author,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            author: Author::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            author: Author::Assistant,
            text: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            author: Author::System,
            text: text.into(),
        }
    }

    /// AI-authored replies are the only turns the diary flow considers.
    pub fn is_assistant(&self) -> bool {
        self.author == Author::Assistant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_assistant_turns_qualify() {
        assert!(ChatMessage::assistant("reply").is_assistant());
        assert!(!ChatMessage::user("prompt").is_assistant());
        assert!(!ChatMessage::system("notice").is_assistant());
    }

    #[test]
    fn author_serde_labels() {
        let json = serde_json::to_string(&Author::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let back: Author = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(back, Author::User);
    }
}
