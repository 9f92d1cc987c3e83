use chrono::{DateTime, Local, SubsecRound};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One visible turn of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

impl ChatMessage {
    pub fn now(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Local::now().trunc_subsecs(0),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::now(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::now(Role::Assistant, content)
    }

    /// `HH:MM:SS`, the way the transcript shows it.
    pub fn display_time(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn timestamps_have_second_precision() {
        let msg = ChatMessage::user("hi");
        assert_eq!(msg.timestamp.nanosecond(), 0);
        assert_eq!(msg.display_time().len(), 8);
    }

    #[test]
    fn role_serializes_lowercase() {
        let msg = ChatMessage::assistant("ok");
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["role"], "assistant");
        assert_eq!(Role::User.to_string(), "user");
    }
}
