use serde::Deserialize;

/// One event pushed by Telegram. Every field is optional on the wire so a
/// partial payload still decodes; `{}` is an update with no message.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Update {
    #[serde(default)]
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Message {
    #[serde(default)]
    pub message_id: i32,
    #[serde(default, alias = "sender")]
    pub from: Option<User>,
    #[serde(default)]
    pub chat: Option<Chat>,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct User {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
pub struct Chat {
    pub id: i64,
}

impl Update {
    pub fn from_slice(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }
}

impl Message {
    /// True for text that should be routed to the command handlers.
    pub fn is_command(&self) -> bool {
        self.text.starts_with('/')
    }

    /// Chat a reply should go to. Private chats share the user's id, so the
    /// sender is the fallback when the payload carries no chat.
    pub fn recipient(&self) -> Option<i64> {
        self.chat
            .map(|c| c.id)
            .or_else(|| self.from.as_ref().and_then(|u| i64::try_from(u.id).ok()))
            .filter(|id| *id != 0)
    }

    /// Name used in log lines
    pub fn sender_name(&self) -> &str {
        match &self.from {
            Some(User {
                username: Some(name),
                ..
            }) => name.as_str(),
            Some(user) if !user.first_name.is_empty() => user.first_name.as_str(),
            _ => "unknown",
        }
    }
}
