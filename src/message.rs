use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Payload passed between stages
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Message {
    #[default]
    Null,
    Text(String),
    Binary(Vec<u8>),
    Json(serde_json::Value),
}

impl Message {
    pub fn is_null(&self) -> bool {
        matches!(self, Message::Null)
    }

    /// String form of the payload; binary content is decoded lossily
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Message::Null => Cow::Borrowed(""),
            Message::Text(s) => Cow::Borrowed(s),
            Message::Binary(b) => String::from_utf8_lossy(b),
            Message::Json(v) => Cow::Owned(v.to_string()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Message::Null => 0,
            Message::Text(s) => s.len(),
            Message::Binary(b) => b.len(),
            Message::Json(v) => v.to_string().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::Text(s)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Message {
    fn from(b: Vec<u8>) -> Self {
        Message::Binary(b)
    }
}

impl From<serde_json::Value> for Message {
    fn from(v: serde_json::Value) -> Self {
        Message::Json(v)
    }
}
