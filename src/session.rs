use crate::message::Message;
use std::collections::HashMap;

/// Key under which the original input message is stored
pub const ORIGINAL_MESSAGE_KEY: &str = "originalMessage";
/// Key under which the message id is stored
pub const MESSAGE_ID_KEY: &str = "messageId";

/// Per-message context shared by every stage of one traversal.
///
/// A session belongs to exactly one traversal at a time and is handed to
/// stages as `&mut Session`; it is never shared between concurrent
/// traversals.
#[derive(Debug, Default, Clone)]
pub struct Session {
    values: HashMap<String, Message>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the session and seed it with the message and its id
    pub fn reset(&mut self, message: &Message, message_id: &str) {
        self.values.clear();
        self.values
            .insert(ORIGINAL_MESSAGE_KEY.to_string(), message.clone());
        self.values
            .insert(MESSAGE_ID_KEY.to_string(), Message::Text(message_id.to_string()));
    }

    pub fn message_id(&self) -> Option<String> {
        self.values.get(MESSAGE_ID_KEY).map(|m| m.to_string())
    }

    pub fn original_message(&self) -> Option<&Message> {
        self.values.get(ORIGINAL_MESSAGE_KEY)
    }

    pub fn get(&self, key: &str) -> Option<&Message> {
        self.values.get(key)
    }

    /// String form of a value, if present
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|m| m.to_string())
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Message>) -> Option<Message> {
        self.values.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Message> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}
