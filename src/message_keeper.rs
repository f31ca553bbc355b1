use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// Severity of an operational notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageLevel {
    Info,
    Warn,
    Error,
}

/// One operational notice
#[derive(Debug, Clone, Serialize)]
pub struct KeptMessage {
    pub timestamp: DateTime<Utc>,
    pub level: MessageLevel,
    pub text: String,
}

impl fmt::Display for KeptMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} {}", self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"), self.level, self.text)
    }
}

/// Capped ring buffer of recent operational notices; the oldest entry is
/// dropped once the capacity is reached.
#[derive(Debug)]
pub struct MessageKeeper {
    messages: Mutex<VecDeque<KeptMessage>>,
    capacity: usize,
}

impl MessageKeeper {
    /// A capacity below 1 is raised to 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn add(&self, text: impl Into<String>, level: MessageLevel) {
        let mut messages = self.messages.lock();
        if messages.len() >= self.capacity {
            messages.pop_front();
        }
        messages.push_back(KeptMessage {
            timestamp: Utc::now(),
            level,
            text: text.into(),
        });
    }

    pub fn info(&self, text: impl Into<String>) {
        self.add(text, MessageLevel::Info);
    }

    /// Oldest first
    pub fn snapshot(&self) -> Vec<KeptMessage> {
        self.messages.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
