use crate::error::BoxError;
use crate::message::Message;
use chrono::{DateTime, SecondsFormat, Utc};
use std::error::Error as StdError;
use std::fmt::Write;

/// Object a formatted error is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLocation<'a> {
    Stage(&'a str),
    Adapter(&'a str),
}

impl ErrorLocation<'_> {
    fn kind(&self) -> &'static str {
        match self {
            ErrorLocation::Stage(_) => "stage",
            ErrorLocation::Adapter(_) => "adapter",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ErrorLocation::Stage(name) | ErrorLocation::Adapter(name) => name,
        }
    }
}

/// Everything known about a failed message
#[derive(Debug, Clone, Copy)]
pub struct ErrorContext<'a> {
    pub message: &'a str,
    pub cause: Option<&'a (dyn StdError + 'static)>,
    pub location: Option<ErrorLocation<'a>>,
    pub original_message: &'a Message,
    pub message_id: &'a str,
    pub received: DateTime<Utc>,
}

/// Turns a failed message into the result payload returned to the caller
pub trait ErrorMessageFormatter: Send + Sync {
    fn format(&self, context: &ErrorContext<'_>) -> Result<String, BoxError>;
}

/// Formats errors as an `<errorMessage>` document
#[derive(Debug, Clone)]
pub struct DefaultErrorMessageFormatter {
    originator: String,
}

impl DefaultErrorMessageFormatter {
    pub fn new() -> Self {
        Self {
            originator: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn with_originator(originator: impl Into<String>) -> Self {
        Self {
            originator: originator.into(),
        }
    }
}

impl Default for DefaultErrorMessageFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorMessageFormatter for DefaultErrorMessageFormatter {
    fn format(&self, context: &ErrorContext<'_>) -> Result<String, BoxError> {
        let mut details = String::new();
        let mut cause = context.cause;
        while let Some(err) = cause {
            if !details.is_empty() {
                details.push_str("; caused by: ");
            }
            details.push_str(&err.to_string());
            cause = err.source();
        }

        let mut message = context.message.to_string();
        if let Some(location) = context.location {
            write!(message, " in {} [{}]", location.kind(), location.name())?;
        }

        let mut out = String::new();
        writeln!(
            out,
            "<errorMessage timestamp=\"{}\" originator=\"{}\" message=\"{}\">",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            escape(&self.originator),
            escape(&message)
        )?;
        if let Some(location) = context.location {
            writeln!(
                out,
                "   <location class=\"{}\" name=\"{}\"/>",
                location.kind(),
                escape(location.name())
            )?;
        }
        if !details.is_empty() {
            writeln!(out, "   <details>{}</details>", escape(&details))?;
        }
        writeln!(
            out,
            "   <originalMessage messageId=\"{}\" receivedTime=\"{}\">{}</originalMessage>",
            escape(context.message_id),
            context.received.to_rfc3339_opts(SecondsFormat::Millis, true),
            escape(&context.original_message.as_text())
        )?;
        out.push_str("</errorMessage>");
        Ok(out)
    }
}

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;

    #[test]
    fn test_default_format_contains_context() {
        let cause = StageError::new("parse", "bad <input>");
        let original = Message::from("<req/>");
        let context = ErrorContext {
            message: "error during pipeline processing",
            cause: Some(&cause),
            location: Some(ErrorLocation::Stage("parse")),
            original_message: &original,
            message_id: "id-7",
            received: Utc::now(),
        };
        let text = DefaultErrorMessageFormatter::with_originator("unit").format(&context).unwrap();

        assert!(text.starts_with("<errorMessage"));
        assert!(text.contains("originator=\"unit\""));
        assert!(text.contains("<location class=\"stage\" name=\"parse\"/>"));
        assert!(text.contains("bad &lt;input&gt;"));
        assert!(text.contains("messageId=\"id-7\""));
        assert!(text.contains("&lt;req/&gt;"));
        assert!(text.ends_with("</errorMessage>"));
    }

    #[test]
    fn test_format_without_location_or_cause() {
        let original = Message::from("x");
        let context = ErrorContext {
            message: "illegal state",
            cause: None,
            location: None,
            original_message: &original,
            message_id: "id-8",
            received: Utc::now(),
        };
        let text = DefaultErrorMessageFormatter::new().format(&context).unwrap();
        assert!(!text.contains("<location"));
        assert!(!text.contains("<details>"));
    }
}
