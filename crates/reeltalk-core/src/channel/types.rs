//! Channel-agnostic event and message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which kind of update produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DirectMessage,
    EditedMessage,
    ChannelPost,
    CallbackAction,
}

/// Kind of chat an event arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    /// Map a Telegram `chat.type` value.
    pub fn from_telegram(value: &str) -> Option<Self> {
        match value {
            "private" => Some(Self::Private),
            "group" => Some(Self::Group),
            "supergroup" => Some(Self::Supergroup),
            "channel" => Some(Self::Channel),
            _ => None,
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, Self::Private)
    }
}

/// The message an event replies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyReference {
    pub message_id: i64,
    pub sender_id: Option<String>,
    /// Handle of the replied-to sender, without the leading `@`.
    pub sender_handle: Option<String>,
    pub sender_is_bot: bool,
}

/// Kind of a marked span inside the message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Mention,
    BotCommand,
    Other(String),
}

impl SpanKind {
    pub fn from_telegram(value: &str) -> Self {
        match value {
            "mention" => Self::Mention,
            "bot_command" => Self::BotCommand,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A marked sub-range of the text.
///
/// `offset` and `length` count UTF-16 code units, which is how Telegram
/// reports entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkedSpan {
    pub offset: usize,
    pub length: usize,
    pub kind: SpanKind,
}

impl MarkedSpan {
    pub fn mention(offset: usize, length: usize) -> Self {
        Self {
            offset,
            length,
            kind: SpanKind::Mention,
        }
    }

    /// Substring of `text` covered by this span, or `None` when the span
    /// runs past the end of the text.
    pub fn slice(&self, text: &str) -> Option<String> {
        let units: Vec<u16> = text.encode_utf16().collect();
        let end = self.offset.checked_add(self.length)?;
        if end > units.len() {
            return None;
        }
        String::from_utf16(&units[self.offset..end]).ok()
    }
}

/// Payload of a selected inline option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackData {
    /// Identifier used to acknowledge the callback.
    pub id: String,
    /// Opaque token registered when the option was offered.
    pub token: String,
}

/// A normalized inbound chat event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub kind: EventKind,
    pub chat_id: Option<String>,
    pub chat_kind: Option<ChatKind>,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub text: Option<String>,
    pub message_id: i64,
    pub reply_to: Option<ReplyReference>,
    pub spans: Vec<MarkedSpan>,
    pub callback: Option<CallbackData>,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    /// Create a text event.
    pub fn message(
        kind: EventKind,
        chat_id: impl Into<String>,
        chat_kind: ChatKind,
        sender_id: impl Into<String>,
        message_id: i64,
        text: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            chat_id: Some(chat_id.into()),
            chat_kind: Some(chat_kind),
            sender_id: sender_id.into(),
            sender_name: None,
            text: Some(text.into()),
            message_id,
            reply_to: None,
            spans: Vec::new(),
            callback: None,
            received_at: Utc::now(),
        }
    }

    /// Create a callback event for a selected inline option.
    pub fn callback(
        callback_id: impl Into<String>,
        token: impl Into<String>,
        chat_id: impl Into<String>,
        sender_id: impl Into<String>,
        message_id: i64,
    ) -> Self {
        Self {
            kind: EventKind::CallbackAction,
            chat_id: Some(chat_id.into()),
            chat_kind: None,
            sender_id: sender_id.into(),
            sender_name: None,
            text: None,
            message_id,
            reply_to: None,
            spans: Vec::new(),
            callback: Some(CallbackData {
                id: callback_id.into(),
                token: token.into(),
            }),
            received_at: Utc::now(),
        }
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: ReplyReference) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    pub fn with_span(mut self, span: MarkedSpan) -> Self {
        self.spans.push(span);
        self
    }

    /// Display name for logs, falling back to the sender id.
    pub fn display_name(&self) -> &str {
        self.sender_name.as_deref().unwrap_or(&self.sender_id)
    }
}

/// A canned prompt offered as a selectable option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectablePrompt {
    pub label: String,
    pub token: String,
}

impl SelectablePrompt {
    pub fn new(label: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            token: token.into(),
        }
    }
}

/// Outbound reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub chat_id: String,
    pub text: String,
    /// Message being answered; `None` or `0` sends without a reply link.
    pub reply_to: Option<i64>,
    /// Selectable options shown under the message.
    pub prompts: Vec<SelectablePrompt>,
}

impl OutboundMessage {
    pub fn new(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            text: text.into(),
            reply_to: None,
            prompts: Vec::new(),
        }
    }

    pub fn with_reply_to(mut self, message_id: i64) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    pub fn with_prompts(mut self, prompts: Vec<SelectablePrompt>) -> Self {
        self.prompts = prompts;
        self
    }

    /// Reply target if it refers to a real message.
    pub fn reply_target(&self) -> Option<i64> {
        self.reply_to.filter(|id| *id != 0)
    }
}
