//! Channel plumbing: normalized events, the outbound sender port and the
//! Telegram adapter.

pub mod telegram;
mod traits;
mod types;

pub use telegram::{TelegramConfig, TelegramSender, TelegramUpdate};
pub use traits::OutboundSender;
pub use types::{
    CallbackData, ChatKind, EventKind, InboundEvent, MarkedSpan, OutboundMessage, ReplyReference,
    SelectablePrompt, SpanKind,
};
