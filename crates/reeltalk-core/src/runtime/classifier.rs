//! Message classifier - decides what, if anything, to do with an event.

use crate::channel::{EventKind, InboundEvent, SpanKind};

/// Classified intent of an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Nothing to act on.
    Ignore,
    /// A slash command; `args` is the remainder after the first whitespace.
    Command { name: String, args: String },
    /// Free text the bot should answer.
    DirectQuestion(String),
    /// A previously offered option was selected.
    CallbackAction(String),
}

/// Classify `event` for a bot whose handle is `bot_handle` (with or without
/// the leading `@`).
///
/// Rules, in order:
/// 1. Callbacks are always callbacks.
/// 2. No chat or no text → ignore.
/// 3. Text starting with `/` → command.
/// 4. Group traffic is only answered when the bot is mentioned or replied to.
/// 5. A matching mention is removed from the question text.
pub fn classify(event: &InboundEvent, bot_handle: &str) -> Intent {
    if event.kind == EventKind::CallbackAction {
        let token = event
            .callback
            .as_ref()
            .map(|callback| callback.token.clone())
            .unwrap_or_default();
        return Intent::CallbackAction(token);
    }

    let (Some(_), Some(text)) = (event.chat_id.as_deref(), event.text.as_deref()) else {
        return Intent::Ignore;
    };
    if text.is_empty() {
        return Intent::Ignore;
    }

    if let Some(stripped) = text.strip_prefix('/') {
        let (name, args) = match stripped.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (stripped, ""),
        };
        return Intent::Command {
            name: name.to_string(),
            args: args.to_string(),
        };
    }

    let handle = bot_handle.trim_start_matches('@');
    let mention = find_bot_mention(event, text, handle);

    let is_private = event.chat_kind.is_some_and(|kind| kind.is_private());
    let is_reply_to_bot = event.reply_to.as_ref().is_some_and(|reply| {
        reply.sender_is_bot
            && reply
                .sender_handle
                .as_deref()
                .is_none_or(|sender| handle.is_empty() || sender.eq_ignore_ascii_case(handle))
    });

    if mention.is_none() && !is_private && !is_reply_to_bot {
        return Intent::Ignore;
    }

    let question = match mention {
        Some(mention) => text.replacen(&mention, "", 1).trim().to_string(),
        None => text.to_string(),
    };
    Intent::DirectQuestion(question)
}

/// First mention span whose text equals `@handle`, ignoring case.
fn find_bot_mention(event: &InboundEvent, text: &str, handle: &str) -> Option<String> {
    if handle.is_empty() {
        return None;
    }
    let expected = format!("@{}", handle).to_lowercase();
    event
        .spans
        .iter()
        .filter(|span| span.kind == SpanKind::Mention)
        .filter_map(|span| span.slice(text))
        .find(|mention| mention.to_lowercase() == expected)
}
