//! Telegram Bot API adapter
//!
//! Converts webhook updates into [`InboundEvent`]s and delivers replies via
//! `sendMessage`, including inline keyboards for selectable prompts.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::traits::OutboundSender;
use super::types::{
    CallbackData, ChatKind, EventKind, InboundEvent, MarkedSpan, OutboundMessage, ReplyReference,
    SpanKind,
};
use crate::error::{ClientError, Result};
use crate::http_client::build_http_client;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
/// Default timeout for Telegram API calls (seconds)
const API_TIMEOUT_SECS: u64 = 10;
/// Timeout for callback acknowledgements (seconds)
const ACK_TIMEOUT_SECS: u64 = 5;

/// Telegram channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token from @BotFather
    pub bot_token: String,
    /// API base URL, overridable for tests
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Send timeout in seconds
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

fn default_api_base() -> String {
    TELEGRAM_API_BASE.to_string()
}

fn default_send_timeout() -> u64 {
    API_TIMEOUT_SECS
}

impl TelegramConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            api_base: default_api_base(),
            send_timeout_secs: default_send_timeout(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout_secs = timeout.as_secs().max(1);
        self
    }
}

/// Sends replies through the Telegram Bot API.
pub struct TelegramSender {
    config: TelegramConfig,
    client: Client,
}

impl TelegramSender {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: build_http_client(),
        }
    }

    pub fn with_token(bot_token: impl Into<String>) -> Self {
        Self::new(TelegramConfig::new(bot_token))
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    fn build_send_params(message: &OutboundMessage) -> serde_json::Value {
        let mut params = serde_json::json!({
            "chat_id": message.chat_id,
            "text": message.text,
            "parse_mode": "Markdown",
            "disable_web_page_preview": true,
        });

        if let Some(reply_id) = message.reply_target() {
            params["reply_to_message_id"] = serde_json::Value::Number(reply_id.into());
        }

        if !message.prompts.is_empty() {
            let rows: Vec<serde_json::Value> = message
                .prompts
                .iter()
                .map(|prompt| {
                    serde_json::json!([{
                        "text": prompt.label,
                        "callback_data": prompt.token,
                    }])
                })
                .collect();
            params["reply_markup"] = serde_json::json!({ "inline_keyboard": rows });
        }

        params
    }

    async fn call(
        &self,
        method: &str,
        params: &serde_json::Value,
        timeout: Duration,
    ) -> Result<()> {
        let response = self
            .client
            .post(self.api_url(method))
            .json(params)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                service: "telegram",
                status: status.as_u16(),
                body,
            });
        }

        let api_response: TelegramResponse<serde_json::Value> = response.json().await?;
        if api_response.ok {
            Ok(())
        } else {
            Err(ClientError::Api {
                service: "telegram",
                message: api_response.description.unwrap_or_default(),
            })
        }
    }
}

#[async_trait]
impl OutboundSender for TelegramSender {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let params = Self::build_send_params(message);
        self.call(
            "sendMessage",
            &params,
            Duration::from_secs(self.config.send_timeout_secs),
        )
        .await?;
        debug!("Sent Telegram message to {}", message.chat_id);
        Ok(())
    }

    async fn acknowledge_callback(&self, callback_id: &str) -> Result<()> {
        let params = serde_json::json!({ "callback_query_id": callback_id });
        if let Err(err) = self
            .call(
                "answerCallbackQuery",
                &params,
                Duration::from_secs(ACK_TIMEOUT_SECS),
            )
            .await
        {
            warn!(error = %err, "Failed to acknowledge Telegram callback");
        }
        Ok(())
    }
}

// ============================================================================
// Telegram API Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    #[allow(dead_code)]
    result: Option<T>,
    description: Option<String>,
}

/// Incoming webhook update.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
    pub edited_message: Option<TelegramMessage>,
    pub channel_post: Option<TelegramMessage>,
    pub callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: Option<TelegramChat>,
    #[serde(default)]
    pub date: i64,
    pub text: Option<String>,
    pub reply_to_message: Option<Box<TelegramMessage>>,
    #[serde(default)]
    pub entities: Vec<TelegramEntity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramEntity {
    pub offset: usize,
    pub length: usize,
    #[serde(rename = "type")]
    pub entity_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramCallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    pub data: Option<String>,
    pub message: Option<TelegramMessage>,
}

impl TelegramUser {
    fn display_name(&self) -> String {
        self.username
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.first_name.clone())
    }
}

impl TelegramUpdate {
    /// Normalize the update. Returns `None` when the update carries no
    /// message, edit, channel post or callback.
    pub fn into_event(self) -> Option<InboundEvent> {
        if let Some(query) = self.callback_query {
            return Some(convert_callback(query));
        }

        let (kind, message) = if let Some(message) = self.message {
            (EventKind::DirectMessage, message)
        } else if let Some(message) = self.edited_message {
            (EventKind::EditedMessage, message)
        } else if let Some(message) = self.channel_post {
            (EventKind::ChannelPost, message)
        } else {
            debug!("Update {} has no message payload", self.update_id);
            return None;
        };

        Some(convert_message(kind, message))
    }
}

fn convert_message(kind: EventKind, message: TelegramMessage) -> InboundEvent {
    let chat_id = message.chat.as_ref().map(|chat| chat.id.to_string());
    let chat_kind = message
        .chat
        .as_ref()
        .and_then(|chat| ChatKind::from_telegram(&chat.chat_type));

    // Channel posts have no `from`; the channel itself is the sender.
    let sender_id = message
        .from
        .as_ref()
        .map(|user| user.id.to_string())
        .or_else(|| chat_id.clone())
        .unwrap_or_default();

    let reply_to = message.reply_to_message.as_deref().map(|replied| ReplyReference {
        message_id: replied.message_id,
        sender_id: replied.from.as_ref().map(|user| user.id.to_string()),
        sender_handle: replied.from.as_ref().and_then(|user| user.username.clone()),
        sender_is_bot: replied.from.as_ref().is_some_and(|user| user.is_bot),
    });

    let spans = message
        .entities
        .iter()
        .map(|entity| MarkedSpan {
            offset: entity.offset,
            length: entity.length,
            kind: SpanKind::from_telegram(&entity.entity_type),
        })
        .collect();

    InboundEvent {
        kind,
        chat_id,
        chat_kind,
        sender_id,
        sender_name: message.from.as_ref().map(TelegramUser::display_name),
        text: message.text.filter(|text| !text.is_empty()),
        message_id: message.message_id,
        reply_to,
        spans,
        callback: None,
        received_at: Utc
            .timestamp_opt(message.date, 0)
            .single()
            .filter(|_| message.date > 0)
            .unwrap_or_else(Utc::now),
    }
}

fn convert_callback(query: TelegramCallbackQuery) -> InboundEvent {
    let (chat_id, chat_kind, message_id) = match &query.message {
        Some(message) => (
            message.chat.as_ref().map(|chat| chat.id.to_string()),
            message
                .chat
                .as_ref()
                .and_then(|chat| ChatKind::from_telegram(&chat.chat_type)),
            message.message_id,
        ),
        None => (None, None, 0),
    };

    InboundEvent {
        kind: EventKind::CallbackAction,
        chat_id,
        chat_kind,
        sender_id: query.from.id.to_string(),
        sender_name: Some(query.from.display_name()),
        text: None,
        message_id,
        reply_to: None,
        spans: Vec::new(),
        callback: Some(CallbackData {
            id: query.id,
            token: query.data.unwrap_or_default(),
        }),
        received_at: Utc::now(),
    }
}
