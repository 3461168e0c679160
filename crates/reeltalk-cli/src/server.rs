//! Webhook HTTP server
//!
//! Telegram posts updates to `/webhook`. Each update is converted and handed
//! to the dispatcher on its own task so the webhook answers immediately.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use reeltalk_core::Dispatcher;
use reeltalk_core::channel::TelegramUpdate;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Shared state for webhook handlers
#[derive(Clone)]
pub struct WebhookState {
    pub dispatcher: Arc<Dispatcher>,
}

pub fn webhook_router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", post(receive_update))
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn receive_update(State(state): State<WebhookState>, body: Bytes) -> StatusCode {
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!(error = %e, "Rejecting malformed update");
            return StatusCode::BAD_REQUEST;
        }
    };

    let update_id = update.update_id;
    let Some(event) = update.into_event() else {
        debug!(update_id, "Update carries nothing to handle");
        return StatusCode::OK;
    };

    tokio::spawn(async move {
        match state.dispatcher.handle(&event).await {
            Ok(outcome) => debug!(update_id, ?outcome, "Turn finished"),
            Err(e) => error!(update_id, sender = %event.sender_id, error = %e, "Turn failed"),
        }
    });

    StatusCode::OK
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

pub struct HttpServer {
    config: HttpConfig,
    state: WebhookState,
}

impl HttpServer {
    pub fn new(config: HttpConfig, state: WebhookState) -> Self {
        Self { config, state }
    }

    /// Serve until `shutdown` fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let app = webhook_router(self.state.clone()).layer(TraceLayer::new_for_http());
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("Webhook server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                info!("Webhook server shutting down");
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use reeltalk_core::testing::{
        MockAnswerClient, MockInteractionLogger, MockKnowledgeClient, MockSender,
    };
    use reeltalk_core::{DispatcherConfig, DispatcherDeps};
    use tower::ServiceExt;

    fn create_test_state() -> (WebhookState, Arc<MockSender>) {
        let sender = Arc::new(MockSender::new());
        let dispatcher = Dispatcher::new(
            DispatcherConfig::default(),
            DispatcherDeps {
                sender: sender.clone(),
                knowledge: Some(Arc::new(MockKnowledgeClient::new())),
                answers: Arc::new(MockAnswerClient::new("Try a smaller hook.")),
                logger: Arc::new(MockInteractionLogger::new()),
                health: None,
            },
        );
        (
            WebhookState {
                dispatcher: Arc::new(dispatcher),
            },
            sender,
        )
    }

    fn post_webhook(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (state, _) = create_test_state();
        let response = webhook_router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let (state, sender) = create_test_state();
        let response = webhook_router(state)
            .oneshot(post_webhook("{not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(sender.send_count(), 0);
    }

    #[tokio::test]
    async fn test_update_without_payload_is_accepted() {
        let (state, sender) = create_test_state();
        let response = webhook_router(state)
            .oneshot(post_webhook(r#"{"update_id": 1}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(sender.send_count(), 0);
    }

    #[tokio::test]
    async fn test_private_message_is_answered_in_background() {
        let (state, sender) = create_test_state();
        let update = r#"{
            "update_id": 10,
            "message": {
                "message_id": 5,
                "from": {"id": 42, "is_bot": false, "first_name": "Ana", "username": "ana"},
                "chat": {"id": 42, "type": "private"},
                "text": "best knot for braid?"
            }
        }"#;

        let response = webhook_router(state)
            .oneshot(post_webhook(update))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        for _ in 0..100 {
            if sender.send_count() > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, "42");
        assert_eq!(sent[0].reply_to, Some(5));
        assert!(sent[0].text.starts_with("Try a smaller hook."));
    }
}
