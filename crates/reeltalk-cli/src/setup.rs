use std::sync::Arc;

use anyhow::{Context, Result};
use reeltalk_core::channel::{TelegramConfig, TelegramSender};
use reeltalk_core::interaction_log::{
    InteractionLogger, JsonlInteractionLogger, TracingInteractionLogger,
};
use reeltalk_core::knowledge::{HttpKnowledgeClient, KnowledgeClient};
use reeltalk_core::llm::OpenAIClient;
use reeltalk_core::runtime::KnowledgeProbe;
use reeltalk_core::{Dispatcher, DispatcherDeps};
use tracing::info;

use crate::config::BotConfig;

/// Build the dispatcher and its collaborators from a validated config.
pub fn build_dispatcher(config: &BotConfig) -> Result<Arc<Dispatcher>> {
    let dispatcher_config = config.dispatcher_config();

    let token = config
        .telegram
        .token
        .clone()
        .context("Telegram bot token is not configured")?;
    let mut telegram =
        TelegramConfig::new(token).with_send_timeout(dispatcher_config.send_timeout);
    if let Some(api_base) = &config.telegram.api_base {
        telegram = telegram.with_api_base(api_base);
    }

    let api_key = config
        .openai
        .api_key
        .clone()
        .context("OpenAI API key is not configured")?;
    let mut answers = OpenAIClient::new(api_key);
    if let Some(endpoint) = &config.openai.endpoint {
        answers = answers.with_base_url(endpoint);
    }
    if let Some(model) = &config.openai.model {
        answers = answers.with_model(model);
    }

    let knowledge = build_knowledge_client(config, &dispatcher_config);
    let health = knowledge.as_ref().map(|client| {
        dispatcher_config.health_monitor(Arc::new(KnowledgeProbe::new(client.clone())))
    });

    let logger: Arc<dyn InteractionLogger> = match &config.interaction_log_path {
        Some(path) => {
            info!(path = %path.display(), "Writing interaction log");
            Arc::new(JsonlInteractionLogger::new(path))
        }
        None => Arc::new(TracingInteractionLogger),
    };

    info!(
        knowledge_base = knowledge.is_some(),
        unmetered = dispatcher_config.unmetered.len(),
        "Dispatcher configured"
    );

    Ok(Arc::new(Dispatcher::new(
        dispatcher_config,
        DispatcherDeps {
            sender: Arc::new(TelegramSender::new(telegram)),
            knowledge,
            answers: Arc::new(answers),
            logger,
            health,
        },
    )))
}

fn build_knowledge_client(
    config: &BotConfig,
    dispatcher_config: &reeltalk_core::DispatcherConfig,
) -> Option<Arc<dyn KnowledgeClient>> {
    if !config.knowledge.enabled {
        return None;
    }
    let url = config.knowledge.url.as_deref()?;
    let api_key = config.knowledge.api_key.as_deref()?;

    let mut client =
        HttpKnowledgeClient::new(url, api_key).with_timeout(dispatcher_config.lookup_timeout);
    if let Some(endpoint) = &config.knowledge.train_endpoint {
        client = client.with_train_endpoint(endpoint);
    }
    Some(Arc::new(client))
}
