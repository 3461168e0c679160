//! Dispatcher - drives one inbound event through a complete turn.
//!
//! A turn is classified first. Ignored traffic stops there and is never
//! logged. Commands and callbacks are answered directly, while questions go
//! through the usage limiter, the sender's conversation, the knowledge base
//! (when healthy) or the generative model, the composer and the sender. The
//! interaction log is written on a separate task.
//!
//! The usage limiter admits or rejects a question before anything else, and
//! its check-then-record is atomic per sender. Admitted turns for the same
//! sender are then serialised by a per-sender async lock so the conversation
//! load-then-store is linearizable. The turn budget only starts once that
//! lock is held. Turns for different senders never wait on each other.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::classifier::{Intent, classify};
use super::commands::{Command, CommandContext, handle_command};
use super::composer::{AnswerSource, ResponseComposer, TELEGRAM_MAX_LEN, render_knowledge_answer};
use super::conversation::{ConversationStore, DEFAULT_TTL};
use super::health::{DEFAULT_PROBE_INTERVAL, DEFAULT_PROBE_TIMEOUT, DependencyHealthMonitor, HealthProbe};
use super::keywords::{determine_categories, extract_keywords, identify_taxonomy};
use super::limiter::{DEFAULT_LIMIT, DEFAULT_WINDOW, UsageLimiter, UsageLimiterConfig};
use super::prompts::PromptRegistry;
use crate::channel::{InboundEvent, OutboundMessage, OutboundSender, SelectablePrompt};
use crate::error::{ClientError, DispatchError};
use crate::interaction_log::{InteractionLogger, InteractionRecord, TurnOutcomeKind};
use crate::knowledge::{KnowledgeClient, KnowledgeEntry};
use crate::llm::{AnswerClient, Message};

/// System utterance seeding every new conversation.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant specialized in fishing techniques and knowledge.";

pub const UNRECOGNIZED_ACTION: &str = "Sorry, I didn't recognize that action.";

/// Resolved settings for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Accepted questions per window.
    pub limit: usize,
    pub window: Duration,
    /// Idle time after which a conversation is forgotten.
    pub conversation_ttl: Duration,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    /// Channel text limit in characters.
    pub max_text_len: usize,
    /// Sender ids exempt from the usage limit and allowed to train.
    pub unmetered: HashSet<String>,
    pub knowledge_enabled: bool,
    /// Bot handle used for mention matching, with or without `@`.
    pub bot_handle: String,
    pub lookup_timeout: Duration,
    pub send_timeout: Duration,
    pub generative_timeout: Duration,
    /// Wall-clock budget for a whole question turn.
    pub turn_budget: Duration,
    pub system_prompt: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            window: DEFAULT_WINDOW,
            conversation_ttl: DEFAULT_TTL,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_text_len: TELEGRAM_MAX_LEN,
            unmetered: HashSet::new(),
            knowledge_enabled: true,
            bot_handle: String::new(),
            lookup_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
            generative_timeout: Duration::from_secs(15),
            turn_budget: Duration::from_secs(45),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl DispatcherConfig {
    pub fn limiter_config(&self) -> UsageLimiterConfig {
        UsageLimiterConfig {
            limit: self.limit,
            window: self.window,
            unmetered: self.unmetered.clone(),
        }
    }

    /// Build a health monitor using the configured probe interval and timeout.
    pub fn health_monitor(&self, probe: Arc<dyn HealthProbe>) -> Arc<DependencyHealthMonitor> {
        Arc::new(
            DependencyHealthMonitor::new(probe, self.probe_interval)
                .with_probe_timeout(self.probe_timeout),
        )
    }
}

/// External collaborators, injected at construction.
pub struct DispatcherDeps {
    pub sender: Arc<dyn OutboundSender>,
    /// `None` when no knowledge base is configured.
    pub knowledge: Option<Arc<dyn KnowledgeClient>>,
    pub answers: Arc<dyn AnswerClient>,
    pub logger: Arc<dyn InteractionLogger>,
    /// Without a monitor the knowledge base is always treated as healthy.
    pub health: Option<Arc<DependencyHealthMonitor>>,
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Ignored,
    CommandHandled,
    CallbackRejected,
    RateLimited,
    AnsweredFromKnowledgeBase,
    AnsweredGeneratively,
}

/// An answer ready to be stored and composed.
struct Answer {
    text: String,
    source: Option<AnswerSource>,
    outcome: TurnOutcome,
}

/// Where to send the reply for the current turn.
struct ReplyTarget<'a> {
    chat_id: &'a str,
    message_id: i64,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    deps: DispatcherDeps,
    limiter: UsageLimiter,
    conversations: Arc<ConversationStore>,
    prompts: PromptRegistry,
    composer: ResponseComposer,
    turn_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, deps: DispatcherDeps) -> Self {
        Self {
            limiter: UsageLimiter::new(config.limiter_config()),
            conversations: Arc::new(ConversationStore::new(config.conversation_ttl)),
            prompts: PromptRegistry::new(),
            composer: ResponseComposer::new(config.max_text_len),
            turn_locks: DashMap::new(),
            config,
            deps,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn limiter(&self) -> &UsageLimiter {
        &self.limiter
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    pub fn prompts(&self) -> &PromptRegistry {
        &self.prompts
    }

    /// Whether the health monitor currently reports the knowledge base down.
    pub fn knowledge_down(&self) -> bool {
        self.deps
            .health
            .as_ref()
            .is_some_and(|health| health.is_down())
    }

    /// Start the conversation sweep and, when configured, the health
    /// monitor. Both stop when `shutdown` is cancelled.
    pub fn spawn_background_tasks(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = vec![self.conversations.spawn_sweeper(shutdown.clone())];
        if let Some(health) = &self.deps.health {
            handles.push(health.spawn(shutdown));
        }
        handles
    }

    /// Handle one inbound event.
    ///
    /// Only upstream answer failures, turn timeouts and delivery failures
    /// are returned as errors; everything else is answered in the chat or
    /// dropped silently.
    pub async fn handle(&self, event: &InboundEvent) -> Result<TurnOutcome, DispatchError> {
        match classify(event, &self.config.bot_handle) {
            Intent::Ignore => {
                debug!(sender = %event.sender_id, "Ignoring event");
                Ok(TurnOutcome::Ignored)
            }
            Intent::Command { name, args } => {
                let Some(target) = reply_target(event) else {
                    return Ok(self.invalid(event, "command without chat"));
                };
                self.dispatch_command(event, &target, Command::parse(&name, &args))
                    .await
            }
            Intent::CallbackAction(token) => self.dispatch_callback(event, &token).await,
            Intent::DirectQuestion(question) => {
                let Some(target) = reply_target(event) else {
                    return Ok(self.invalid(event, "question without chat"));
                };
                self.dispatch_question(event, &target, question).await
            }
        }
    }

    fn invalid(&self, event: &InboundEvent, reason: &str) -> TurnOutcome {
        let err = DispatchError::InvalidEventStructure(reason.to_string());
        debug!(sender = %event.sender_id, error = %err, "Dropping event");
        TurnOutcome::Ignored
    }

    async fn dispatch_command(
        &self,
        event: &InboundEvent,
        target: &ReplyTarget<'_>,
        command: Command,
    ) -> Result<TurnOutcome, DispatchError> {
        let ctx = CommandContext {
            knowledge: self.deps.knowledge.as_deref(),
            knowledge_enabled: self.config.knowledge_enabled,
            prompts: &self.prompts,
            sender_unmetered: self.limiter.is_unmetered(&event.sender_id),
            call_timeout: self.config.lookup_timeout,
        };
        let reply = handle_command(&ctx, command).await;
        if let Some(rejection) = &reply.rejection {
            info!(sender = %event.sender_id, reason = %rejection, "Command rejected");
        }

        self.deliver(target, reply.text, reply.prompts).await?;
        Ok(TurnOutcome::CommandHandled)
    }

    async fn dispatch_callback(
        &self,
        event: &InboundEvent,
        token: &str,
    ) -> Result<TurnOutcome, DispatchError> {
        if let Some(callback) = &event.callback {
            // Acknowledgement failures are swallowed by the sender.
            let _ = self.deps.sender.acknowledge_callback(&callback.id).await;
        }

        let Some(target) = reply_target(event) else {
            return Ok(self.invalid(event, "callback without chat"));
        };

        match self.prompts.resolve(token) {
            Some(prompt) => {
                debug!(sender = %event.sender_id, token, "Resolved selectable prompt");
                self.dispatch_question(event, &target, prompt).await
            }
            None => {
                info!(sender = %event.sender_id, token, "Unrecognized callback token");
                self.deliver(&target, UNRECOGNIZED_ACTION.to_string(), Vec::new())
                    .await?;
                Ok(TurnOutcome::CallbackRejected)
            }
        }
    }

    async fn dispatch_question(
        &self,
        event: &InboundEvent,
        target: &ReplyTarget<'_>,
        question: String,
    ) -> Result<TurnOutcome, DispatchError> {
        let keywords = extract_keywords(&question);

        // Atomic per sender; a limited question never queues for the lock.
        if let Err(retry_in) = self.limiter.try_acquire(&event.sender_id) {
            self.reject_rate_limited(event, target, &question, keywords, retry_in)
                .await;
            return Ok(TurnOutcome::RateLimited);
        }

        let lock = self
            .turn_locks
            .entry(event.sender_id.clone())
            .or_default()
            .clone();

        // The budget starts once the lock is held. Each admitted turn ahead
        // holds it for at most one budget.
        let budget = self.config.turn_budget;
        let result = {
            let _turn = lock.lock().await;
            timeout(
                budget,
                self.answer_question(event, target, &question, &keywords),
            )
            .await
        };

        drop(lock);
        self.turn_locks
            .remove_if(&event.sender_id, |_, lock| Arc::strong_count(lock) == 1);

        match result {
            Ok(outcome) => outcome,
            Err(_) => {
                let err = DispatchError::TurnTimeout(budget);
                warn!(sender = %event.sender_id, error = %err, "Turn abandoned");
                self.log_interaction(self.record(
                    event,
                    &question,
                    keywords,
                    None,
                    TurnOutcomeKind::Failed,
                ));
                Err(err)
            }
        }
    }

    async fn reject_rate_limited(
        &self,
        event: &InboundEvent,
        target: &ReplyTarget<'_>,
        question: &str,
        keywords: Vec<String>,
        retry_in: Duration,
    ) {
        let limited = DispatchError::RateLimited { retry_in };
        info!(sender = %event.sender_id, reason = %limited, "Question rate limited");

        let text = self.rate_limit_message(retry_in);
        if let Err(err) = self.deliver(target, text, Vec::new()).await {
            warn!(error = %err, "Failed to send rate limit message");
        }
        self.log_interaction(self.record(
            event,
            question,
            keywords,
            None,
            TurnOutcomeKind::RateLimited,
        ));
    }

    /// Context, lookup or generation, reply. Runs under the sender's turn
    /// lock once the question has been admitted by the limiter.
    async fn answer_question(
        &self,
        event: &InboundEvent,
        target: &ReplyTarget<'_>,
        question: &str,
        keywords: &[String],
    ) -> Result<TurnOutcome, DispatchError> {
        let mut history = self
            .conversations
            .get(&event.sender_id)
            .unwrap_or_else(|| vec![Message::system(self.config.system_prompt.clone())]);
        history.push(Message::user(question));

        let started = Instant::now();
        let answer = match self.lookup_knowledge(question).await {
            Some(entry) => Answer {
                text: render_knowledge_answer(&entry),
                source: Some(AnswerSource::from(&entry)),
                outcome: TurnOutcome::AnsweredFromKnowledgeBase,
            },
            None => match self.generate(&history).await {
                Ok(text) => Answer {
                    text,
                    source: None,
                    outcome: TurnOutcome::AnsweredGeneratively,
                },
                Err(err) => {
                    warn!(sender = %event.sender_id, error = %err, "No answer produced");
                    self.log_interaction(self.record(
                        event,
                        question,
                        keywords.to_vec(),
                        None,
                        TurnOutcomeKind::Failed,
                    ));
                    return Err(err);
                }
            },
        };
        let elapsed = started.elapsed();

        history.push(Message::assistant(answer.text.clone()));
        self.conversations.set(&event.sender_id, history);

        let text = self.composer.compose(&answer.text, answer.source.as_ref());
        self.deliver(target, text, Vec::new()).await?;

        info!(
            sender = %event.sender_id,
            outcome = ?answer.outcome,
            elapsed_ms = elapsed.as_millis() as u64,
            "Question answered"
        );

        let kind = match answer.outcome {
            TurnOutcome::AnsweredFromKnowledgeBase => TurnOutcomeKind::AnsweredFromKnowledgeBase,
            _ => TurnOutcomeKind::AnsweredGeneratively,
        };
        self.log_interaction(self.record(event, question, keywords.to_vec(), Some(elapsed), kind));
        Ok(answer.outcome)
    }

    /// Top knowledge-base entry, or `None` when the lookup is skipped, fails
    /// or finds nothing. A failed lookup asks the health monitor to re-probe
    /// so later turns stop calling a dead dependency.
    async fn lookup_knowledge(&self, question: &str) -> Option<KnowledgeEntry> {
        if !self.config.knowledge_enabled {
            return None;
        }
        let knowledge = self.deps.knowledge.as_ref()?;
        if self.knowledge_down() {
            debug!("Knowledge base is down, skipping lookup");
            return None;
        }

        let params = identify_taxonomy(question).into_query(question);
        let err = match timeout(self.config.lookup_timeout, knowledge.lookup(&params)).await {
            Ok(Ok(entries)) => {
                if entries.is_empty() {
                    debug!("Knowledge base had no entry for the question");
                }
                return entries.into_iter().next();
            }
            Ok(Err(err)) => DispatchError::DependencyUnavailable(err.to_string()),
            Err(_) => DispatchError::DependencyUnavailable(format!(
                "lookup timed out after {:?}",
                self.config.lookup_timeout
            )),
        };

        warn!(error = %err, "Knowledge lookup failed, falling back to generative answer");
        if let Some(health) = &self.deps.health {
            health.request_probe();
        }
        None
    }

    async fn generate(&self, history: &[Message]) -> Result<String, DispatchError> {
        let limit = self.config.generative_timeout;
        match timeout(limit, self.deps.answers.answer(history)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(err)) => Err(DispatchError::UpstreamAnswerFailed(err)),
            Err(_) => Err(DispatchError::UpstreamAnswerFailed(ClientError::Timeout(
                "generative answer",
                limit,
            ))),
        }
    }

    fn rate_limit_message(&self, retry_in: Duration) -> String {
        let secs = retry_in.as_secs();
        format!(
            "Thanks for using ReelTalkBot. We restrict to {} messages per {} minutes to keep costs low and allow everyone to use the tool. Please try again in {} minutes and {} seconds.",
            self.config.limit,
            self.config.window.as_secs() / 60,
            secs / 60,
            secs % 60
        )
    }

    async fn deliver(
        &self,
        target: &ReplyTarget<'_>,
        text: String,
        prompts: Vec<SelectablePrompt>,
    ) -> Result<(), DispatchError> {
        let message = OutboundMessage::new(target.chat_id, text)
            .with_reply_to(target.message_id)
            .with_prompts(prompts);

        match timeout(self.config.send_timeout, self.deps.sender.send(&message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(DispatchError::Send(err)),
            Err(_) => Err(DispatchError::Send(ClientError::Timeout(
                "telegram send",
                self.config.send_timeout,
            ))),
        }
    }

    /// Build a log record. Rate-limited attempts keep their keywords but
    /// carry no summary or categories.
    fn record(
        &self,
        event: &InboundEvent,
        question: &str,
        keywords: Vec<String>,
        elapsed: Option<Duration>,
        outcome: TurnOutcomeKind,
    ) -> InteractionRecord {
        let is_rate_limited = outcome == TurnOutcomeKind::RateLimited;
        let (keyword_summary, categories) = if is_rate_limited {
            (String::new(), String::new())
        } else {
            (keywords.join(", "), determine_categories(&keywords))
        };

        InteractionRecord {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            user_id: event.sender_id.clone(),
            username: event.display_name().to_string(),
            prompt: question.to_string(),
            keywords,
            keyword_summary,
            categories,
            response_time_ms: elapsed.map(|elapsed| elapsed.as_millis() as u64),
            is_rate_limited,
            outcome,
        }
    }

    /// Write `record` on its own task; failures are only reported.
    fn log_interaction(&self, record: InteractionRecord) {
        let logger = Arc::clone(&self.deps.logger);
        tokio::spawn(async move {
            if let Err(err) = logger.append(&record).await {
                let err = DispatchError::LoggingFailed(err);
                warn!(user = %record.user_id, error = %err, "Interaction not logged");
            }
        });
    }
}

fn reply_target(event: &InboundEvent) -> Option<ReplyTarget<'_>> {
    event.chat_id.as_deref().map(|chat_id| ReplyTarget {
        chat_id,
        message_id: event.message_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChatKind, EventKind};
    use crate::testing::{MockAnswerClient, MockInteractionLogger, MockKnowledgeClient, MockSender};

    struct Harness {
        sender: Arc<MockSender>,
        knowledge: Arc<MockKnowledgeClient>,
        answers: Arc<MockAnswerClient>,
        dispatcher: Dispatcher,
    }

    fn harness(config: DispatcherConfig, knowledge: MockKnowledgeClient) -> Harness {
        let sender = Arc::new(MockSender::new());
        let knowledge = Arc::new(knowledge);
        let answers = Arc::new(MockAnswerClient::new("Use a lighter leader."));
        let dispatcher = Dispatcher::new(
            config,
            DispatcherDeps {
                sender: sender.clone(),
                knowledge: Some(knowledge.clone()),
                answers: answers.clone(),
                logger: Arc::new(MockInteractionLogger::new()),
                health: None,
            },
        );
        Harness {
            sender,
            knowledge,
            answers,
            dispatcher,
        }
    }

    fn private(sender: &str, message_id: i64, text: &str) -> InboundEvent {
        InboundEvent::message(
            EventKind::DirectMessage,
            "chat-1",
            ChatKind::Private,
            sender,
            message_id,
            text,
        )
    }

    #[tokio::test]
    async fn test_rate_limit_message_format() {
        let h = harness(DispatcherConfig::default(), MockKnowledgeClient::new());
        let text = h.dispatcher.rate_limit_message(Duration::from_secs(4 * 60 + 7));
        assert!(text.contains("We restrict to 10 messages per 10 minutes"));
        assert!(text.ends_with("Please try again in 4 minutes and 7 seconds."));
    }

    #[tokio::test]
    async fn test_answer_replies_to_question_message() {
        let h = harness(DispatcherConfig::default(), MockKnowledgeClient::new());
        let outcome = h.dispatcher.handle(&private("u1", 77, "tippet size?")).await.unwrap();

        assert_eq!(outcome, TurnOutcome::AnsweredGeneratively);
        let sent = h.sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, "chat-1");
        assert_eq!(sent[0].reply_to, Some(77));
        assert!(sent[0].text.starts_with("Use a lighter leader."));
        assert_eq!(h.knowledge.lookup_calls(), 1);
    }

    #[tokio::test]
    async fn test_knowledge_disabled_skips_lookup() {
        let config = DispatcherConfig {
            knowledge_enabled: false,
            ..Default::default()
        };
        let h = harness(config, MockKnowledgeClient::new());
        h.dispatcher.handle(&private("u1", 1, "hello")).await.unwrap();
        assert_eq!(h.knowledge.lookup_calls(), 0);
        assert_eq!(h.answers.calls(), 1);
    }

    #[tokio::test]
    async fn test_lookup_query_carries_taxonomy_hints() {
        let h = harness(DispatcherConfig::default(), MockKnowledgeClient::new());
        h.dispatcher
            .handle(&private("u1", 1, "Steelhead on the Salmon River?"))
            .await
            .unwrap();

        let queries = h.knowledge.queries();
        assert_eq!(queries[0].fish_species, "steelhead");
        assert_eq!(queries[0].body_of_water, "salmon river");
        assert_eq!(queries[0].query, "Steelhead on the Salmon River?");
    }

    #[tokio::test]
    async fn test_send_failure_propagates() {
        let sender = Arc::new(MockSender::failing());
        let dispatcher = Dispatcher::new(
            DispatcherConfig::default(),
            DispatcherDeps {
                sender,
                knowledge: None,
                answers: Arc::new(MockAnswerClient::new("answer")),
                logger: Arc::new(MockInteractionLogger::new()),
                health: None,
            },
        );
        let err = dispatcher
            .handle(&private("u1", 1, "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Send(_)));
        assert!(err.propagates());
    }

    #[tokio::test]
    async fn test_commands_do_not_consume_quota() {
        let config = DispatcherConfig {
            limit: 1,
            ..Default::default()
        };
        let h = harness(config, MockKnowledgeClient::new());
        for id in 0..3 {
            let outcome = h.dispatcher.handle(&private("u1", id, "/help")).await.unwrap();
            assert_eq!(outcome, TurnOutcome::CommandHandled);
        }
        assert_eq!(h.sender.sent()[0].prompts.len(), 3);

        let outcome = h.dispatcher.handle(&private("u1", 9, "question")).await.unwrap();
        assert_eq!(outcome, TurnOutcome::AnsweredGeneratively);
    }

    #[tokio::test]
    async fn test_turn_locks_are_released() {
        let h = harness(DispatcherConfig::default(), MockKnowledgeClient::new());
        h.dispatcher.handle(&private("u1", 1, "one")).await.unwrap();
        h.dispatcher.handle(&private("u2", 2, "two")).await.unwrap();
        assert!(h.dispatcher.turn_locks.is_empty());
    }
}
