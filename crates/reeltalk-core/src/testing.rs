//! In-memory collaborators for dispatcher tests.
//!
//! Every mock counts its calls so tests can assert which dependencies a turn
//! touched.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::channel::{OutboundMessage, OutboundSender};
use crate::error::{ClientError, Result};
use crate::interaction_log::{InteractionLogger, InteractionRecord};
use crate::knowledge::{KnowledgeClient, KnowledgeEntry, QueryParameters, Rating, TrainingEntry};
use crate::llm::{AnswerClient, Message};
use crate::runtime::health::HealthProbe;

/// Records every outbound message and callback acknowledgement.
#[derive(Default)]
pub struct MockSender {
    sent: Mutex<Vec<OutboundMessage>>,
    acknowledged: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl MockSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let sender = Self::default();
        sender.fail.store(true, Ordering::SeqCst);
        sender
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn last_text(&self) -> Option<String> {
        self.sent.lock().last().map(|message| message.text.clone())
    }

    pub fn acknowledged(&self) -> Vec<String> {
        self.acknowledged.lock().clone()
    }
}

#[async_trait]
impl OutboundSender for MockSender {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::Status {
                service: "telegram",
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }

    async fn acknowledge_callback(&self, callback_id: &str) -> Result<()> {
        self.acknowledged.lock().push(callback_id.to_string());
        Ok(())
    }
}

/// Knowledge client returning a fixed set of entries, or failing on demand.
#[derive(Default)]
pub struct MockKnowledgeClient {
    entries: Vec<KnowledgeEntry>,
    fail: AtomicBool,
    delay: Option<Duration>,
    queries: Mutex<Vec<QueryParameters>>,
    lookup_calls: AtomicUsize,
    train_calls: AtomicUsize,
    rate_calls: AtomicUsize,
}

impl MockKnowledgeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<KnowledgeEntry>) -> Self {
        Self {
            entries,
            ..Self::default()
        }
    }

    pub fn failing(self) -> Self {
        self.fail.store(true, Ordering::SeqCst);
        self
    }

    /// Sleep before answering a lookup.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Switch failure mode at runtime.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    pub fn train_calls(&self) -> usize {
        self.train_calls.load(Ordering::SeqCst)
    }

    pub fn rate_calls(&self) -> usize {
        self.rate_calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<QueryParameters> {
        self.queries.lock().clone()
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::Api {
                service: "knowledge base",
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl KnowledgeClient for MockKnowledgeClient {
    async fn lookup(&self, params: &QueryParameters) -> Result<Vec<KnowledgeEntry>> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().push(params.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.check()?;
        Ok(self.entries.clone())
    }

    async fn train(&self, _entry: &TrainingEntry) -> Result<()> {
        self.train_calls.fetch_add(1, Ordering::SeqCst);
        self.check()
    }

    async fn rate(&self, _kb_number: i64, _rating: Rating) -> Result<()> {
        self.rate_calls.fetch_add(1, Ordering::SeqCst);
        self.check()
    }
}

/// Generative client with a canned answer.
pub struct MockAnswerClient {
    answer: String,
    fail: AtomicBool,
    delay: Option<Duration>,
    calls: AtomicUsize,
    histories: Mutex<Vec<Vec<Message>>>,
}

impl MockAnswerClient {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            fail: AtomicBool::new(false),
            delay: None,
            calls: AtomicUsize::new(0),
            histories: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        let client = Self::new("");
        client.fail.store(true, Ordering::SeqCst);
        client
    }

    /// Sleep before answering, to exercise timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn histories(&self) -> Vec<Vec<Message>> {
        self.histories.lock().clone()
    }
}

#[async_trait]
impl AnswerClient for MockAnswerClient {
    async fn answer(&self, history: &[Message]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.histories.lock().push(history.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::Status {
                service: "openai",
                status: 500,
                body: "upstream exploded".to_string(),
            });
        }
        Ok(self.answer.clone())
    }
}

/// Keeps interaction records in memory.
#[derive(Default)]
pub struct MockInteractionLogger {
    records: Mutex<Vec<InteractionRecord>>,
    fail: AtomicBool,
}

impl MockInteractionLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let logger = Self::default();
        logger.fail.store(true, Ordering::SeqCst);
        logger
    }

    pub fn records(&self) -> Vec<InteractionRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl InteractionLogger for MockInteractionLogger {
    async fn append(&self, record: &InteractionRecord) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::Io(std::io::Error::other("disk full")));
        }
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Health probe whose outcome tests can flip.
pub struct MockProbe {
    healthy: AtomicBool,
    calls: AtomicUsize,
}

impl MockProbe {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: AtomicBool::new(healthy),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for MockProbe {
    async fn probe(&self) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow::anyhow!("probe failed"))
        }
    }
}
