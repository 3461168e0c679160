//! Relay runtime: per-turn governance and the dispatcher that drives it.

pub mod classifier;
pub mod commands;
pub mod composer;
pub mod conversation;
pub mod dispatcher;
pub mod health;
pub mod keywords;
pub mod limiter;
pub mod prompts;

pub use classifier::{Intent, classify};
pub use composer::ResponseComposer;
pub use conversation::ConversationStore;
pub use health::{DependencyHealthMonitor, HealthProbe, HealthState, KnowledgeProbe};
pub use limiter::{UsageLimiter, UsageLimiterConfig};
pub use prompts::PromptRegistry;
