//! Dispatch and governance core for the ReelTalk chat relay.
//!
//! Inbound chat events are classified, rate limited, enriched with the
//! sender's recent conversation, answered from the knowledge base when it is
//! healthy (falling back to a generative model otherwise), composed for the
//! channel and logged.

pub mod channel;
pub mod error;
pub mod interaction_log;
pub mod knowledge;
pub mod llm;
pub mod runtime;

mod http_client;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use error::{ClientError, DispatchError};
pub use runtime::dispatcher::{Dispatcher, DispatcherConfig, DispatcherDeps, TurnOutcome};
