//! Knowledge-base port and its HTTP client.

mod http;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use http::HttpKnowledgeClient;

/// Query sent to the knowledge base. Taxonomy hints are empty strings when
/// nothing in the question matched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParameters {
    pub body_of_water: String,
    pub fish_species: String,
    pub water_type: String,
    pub category: String,
    pub query: String,
}

impl QueryParameters {
    /// Query with no taxonomy hints.
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// A curated answer returned by the knowledge base.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeEntry {
    pub id: u64,
    pub kb_number: i64,
    pub body_of_water: String,
    pub fish_species: String,
    pub water_type: String,
    pub question_template: String,
    pub answer: String,
    pub category: String,
    pub sub_category: String,
    pub helpful_ratings: u32,
    pub not_helpful_ratings: u32,
}

/// New knowledge submitted through `/learn`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingEntry {
    pub category: String,
    pub sub_category: String,
    pub information: String,
}

/// Feedback on a knowledge-base answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rating {
    Helpful,
    NotHelpful,
}

impl Rating {
    /// Parse a user-supplied rating, ignoring case and surrounding space.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "helpful" => Some(Self::Helpful),
            "not helpful" => Some(Self::NotHelpful),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Helpful => "Helpful",
            Self::NotHelpful => "Not Helpful",
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured lookup, training and rating against the knowledge base.
#[async_trait]
pub trait KnowledgeClient: Send + Sync {
    async fn lookup(&self, params: &QueryParameters) -> Result<Vec<KnowledgeEntry>>;

    async fn train(&self, entry: &TrainingEntry) -> Result<()>;

    async fn rate(&self, kb_number: i64, rating: Rating) -> Result<()>;
}
