use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;

use super::{KnowledgeClient, KnowledgeEntry, QueryParameters, Rating, TrainingEntry};
use crate::error::{ClientError, Result};
use crate::http_client::build_http_client;

const API_KEY_HEADER: &str = "X-API-KEY";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
/// Placeholder taxonomy for entries trained through chat.
const GENERAL_TAXONOMY: &str = "General";

/// Knowledge-base microservice client
pub struct HttpKnowledgeClient {
    client: Client,
    base_url: String,
    train_endpoint: Option<String>,
    api_key: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct TrainingPayload<'a> {
    body_of_water: &'a str,
    fish_species: &'a str,
    water_type: &'a str,
    question_template: String,
    answer: &'a str,
    category: &'a str,
    sub_category: &'a str,
}

impl HttpKnowledgeClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: build_http_client(),
            base_url: base_url.into(),
            train_endpoint: None,
            api_key: api_key.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Override the training endpoint (defaults to `{base}/api/knowledge/train`).
    pub fn with_train_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.train_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post_json<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<Response> {
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .timeout(self.timeout)
            .send()
            .await?;
        Ok(response)
    }

    async fn status_error(response: Response) -> ClientError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        ClientError::Status {
            service: "knowledge base",
            status,
            body,
        }
    }
}

#[async_trait]
impl KnowledgeClient for HttpKnowledgeClient {
    async fn lookup(&self, params: &QueryParameters) -> Result<Vec<KnowledgeEntry>> {
        let response = self.post_json(&self.url("/api/knowledge"), params).await?;
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }
        Ok(response.json().await?)
    }

    async fn train(&self, entry: &TrainingEntry) -> Result<()> {
        let endpoint = self
            .train_endpoint
            .clone()
            .unwrap_or_else(|| self.url("/api/knowledge/train"));
        let payload = TrainingPayload {
            body_of_water: GENERAL_TAXONOMY,
            fish_species: GENERAL_TAXONOMY,
            water_type: GENERAL_TAXONOMY,
            question_template: format!("{}: {}", entry.category, entry.sub_category),
            answer: &entry.information,
            category: &entry.category,
            sub_category: &entry.sub_category,
        };

        let response = self.post_json(&endpoint, &payload).await?;
        // The training service acknowledges with exactly 200.
        if response.status() != reqwest::StatusCode::OK {
            return Err(Self::status_error(response).await);
        }
        Ok(())
    }

    async fn rate(&self, kb_number: i64, rating: Rating) -> Result<()> {
        let url = self.url(&format!("/api/knowledge/{}/rating", kb_number));
        let response = self
            .post_json(&url, &serde_json::json!({ "rating": rating.as_str() }))
            .await?;
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_lookup_posts_query_with_api_key() {
        let server = MockServer::start().await;
        let params = QueryParameters {
            body_of_water: "salmon river".into(),
            fish_species: "steelhead".into(),
            query: "best flies on the salmon river for steelhead".into(),
            ..Default::default()
        };
        Mock::given(method("POST"))
            .and(path("/api/knowledge"))
            .and(header("X-API-KEY", "secret"))
            .and(body_json(&params))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 1, "kb_number": 101, "question_template": "Steelhead flies",
                 "answer": "Egg patterns in fall.", "category": "Bait/Lures/Fly Selection",
                 "sub_category": "Steelhead"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpKnowledgeClient::new(server.uri(), "secret");
        let entries = client.lookup(&params).await.unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kb_number, 101);
        assert_eq!(entries[0].sub_category, "Steelhead");
    }

    #[tokio::test]
    async fn test_lookup_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let client = HttpKnowledgeClient::new(server.uri(), "secret");
        let err = client
            .lookup(&QueryParameters::text("hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_train_sends_general_taxonomy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/train"))
            .and(body_json(serde_json::json!({
                "body_of_water": "General",
                "fish_species": "General",
                "water_type": "General",
                "question_template": "Gear Selection: Fly Fishing",
                "answer": "Use a 9ft 8wt rod.",
                "category": "Gear Selection",
                "sub_category": "Fly Fishing"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpKnowledgeClient::new(server.uri(), "secret")
            .with_train_endpoint(format!("{}/train", server.uri()));
        let entry = TrainingEntry {
            category: "Gear Selection".into(),
            sub_category: "Fly Fishing".into(),
            information: "Use a 9ft 8wt rod.".into(),
        };
        client.train(&entry).await.unwrap();
    }

    #[tokio::test]
    async fn test_train_requires_exact_ok() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let client = HttpKnowledgeClient::new(server.uri(), "secret");
        let entry = TrainingEntry {
            category: "Timing".into(),
            sub_category: "Spring".into(),
            information: "Runs peak in April.".into(),
        };
        assert!(client.train(&entry).await.is_err());
    }

    #[tokio::test]
    async fn test_rate_posts_rating() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/knowledge/123/rating"))
            .and(body_json(serde_json::json!({"rating": "Not Helpful"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpKnowledgeClient::new(server.uri(), "secret");
        client.rate(123, Rating::NotHelpful).await.unwrap();
    }
}
