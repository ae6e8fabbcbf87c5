//! HTTP client for the feedback API.
//!
//! Configuration is via environment variables:
//! - `COIN_URL` - Base URL (default: `http://localhost:17020/api/v1`)
//! - `COIN_API_KEY` - API key for authentication (optional for local)

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::models::*;

/// Default URL for local development.
pub const DEFAULT_URL: &str = "http://localhost:17020/api/v1";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: API key required or invalid")]
    Unauthorized,

    #[error("Server error: {0}")]
    Server(String),
}

#[derive(Debug, Clone)]
pub struct FeedbackClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl FeedbackClient {
    pub fn from_env() -> Self {
        let base_url = std::env::var("COIN_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        let api_key = std::env::var("COIN_API_KEY").ok().filter(|k| !k.is_empty());
        Self::new(base_url, api_key)
    }

    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method, &url);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => ClientError::NotFound(body),
            StatusCode::BAD_REQUEST => ClientError::BadRequest(body),
            StatusCode::CONFLICT => ClientError::Conflict(body),
            StatusCode::UNAUTHORIZED => ClientError::Unauthorized,
            _ => ClientError::Server(format!("{}: {}", status, body)),
        })
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        Ok(Self::check(response).await?.json().await?)
    }

    // ============================================================
    // Health / Standards
    // ============================================================

    pub async fn health(&self) -> Result<(), ClientError> {
        let response = self.request(reqwest::Method::GET, "/health").send().await?;
        Self::check(response).await.map(|_| ())
    }

    pub async fn list_standards(&self) -> Result<Vec<serde_json::Value>, ClientError> {
        let response = self.request(reqwest::Method::GET, "/standards").send().await?;
        self.handle_response(response).await
    }

    // ============================================================
    // Session Operations
    // ============================================================

    pub async fn create_session(
        &self,
        session_id: Option<String>,
    ) -> Result<SessionProgress, ClientError> {
        let response = self
            .request(reqwest::Method::POST, "/sessions")
            .json(&CreateSessionInput { session_id })
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn get_record(&self, session_id: &str) -> Result<SessionRecord, ClientError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/sessions/{}", session_id))
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn get_progress(&self, session_id: &str) -> Result<SessionProgress, ClientError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/sessions/{}/progress", session_id))
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn advance(
        &self,
        session_id: &str,
        standard_id: i64,
    ) -> Result<SessionProgress, ClientError> {
        let response = self
            .request(reqwest::Method::POST, &format!("/sessions/{}/advance", session_id))
            .json(&AdvanceInput { standard_id })
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn reset(&self, session_id: &str) -> Result<SessionProgress, ClientError> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/sessions/{}", session_id))
            .send()
            .await?;
        self.handle_response(response).await
    }

    // ============================================================
    // Feedback / Report
    // ============================================================

    pub async fn submit(
        &self,
        session_id: &str,
        standard_id: i64,
        feedback_text: &str,
    ) -> Result<FeedbackResponse, ClientError> {
        let response = self
            .request(reqwest::Method::POST, &format!("/sessions/{}/feedback", session_id))
            .json(&SubmitFeedbackInput {
                standard_id,
                feedback_text: feedback_text.to_string(),
            })
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn report(&self, session_id: &str) -> Result<FinalReport, ClientError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/sessions/{}/report", session_id))
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn report_text(&self, session_id: &str) -> Result<String, ClientError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/sessions/{}/report?format=text", session_id),
            )
            .send()
            .await?;
        Ok(Self::check(response).await?.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = FeedbackClient::new("http://localhost:9000/api/v1/", None);
        assert_eq!(client.base_url(), "http://localhost:9000/api/v1");
    }
}
