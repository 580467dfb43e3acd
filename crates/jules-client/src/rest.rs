//! HTTP session source.

use std::collections::HashSet;

use async_trait::async_trait;
use jules_core::{
    Activity, ActivityQuery, ClientConfig, CreateSessionRequest, Session, SessionPage,
    SessionSource, Source, SourceError, SourcePage, select_activities, source_name,
};
use reqwest::{Client, Method, StatusCode};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::wire::{
    WireActivityPage, WireCreateSession, WireSession, WireSessionPage, WireSourcePage,
};

const API_KEY_HEADER: &str = "X-Goog-Api-Key";
const ACTIVITY_PAGE_SIZE: usize = 100;

/// [`SessionSource`] backed by the Jules REST API.
///
/// Holds no cached state; every call hits the API.
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    config: ClientConfig,
}

impl RestClient {
    /// Create a client for the given configuration.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, SourceError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn request<T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<T, SourceError>
    where
        T: DeserializeOwned,
    {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| SourceError::Unauthorized("JULES_API_KEY is required".to_string()))?;

        debug!(%method, path, "Jules API request");
        let mut request = self
            .http
            .request(method, self.url(path))
            .header(API_KEY_HEADER, api_key)
            .query(query);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Transport(format!(
                    "Request timed out after {}ms",
                    self.config.request_timeout.as_millis()
                ))
            } else {
                SourceError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        if !status.is_success() {
            warn!(%status, path, "Jules API error");
            return Err(status_error(status, path, text));
        }

        let text = if text.trim().is_empty() { "{}" } else { &text };
        serde_json::from_str(text).map_err(|e| SourceError::Decode(format!("{path}: {e}")))
    }

    async fn post_action(&self, id: &str, action: &str, body: Value) -> Result<(), SourceError> {
        self.request::<IgnoredAny>(Method::POST, &format!("sessions/{id}:{action}"), &[], Some(body))
            .await
            .map(|_| ())
    }

    /// Fetch every page of a session's activities.
    async fn fetch_activities(&self, id: &str) -> Result<Vec<Activity>, SourceError> {
        let path = format!("sessions/{id}/activities");
        let mut activities = Vec::new();
        let mut page_token: Option<String> = None;
        let mut seen_tokens = HashSet::new();

        loop {
            let mut query = vec![("pageSize", ACTIVITY_PAGE_SIZE.to_string())];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }

            let page: WireActivityPage = self.request(Method::GET, &path, &query, None).await?;
            for wire in page.activities {
                activities.push(Activity::try_from(wire)?);
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) if !seen_tokens.insert(token.clone()) => {
                    warn!(session_id = id, %token, "Repeated activity page token");
                    break;
                }
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(session_id = id, count = activities.len(), "Fetched activities");
        Ok(activities)
    }
}

fn status_error(status: StatusCode, path: &str, body: String) -> SourceError {
    let message = if body.trim().is_empty() {
        format!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        )
    } else {
        body
    };
    match status {
        StatusCode::NOT_FOUND => SourceError::NotFound(path.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Unauthorized(message),
        _ => SourceError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl SessionSource for RestClient {
    async fn get_session(&self, id: &str) -> Result<Session, SourceError> {
        let wire: WireSession = self
            .request(Method::GET, &format!("sessions/{id}"), &[], None)
            .await?;
        Session::try_from(wire)
    }

    async fn list_sessions(
        &self,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<SessionPage, SourceError> {
        let mut query = vec![("pageSize", page_size.to_string())];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        let wire: WireSessionPage = self.request(Method::GET, "sessions", &query, None).await?;
        SessionPage::try_from(wire)
    }

    async fn list_activities(
        &self,
        id: &str,
        query: &ActivityQuery,
    ) -> Result<Vec<Activity>, SourceError> {
        let activities = self.fetch_activities(id).await?;
        Ok(select_activities(activities, query))
    }

    async fn create_session(&self, request: &CreateSessionRequest) -> Result<Session, SourceError> {
        let body = serde_json::to_value(WireCreateSession::from(request))
            .map_err(|e| SourceError::Internal(e.to_string()))?;
        let wire: WireSession = self.request(Method::POST, "sessions", &[], Some(body)).await?;
        Session::try_from(wire)
    }

    async fn approve_plan(&self, id: &str) -> Result<(), SourceError> {
        self.post_action(id, "approvePlan", json!({})).await
    }

    async fn reject_plan(&self, id: &str, feedback: Option<&str>) -> Result<(), SourceError> {
        let body = feedback.map_or_else(|| json!({}), |feedback| json!({ "feedback": feedback }));
        self.post_action(id, "rejectPlan", body).await
    }

    async fn send_message(&self, id: &str, message: &str) -> Result<(), SourceError> {
        self.post_action(id, "sendMessage", json!({ "prompt": message }))
            .await
    }

    async fn cancel_session(&self, id: &str) -> Result<(), SourceError> {
        self.post_action(id, "cancel", json!({})).await
    }

    async fn list_sources(
        &self,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<SourcePage, SourceError> {
        let mut query = vec![("pageSize", page_size.to_string())];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        let wire: WireSourcePage = self.request(Method::GET, "sources", &query, None).await?;
        Ok(wire.into())
    }

    async fn get_source(&self, repo: &str) -> Result<Source, SourceError> {
        self.request(Method::GET, &source_name(repo), &[], None).await
    }
}
