//! The remote session store, as seen by the core.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::activity::{Activity, ActivityType};
use crate::session::{CreateSessionRequest, Session, Source};

/// Error from a session source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Chronological direction of an activity query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityOrder {
    #[default]
    Asc,
    Desc,
}

/// Activity selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityQuery {
    #[serde(default)]
    pub order: ActivityOrder,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_type: Option<ActivityType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl ActivityQuery {
    /// The most recent activity of one type.
    #[must_use]
    pub const fn latest_of(activity_type: ActivityType) -> Self {
        Self {
            order: ActivityOrder::Desc,
            activity_type: Some(activity_type),
            limit: Some(1),
        }
    }
}

/// Sort activities chronologically and apply a query.
///
/// The sort is stable: activities sharing a timestamp keep their log order,
/// and the descending view is the exact reverse of the ascending one.
#[must_use]
pub fn select_activities(mut activities: Vec<Activity>, query: &ActivityQuery) -> Vec<Activity> {
    activities.sort_by_key(|a| a.create_time);
    if query.order == ActivityOrder::Desc {
        activities.reverse();
    }
    activities
        .into_iter()
        .filter(|a| query.activity_type.is_none_or(|ty| a.activity_type() == ty))
        .take(query.limit.unwrap_or(usize::MAX))
        .collect()
}

/// One page of sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPage {
    pub sessions: Vec<Session>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// One page of connected repositories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePage {
    pub sources: Vec<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Read/write access to the remote session store.
///
/// Every read must reflect the remote's current state; implementations must
/// not serve stale snapshots across calls.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Fetch the current snapshot of a session.
    async fn get_session(&self, id: &str) -> Result<Session, SourceError>;

    /// List sessions, newest first.
    async fn list_sessions(
        &self,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<SessionPage, SourceError>;

    /// Refresh the activity log before derived reads.
    async fn hydrate(&self, _id: &str) -> Result<(), SourceError> {
        Ok(())
    }

    /// Fetch activities matching a query.
    async fn list_activities(
        &self,
        id: &str,
        query: &ActivityQuery,
    ) -> Result<Vec<Activity>, SourceError>;

    /// Start a new session.
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<Session, SourceError>;

    /// Approve the pending plan.
    async fn approve_plan(&self, id: &str) -> Result<(), SourceError>;

    /// Reject the pending plan.
    async fn reject_plan(&self, id: &str, feedback: Option<&str>) -> Result<(), SourceError>;

    /// Post a user message.
    async fn send_message(&self, id: &str, message: &str) -> Result<(), SourceError>;

    /// Cancel the session.
    async fn cancel_session(&self, id: &str) -> Result<(), SourceError>;

    /// List connected repositories.
    async fn list_sources(
        &self,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<SourcePage, SourceError>;

    /// Fetch one connected repository by its `owner/repo` name.
    async fn get_source(&self, repo: &str) -> Result<Source, SourceError>;
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::activity::ActivityKind;

    fn at(id: &str, secs: i64, kind: ActivityKind) -> Activity {
        Activity::new(id, Utc.timestamp_opt(secs, 0).unwrap(), kind)
    }

    fn message(text: &str) -> ActivityKind {
        ActivityKind::AgentMessaged {
            message: text.to_string(),
        }
    }

    fn ids(activities: &[Activity]) -> Vec<&str> {
        activities.iter().map(|a| a.id.as_str()).collect()
    }

    #[test]
    fn test_select_sorts_stably() {
        let log = vec![
            at("c", 3, message("c")),
            at("a1", 1, message("a1")),
            at("a2", 1, message("a2")),
        ];
        let asc = select_activities(log.clone(), &ActivityQuery::default());
        assert_eq!(ids(&asc), ["a1", "a2", "c"]);

        let desc = select_activities(
            log,
            &ActivityQuery {
                order: ActivityOrder::Desc,
                ..ActivityQuery::default()
            },
        );
        assert_eq!(ids(&desc), ["c", "a2", "a1"]);
    }

    #[test]
    fn test_select_latest_of_type() {
        let log = vec![
            at("m", 1, message("hi")),
            at("p", 2, ActivityKind::SessionCompleted),
            at("n", 3, message("bye")),
        ];
        let latest = select_activities(log, &ActivityQuery::latest_of(ActivityType::AgentMessaged));
        assert_eq!(ids(&latest), ["n"]);
    }

    #[test]
    fn test_select_empty() {
        assert!(select_activities(Vec::new(), &ActivityQuery::latest_of(ActivityType::PlanGenerated)).is_empty());
    }
}
