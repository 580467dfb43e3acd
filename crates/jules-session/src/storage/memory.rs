//! In-memory session source.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{PoisonError, RwLock},
};

use async_trait::async_trait;
use chrono::Utc;
use jules_core::{
    Activity, ActivityKind, ActivityQuery, CreateSessionRequest, Session, SessionPage,
    SessionSource, Source, SourceContext, SourceError, SourcePage, select_activities,
    session::{GithubRepoContext, source_name},
};
use uuid::Uuid;

/// In-memory session source.
///
/// Stands in for the remote API in tests and local demos. Mutations record
/// the matching activities, the way the remote would.
pub struct MemorySource {
    sessions: RwLock<HashMap<String, Session>>,
    activities: RwLock<HashMap<String, Vec<Activity>>>,
    sources: RwLock<BTreeMap<String, Source>>,
}

impl MemorySource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            activities: RwLock::new(HashMap::new()),
            sources: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert or replace a session snapshot.
    pub fn insert_session(&self, session: Session) {
        self.activities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session.id.clone())
            .or_default();
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id.clone(), session);
    }

    /// Append an activity to a session's log.
    pub fn push_activity(&self, session_id: &str, activity: Activity) {
        self.activities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id.to_string())
            .or_default()
            .push(activity);
    }

    /// Connect a repository.
    pub fn insert_source(&self, source: Source) {
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.name.clone(), source);
    }

    /// Change a session's raw state.
    pub fn set_state(&self, session_id: &str, state: &str) {
        if let Some(session) = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(session_id)
        {
            session.state = state.to_string();
            session.update_time = Some(Utc::now());
        }
    }

    fn update_state(&self, id: &str, state: &str) -> Result<(), SourceError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| SourceError::Internal(e.to_string()))?;

        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SourceError::NotFound(id.to_string()))?;

        session.state = state.to_string();
        session.update_time = Some(Utc::now());
        Ok(())
    }

    fn record(&self, id: &str, kind: ActivityKind) -> Result<(), SourceError> {
        let mut activities = self
            .activities
            .write()
            .map_err(|e| SourceError::Internal(e.to_string()))?;

        let log = activities
            .get_mut(id)
            .ok_or_else(|| SourceError::NotFound(id.to_string()))?;

        log.push(Activity::new(Uuid::new_v4().simple().to_string(), Utc::now(), kind));
        Ok(())
    }
}

/// Offset-based page tokens.
fn page_offset(page_token: Option<&str>) -> Result<usize, SourceError> {
    page_token.map_or(Ok(0), |token| {
        token.parse::<usize>().map_err(|_| SourceError::Api {
            status: 400,
            message: format!("Invalid page token: {token}"),
        })
    })
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionSource for MemorySource {
    async fn get_session(&self, id: &str) -> Result<Session, SourceError> {
        self.sessions
            .read()
            .map_err(|e| SourceError::Internal(e.to_string()))?
            .get(id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }

    async fn list_sessions(
        &self,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<SessionPage, SourceError> {
        let offset = page_offset(page_token)?;

        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .map_err(|e| SourceError::Internal(e.to_string()))?
            .values()
            .cloned()
            .collect();

        // Newest first
        sessions.sort_by(|a, b| b.create_time.cmp(&a.create_time).then_with(|| a.id.cmp(&b.id)));

        let total = sessions.len();
        let page: Vec<Session> = sessions.into_iter().skip(offset).take(page_size).collect();
        let next = offset + page.len();

        Ok(SessionPage {
            sessions: page,
            next_page_token: (next < total).then(|| next.to_string()),
        })
    }

    async fn list_activities(
        &self,
        id: &str,
        query: &ActivityQuery,
    ) -> Result<Vec<Activity>, SourceError> {
        let log = self
            .activities
            .read()
            .map_err(|e| SourceError::Internal(e.to_string()))?
            .get(id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(id.to_string()))?;

        Ok(select_activities(log, query))
    }

    async fn create_session(&self, request: &CreateSessionRequest) -> Result<Session, SourceError> {
        let id = Uuid::new_v4().simple().to_string();
        let now = Utc::now();

        let source_context = request.repo.as_deref().map(|repo| SourceContext {
            source: source_name(repo),
            github_repo_context: request.branch.as_ref().map(|branch| GithubRepoContext {
                starting_branch: branch.clone(),
            }),
        });

        let session = Session {
            name: Some(format!("sessions/{id}")),
            title: request.title.clone().unwrap_or_default(),
            prompt: request.prompt.clone(),
            source_context,
            create_time: Some(now),
            update_time: Some(now),
            ..Session::new(id, "queued")
        };

        self.insert_session(session.clone());
        Ok(session)
    }

    async fn approve_plan(&self, id: &str) -> Result<(), SourceError> {
        self.record(id, ActivityKind::PlanApproved { plan_id: None })?;
        self.update_state(id, "inProgress")
    }

    async fn reject_plan(&self, id: &str, feedback: Option<&str>) -> Result<(), SourceError> {
        self.record(
            id,
            ActivityKind::PlanRejected {
                feedback: feedback.map(str::to_string),
            },
        )?;
        self.update_state(id, "planning")
    }

    async fn send_message(&self, id: &str, message: &str) -> Result<(), SourceError> {
        self.record(
            id,
            ActivityKind::UserMessaged {
                message: message.to_string(),
            },
        )
    }

    async fn cancel_session(&self, id: &str) -> Result<(), SourceError> {
        self.update_state(id, "cancelled")
    }

    async fn list_sources(
        &self,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<SourcePage, SourceError> {
        let offset = page_offset(page_token)?;
        let sources = self
            .sources
            .read()
            .map_err(|e| SourceError::Internal(e.to_string()))?;

        let page: Vec<Source> = sources.values().skip(offset).take(page_size).cloned().collect();
        let next = offset + page.len();
        Ok(SourcePage {
            sources: page,
            next_page_token: (next < sources.len()).then(|| next.to_string()),
        })
    }

    async fn get_source(&self, repo: &str) -> Result<Source, SourceError> {
        let name = source_name(repo);
        self.sources
            .read()
            .map_err(|e| SourceError::Internal(e.to_string()))?
            .get(&name)
            .cloned()
            .ok_or(SourceError::NotFound(name))
    }
}

#[cfg(test)]
mod tests {
    use jules_core::{ActivityType, SessionStatus};

    use super::*;

    #[tokio::test]
    async fn test_create_and_get() {
        let source = MemorySource::new();
        let request = CreateSessionRequest {
            prompt: "Fix the flaky test".to_string(),
            repo: Some("sources/github/octo/repo".to_string()),
            branch: Some("main".to_string()),
            ..CreateSessionRequest::default()
        };
        let created = source.create_session(&request).await.unwrap();
        let fetched = source.get_session(&created.id).await.unwrap();

        assert_eq!(fetched.prompt, "Fix the flaky test");
        assert_eq!(fetched.status(), SessionStatus::Busy);
        assert_eq!(
            fetched.source_context.as_ref().unwrap().source,
            "sources/github/octo/repo"
        );
        assert_eq!(fetched.branch(), Some("main"));
    }

    #[tokio::test]
    async fn test_missing_session() {
        let source = MemorySource::new();
        let result = source.get_session("nope").await;
        assert!(matches!(result, Err(SourceError::NotFound(id)) if id == "nope"));
        tokio_test::assert_err!(source.approve_plan("nope").await);
    }

    #[tokio::test]
    async fn test_mutations_record_activities() {
        let source = MemorySource::new();
        source.insert_session(Session::new("s1", "awaitingPlanApproval"));

        source.approve_plan("s1").await.unwrap();
        source.send_message("s1", "also add docs").await.unwrap();

        let activities = source.list_activities("s1", &ActivityQuery::default()).await.unwrap();
        let types: Vec<ActivityType> = activities.iter().map(Activity::activity_type).collect();
        assert_eq!(types, [ActivityType::PlanApproved, ActivityType::UserMessaged]);
        assert_eq!(source.get_session("s1").await.unwrap().state, "inProgress");

        source.cancel_session("s1").await.unwrap();
        assert!(source.get_session("s1").await.unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_list_sessions_pages() {
        let source = MemorySource::new();
        for i in 0..3 {
            source.insert_session(Session::new(format!("s{i}"), "completed"));
        }

        let first = source.list_sessions(2, None).await.unwrap();
        assert_eq!(first.sessions.len(), 2);
        let token = first.next_page_token.unwrap();

        let second = source.list_sessions(2, Some(&token)).await.unwrap();
        assert_eq!(second.sessions.len(), 1);
        assert!(second.next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_sources_page_and_lookup() {
        let source = MemorySource::new();
        source.insert_source(Source::github("octo", "web"));
        source.insert_source(Source::github("octo", "api"));
        source.insert_source(Source::github("acme", "cli"));

        let first = source.list_sources(2, None).await.unwrap();
        let names: Vec<Option<String>> = first.sources.iter().map(Source::full_name).collect();
        assert_eq!(names, [Some("acme/cli".to_string()), Some("octo/api".to_string())]);
        let second = source
            .list_sources(2, first.next_page_token.as_deref())
            .await
            .unwrap();
        assert_eq!(second.sources.len(), 1);
        assert!(second.next_page_token.is_none());

        let found = source.get_source("octo/api").await.unwrap();
        assert_eq!(found.name, "sources/github/octo/api");
        assert!(matches!(
            source.get_source("octo/missing").await,
            Err(SourceError::NotFound(name)) if name == "sources/github/octo/missing"
        ));
        assert!(source.list_sources(2, Some("x")).await.is_err());
    }
}
