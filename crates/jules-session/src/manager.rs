//! Session manager: the operations exposed to the tool shell.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jules_core::{
    Activity, ActivityQuery, ActivityType, ClientConfig, CreateSessionRequest, PollResult, Session,
    SessionPage, SessionSource, SessionStatus, Source, SourceError, SourcePage,
    poll::retry,
    session::normalize_github_repo,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::diff::{DiffView, extract_diff};
use crate::reconcile::{ChangeFilter, ReconcileOptions, Reconciliation, reconcile_changes};
use crate::reducer::{
    ActivityInsights, ActivityLog, BashOutputs, LastActivity, LastAgentMessage, PendingPlan,
    PlanStatus,
};
use crate::waiters::{self, reply_text};

/// Default budget for plan waits.
pub const DEFAULT_PLAN_WAIT: Duration = Duration::from_millis(300_000);

pub const DEFAULT_PAGE_SIZE: usize = 25;
pub const MAX_PAGE_SIZE: usize = 100;

const CREATE_FETCH_ATTEMPTS: u32 = 3;
const CREATE_FETCH_DELAY: Duration = Duration::from_secs(1);

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
    #[error("{0} is required")]
    MissingArgument(&'static str),
}

fn require<'a>(value: &'a str, name: &'static str) -> Result<&'a str, ManagerError> {
    let value = value.trim();
    if value.is_empty() {
        Err(ManagerError::MissingArgument(name))
    } else {
        Ok(value)
    }
}

fn clamp_page_size(page_size: Option<usize>) -> usize {
    page_size
        .filter(|size| *size >= 1)
        .map_or(DEFAULT_PAGE_SIZE, |size| size.min(MAX_PAGE_SIZE))
}

/// Pull request reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrRef {
    pub url: String,
    pub title: String,
}

impl PrRef {
    fn of(session: &Session) -> Option<Self> {
        session.pull_request().map(|pr| Self {
            url: pr.url.clone(),
            title: pr.title.clone(),
        })
    }
}

/// Derived state of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub id: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr: Option<PrRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<LastActivity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_agent_message: Option<LastAgentMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_plan: Option<PendingPlan>,
}

/// Derive the state view from a snapshot and its log.
#[must_use]
pub fn derive_session_state(session: &Session, log: &ActivityLog) -> SessionState {
    SessionState {
        id: session.id.clone(),
        status: session.status(),
        url: session.url.clone(),
        title: session.title.clone(),
        prompt: (!session.prompt.is_empty()).then(|| session.prompt.clone()),
        pr: PrRef::of(session),
        last_activity: log.last_activity(),
        last_agent_message: log.last_agent_message(),
        pending_plan: log.pending_plan(),
    }
}

/// How much context a review carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDetail {
    /// Files only.
    Minimal,
    /// Files, timing and insights.
    #[default]
    Standard,
    /// Everything, including per-type activity counts.
    Full,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(default)]
    pub filter: ChangeFilter,
    #[serde(default)]
    pub detail: ReviewDetail,
}

/// Code review context of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewChanges {
    pub session_id: String,
    pub title: String,
    pub state: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub changes: Reconciliation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr: Option<PrRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insights: Option<ActivityInsights>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_counts: Option<BTreeMap<ActivityType, usize>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowDiffOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
}

/// Diff of a session or one of its activities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowDiff {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(flatten)]
    pub diff: DiffView,
}

/// Explicit overrides for a wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitOptions {
    pub interval: Option<Duration>,
    pub max_duration: Option<Duration>,
}

/// A user action on a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
    /// Approve the pending plan.
    Approve,
    /// Post a message.
    Send(String),
    /// Post a message and wait for the agent's reply.
    Ask(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
}

/// Result of creating (and maybe awaiting) a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAndWait {
    /// Latest known snapshot.
    pub session: Session,
    pub waited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll: Option<PollResult<Session>>,
}

/// Plan of a session and where it stands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPlan {
    pub session_id: String,
    pub status: PlanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Activity>,
}

/// Everything worth knowing about a session at a glance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session: Session,
    pub activity_total: usize,
    pub activity_counts: BTreeMap<ActivityType, usize>,
    pub plan_status: PlanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Activity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_progress: Option<Activity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Activity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_activity: Option<Activity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBashOutputs {
    pub session_id: String,
    #[serde(flatten)]
    pub bash: BashOutputs,
}

/// Orchestrates session operations against a [`SessionSource`].
///
/// Holds no per-session state: every operation re-fetches from the source.
pub struct SessionManager<S>
where
    S: SessionSource,
{
    source: S,
    config: ClientConfig,
}

impl<S> SessionManager<S>
where
    S: SessionSource,
{
    /// Create a new session manager.
    #[must_use]
    pub const fn new(source: S, config: ClientConfig) -> Self {
        Self { source, config }
    }

    #[must_use]
    pub const fn source(&self) -> &S {
        &self.source
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Hydrate and load a session's full log.
    async fn load_log(&self, id: &str) -> Result<ActivityLog, SourceError> {
        self.source.hydrate(id).await?;
        let activities = self
            .source
            .list_activities(id, &ActivityQuery::default())
            .await?;
        Ok(ActivityLog::new(activities))
    }

    /// Fetch a snapshot and its log together.
    async fn load(&self, id: &str) -> Result<(Session, ActivityLog), ManagerError> {
        let (session, log) = futures::try_join!(self.source.get_session(id), self.load_log(id))?;
        debug!(session_id = id, activities = log.len(), "Loaded session");
        Ok((session, log))
    }

    /// Current derived state.
    ///
    /// # Errors
    /// Returns error if the id is empty or the source fails.
    pub async fn session_state(&self, id: &str) -> Result<SessionState, ManagerError> {
        let id = require(id, "sessionId")?;
        let (session, log) = self.load(id).await?;
        Ok(derive_session_state(&session, &log))
    }

    /// Code review context.
    ///
    /// # Errors
    /// Returns error if the id is empty or the source fails.
    pub async fn review_changes(
        &self,
        id: &str,
        options: &ReviewOptions,
    ) -> Result<ReviewChanges, ManagerError> {
        let id = require(id, "sessionId")?;
        let (session, log) = self.load(id).await?;

        let changes = reconcile_changes(
            &session,
            &log,
            &ReconcileOptions {
                activity_id: options.activity_id.clone(),
                filter: options.filter,
            },
        );

        let mut review = ReviewChanges {
            session_id: session.id.clone(),
            title: session.title.clone(),
            state: session.state.clone(),
            status: session.status(),
            url: session.url.clone(),
            changes,
            created_at: None,
            updated_at: None,
            duration_ms: None,
            pr: PrRef::of(&session),
            insights: None,
            activity_counts: None,
        };

        if options.detail != ReviewDetail::Minimal {
            review.created_at = session.create_time;
            review.updated_at = session.update_time;
            review.duration_ms = session.duration_ms();
            review.insights = Some(log.insights());
        }
        if options.detail == ReviewDetail::Full {
            review.activity_counts = Some(log.counts());
        }
        Ok(review)
    }

    /// Diff of the session outcome or of one activity.
    ///
    /// # Errors
    /// Returns error if the id is empty or the source fails.
    pub async fn show_diff(&self, id: &str, options: &ShowDiffOptions) -> Result<ShowDiff, ManagerError> {
        let id = require(id, "sessionId")?;
        let (session, log) = self.load(id).await?;

        let change_set = match &options.activity_id {
            Some(activity_id) => log
                .find(activity_id)
                .and_then(|activity| activity.change_sets().next()),
            None => session.change_set(),
        };

        Ok(ShowDiff {
            session_id: session.id.clone(),
            activity_id: options.activity_id.clone(),
            file: options.file.clone(),
            diff: extract_diff(change_set, options.file.as_deref()),
        })
    }

    /// Wait for a plan to be generated.
    ///
    /// # Errors
    /// Returns error if the id is empty.
    pub async fn wait_for_plan(
        &self,
        id: &str,
        options: WaitOptions,
    ) -> Result<PollResult<Activity>, ManagerError> {
        let id = require(id, "sessionId")?;
        let poll = self
            .config
            .poll_options(options.interval, options.max_duration, DEFAULT_PLAN_WAIT);
        Ok(waiters::wait_for_plan(&self.source, id, poll).await)
    }

    /// Wait for the session to reach a terminal state.
    ///
    /// # Errors
    /// Returns error if the id is empty.
    pub async fn wait_for_completion(
        &self,
        id: &str,
        options: WaitOptions,
    ) -> Result<PollResult<Session>, ManagerError> {
        let id = require(id, "sessionId")?;
        let poll = self.config.poll_options(
            options.interval,
            options.max_duration,
            self.config.max_poll_duration,
        );
        Ok(waiters::wait_for_completion(&self.source, id, poll).await)
    }

    /// Approve, send or ask.
    ///
    /// # Errors
    /// Returns error if an argument is missing or the source fails.
    pub async fn interact(&self, id: &str, action: Interaction) -> Result<InteractOutcome, ManagerError> {
        let id = require(id, "sessionId")?;
        match action {
            Interaction::Approve => {
                self.approve_plan(id).await?;
                Ok(InteractOutcome {
                    success: true,
                    message: Some("Plan approved.".to_string()),
                    reply: None,
                })
            }
            Interaction::Send(message) => {
                let message = require(&message, "message")?;
                self.source.send_message(id, message).await?;
                Ok(InteractOutcome {
                    success: true,
                    message: Some("Message sent.".to_string()),
                    reply: None,
                })
            }
            Interaction::Ask(message) => {
                let message = require(&message, "message")?;
                let seen = waiters::seen_agent_messages(&self.source, id).await?;
                self.source.send_message(id, message).await?;

                let poll = self
                    .config
                    .poll_options(None, None, self.config.max_poll_duration);
                let result = waiters::wait_for_reply(&self.source, id, &seen, poll).await;
                if let Some(error) = result.error {
                    return Err(ManagerError::Source(SourceError::Transport(error)));
                }
                let reply = result
                    .value
                    .as_ref()
                    .and_then(reply_text)
                    .map(str::to_string);
                Ok(InteractOutcome {
                    success: reply.is_some(),
                    message: reply
                        .is_none()
                        .then(|| "Timed out waiting for a reply.".to_string()),
                    reply,
                })
            }
        }
    }

    /// Start a session and return its first snapshot.
    ///
    /// # Errors
    /// Returns error if the prompt is empty or the source fails.
    pub async fn create_session(&self, request: &CreateSessionRequest) -> Result<Session, ManagerError> {
        require(&request.prompt, "prompt")?;

        let mut request = request.clone();
        request.repo = request
            .repo
            .as_deref()
            .map(|repo| normalize_github_repo(repo.trim()).to_string())
            .filter(|repo| !repo.is_empty());

        let created = self.source.create_session(&request).await?;
        info!(session_id = %created.id, repo = ?request.repo, "Session created");

        // The new session may not be readable immediately.
        let session = retry(CREATE_FETCH_ATTEMPTS, CREATE_FETCH_DELAY, || {
            self.source.get_session(&created.id)
        })
        .await?;
        Ok(session)
    }

    /// Create a session, then optionally wait for it to finish.
    ///
    /// # Errors
    /// Returns error if creation fails.
    pub async fn create_and_wait(
        &self,
        request: &CreateSessionRequest,
        wait: bool,
        options: WaitOptions,
    ) -> Result<CreateAndWait, ManagerError> {
        let session = self.create_session(request).await?;
        if !wait {
            return Ok(CreateAndWait {
                session,
                waited: false,
                poll: None,
            });
        }

        let poll = self.wait_for_completion(&session.id, options).await?;
        Ok(CreateAndWait {
            session: poll.value.clone().unwrap_or(session),
            waited: true,
            poll: Some(poll),
        })
    }

    /// One page of sessions.
    ///
    /// # Errors
    /// Returns error if the source fails.
    pub async fn list_sessions(
        &self,
        page_size: Option<usize>,
        page_token: Option<&str>,
    ) -> Result<SessionPage, ManagerError> {
        Ok(self
            .source
            .list_sessions(clamp_page_size(page_size), page_token)
            .await?)
    }

    /// Current snapshot of a session.
    ///
    /// # Errors
    /// Returns error if the id is empty or the source fails.
    pub async fn get_session(&self, id: &str) -> Result<Session, ManagerError> {
        let id = require(id, "sessionId")?;
        Ok(self.source.get_session(id).await?)
    }

    /// One page of connected repositories.
    ///
    /// # Errors
    /// Returns error if the source fails.
    pub async fn list_sources(
        &self,
        page_size: Option<usize>,
        page_token: Option<&str>,
    ) -> Result<SourcePage, ManagerError> {
        Ok(self
            .source
            .list_sources(clamp_page_size(page_size), page_token)
            .await?)
    }

    /// A connected repository, named as `owner/repo` or by resource name.
    ///
    /// # Errors
    /// Returns error if the name is empty, or the repository is not connected.
    pub async fn get_source(&self, repo: &str) -> Result<Source, ManagerError> {
        let repo = normalize_github_repo(require(repo, "source")?);
        Ok(self.source.get_source(repo).await?)
    }

    /// Activities matching a query.
    ///
    /// # Errors
    /// Returns error if the id is empty or the source fails.
    pub async fn list_activities(
        &self,
        id: &str,
        query: &ActivityQuery,
    ) -> Result<Vec<Activity>, ManagerError> {
        let id = require(id, "sessionId")?;
        self.source.hydrate(id).await?;
        Ok(self.source.list_activities(id, query).await?)
    }

    /// Most recent activity of any type.
    ///
    /// # Errors
    /// Returns error if the id is empty or the source fails.
    pub async fn latest_activity(&self, id: &str) -> Result<Option<Activity>, ManagerError> {
        let query = ActivityQuery {
            order: jules_core::ActivityOrder::Desc,
            activity_type: None,
            limit: Some(1),
        };
        Ok(self.list_activities(id, &query).await?.into_iter().next())
    }

    /// The newest plan and its approval status.
    ///
    /// # Errors
    /// Returns error if the id is empty or the source fails.
    pub async fn session_plan(&self, id: &str) -> Result<SessionPlan, ManagerError> {
        let id = require(id, "sessionId")?;
        let log = self.load_log(id).await?;
        Ok(SessionPlan {
            session_id: id.to_string(),
            status: log.plan_status(),
            plan: log.latest_of(ActivityType::PlanGenerated).cloned(),
        })
    }

    /// Snapshot plus an overview of its log.
    ///
    /// # Errors
    /// Returns error if the id is empty or the source fails.
    pub async fn session_summary(&self, id: &str) -> Result<SessionSummary, ManagerError> {
        let id = require(id, "sessionId")?;
        let (session, log) = self.load(id).await?;
        Ok(SessionSummary {
            activity_total: log.len(),
            activity_counts: log.counts(),
            plan_status: log.plan_status(),
            plan: log.latest_of(ActivityType::PlanGenerated).cloned(),
            latest_progress: log.latest_of(ActivityType::ProgressUpdated).cloned(),
            error: log.latest_of(ActivityType::SessionFailed).cloned(),
            latest_activity: log.newest_first().next().cloned(),
            session,
        })
    }

    /// Bash commands run by the agent.
    ///
    /// # Errors
    /// Returns error if the id is empty or the source fails.
    pub async fn bash_outputs(
        &self,
        id: &str,
        activity_ids: Option<&[String]>,
    ) -> Result<SessionBashOutputs, ManagerError> {
        let id = require(id, "sessionId")?;
        let log = self.load_log(id).await?;
        Ok(SessionBashOutputs {
            session_id: id.to_string(),
            bash: log.bash_outputs(activity_ids),
        })
    }

    /// # Errors
    /// Returns error if the id is empty or the source fails.
    pub async fn approve_plan(&self, id: &str) -> Result<(), ManagerError> {
        let id = require(id, "sessionId")?;
        self.source.approve_plan(id).await?;
        info!(session_id = id, "Plan approved");
        Ok(())
    }

    /// # Errors
    /// Returns error if the id is empty or the source fails.
    pub async fn reject_plan(&self, id: &str, feedback: Option<&str>) -> Result<(), ManagerError> {
        let id = require(id, "sessionId")?;
        let feedback = feedback.map(str::trim).filter(|f| !f.is_empty());
        self.source.reject_plan(id, feedback).await?;
        info!(session_id = id, "Plan rejected");
        Ok(())
    }

    /// # Errors
    /// Returns error if an argument is empty or the source fails.
    pub async fn send_message(&self, id: &str, message: &str) -> Result<(), ManagerError> {
        self.interact(id, Interaction::Send(message.to_string()))
            .await
            .map(|_| ())
    }

    /// # Errors
    /// Returns error if the id is empty or the source fails.
    pub async fn cancel_session(&self, id: &str) -> Result<(), ManagerError> {
        let id = require(id, "sessionId")?;
        self.source.cancel_session(id).await?;
        info!(session_id = id, "Session cancelled");
        Ok(())
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use jules_core::{ActivityKind, ChangeSetArtifact, ChangeType, PollReason, SessionOutput};

    use super::*;
    use crate::reconcile::OUTCOME_ACTIVITY_ID;
    use crate::reducer::fixtures::*;
    use crate::storage::MemorySource;

    fn manager() -> SessionManager<MemorySource> {
        SessionManager::new(MemorySource::new(), ClientConfig::default())
    }

    #[tokio::test]
    async fn test_busy_session_state() {
        let manager = manager();
        manager.source().insert_session(Session::new("s1", "inProgress"));
        manager.source().push_activity("s1", plan("p", 1, &["A", "B"]));
        manager
            .source()
            .push_activity("s1", change_set("cs", 2, file_patch("x.ts", "created", 10, 0)));

        let state = manager.session_state("s1").await.unwrap();
        assert_eq!(state.status, SessionStatus::Busy);
        assert_eq!(state.pending_plan.unwrap().steps.len(), 2);
        assert_eq!(state.last_activity.unwrap().activity_type, ActivityType::ChangeSet);
        assert!(state.prompt.is_none());
    }

    #[tokio::test]
    async fn test_missing_id_fails_before_fetch() {
        let manager = manager();
        let result = manager.session_state("  ").await;
        assert!(matches!(result, Err(ManagerError::MissingArgument("sessionId"))));

        let result = manager.interact("s1", Interaction::Ask(String::new())).await;
        assert!(matches!(result, Err(ManagerError::MissingArgument("message"))));
    }

    #[tokio::test]
    async fn test_unknown_session_propagates() {
        let result = manager().session_state("nope").await;
        assert!(matches!(result, Err(ManagerError::Source(SourceError::NotFound(_)))));
    }

    #[tokio::test]
    async fn test_review_outcome_detail_levels() {
        let manager = manager();
        let mut session = Session::new("s1", "completed");
        session.outputs.push(SessionOutput::ChangeSet {
            change_set: ChangeSetArtifact::from_patch(file_patch("a.rs", "modified", 2, 1)),
        });
        manager.source().insert_session(session);
        manager.source().push_activity("s1", approved("ok", 1));

        let minimal = manager
            .review_changes(
                "s1",
                &ReviewOptions {
                    detail: ReviewDetail::Minimal,
                    ..ReviewOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(minimal.changes.files[0].activity_ids, [OUTCOME_ACTIVITY_ID]);
        assert!(minimal.insights.is_none());
        assert!(minimal.changes.warning.is_none());

        let full = manager
            .review_changes(
                "s1",
                &ReviewOptions {
                    detail: ReviewDetail::Full,
                    ..ReviewOptions::default()
                },
            )
            .await
            .unwrap();
        assert!(full.insights.is_some());
        assert_eq!(full.activity_counts.unwrap()[&ActivityType::PlanApproved], 1);
    }

    #[tokio::test]
    async fn test_review_json_is_flat() {
        let manager = manager();
        manager.source().insert_session(Session::new("s1", "inProgress"));
        manager.source().push_activity("s1", approved("ok", 1));
        manager
            .source()
            .push_activity("s1", change_set("cs", 2, file_patch("x.rs", "modified", 1, 0)));

        let review = manager.review_changes("s1", &ReviewOptions::default()).await.unwrap();
        let json = serde_json::to_value(&review).unwrap();
        assert_eq!(json["status"], "busy");
        assert_eq!(json["files"][0]["changeType"], "modified");
        assert_eq!(json["summary"]["totalFiles"], 1);
        assert_eq!(json["hasStableHistory"], true);
        assert!(json["warning"].is_string());
    }

    #[tokio::test]
    async fn test_show_diff_for_activity() {
        let manager = manager();
        manager.source().insert_session(Session::new("s1", "inProgress"));
        let patch = format!(
            "{}{}",
            file_patch("a.rs", "created", 1, 0),
            file_patch("b.rs", "modified", 1, 1)
        );
        manager.source().push_activity("s1", change_set("cs", 1, patch));

        let options = ShowDiffOptions {
            file: Some("b.rs".to_string()),
            activity_id: Some("cs".to_string()),
        };
        let diff = manager.show_diff("s1", &options).await.unwrap();
        assert!(diff.diff.unidiff_patch.starts_with("diff --git a/b.rs b/b.rs"));
        assert_eq!(diff.diff.files[0].change_type, ChangeType::Modified);

        let missing = ShowDiffOptions {
            activity_id: Some("gone".to_string()),
            ..ShowDiffOptions::default()
        };
        let diff = manager.show_diff("s1", &missing).await.unwrap();
        assert!(diff.diff.unidiff_patch.is_empty());
        assert!(diff.diff.files.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ask_waits_for_reply() {
        let manager = std::sync::Arc::new(manager());
        manager.source().insert_session(Session::new("s1", "awaitingUserFeedback"));

        let responder = manager.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            responder.source().push_activity(
                "s1",
                jules_core::Activity::new(
                    "reply",
                    Utc::now() + chrono::Duration::seconds(1),
                    ActivityKind::AgentMessaged {
                        message: "Yes, done.".to_string(),
                    },
                ),
            );
        });

        let outcome = manager
            .interact("s1", Interaction::Ask("Did you add tests?".to_string()))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.reply.as_deref(), Some("Yes, done."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ask_sees_reply_from_a_lagging_clock() {
        let manager = std::sync::Arc::new(manager());
        manager.source().insert_session(Session::new("s1", "awaitingUserFeedback"));

        let responder = manager.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            responder.source().push_activity(
                "s1",
                jules_core::Activity::new(
                    "reply",
                    Utc::now() - chrono::Duration::seconds(2),
                    ActivityKind::AgentMessaged {
                        message: "Behind, but here.".to_string(),
                    },
                ),
            );
        });

        let outcome = manager
            .interact("s1", Interaction::Ask("Still there?".to_string()))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.reply.as_deref(), Some("Behind, but here."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_wait_falls_back_to_configured_budget() {
        let mut config = ClientConfig::default();
        config.max_poll_duration = Duration::from_secs(3);
        config.poll_interval = Duration::from_secs(1);
        let manager = SessionManager::new(MemorySource::new(), config);
        manager.source().insert_session(Session::new("s1", "inProgress"));

        let start = tokio::time::Instant::now();
        let result = manager
            .wait_for_completion("s1", WaitOptions::default())
            .await
            .unwrap();
        assert_eq!(result.reason, PollReason::Timeout);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_create_session_normalizes_repo() {
        let manager = manager();
        let request = CreateSessionRequest {
            prompt: "Add a README".to_string(),
            repo: Some("github/octo/widgets".to_string()),
            ..CreateSessionRequest::default()
        };
        let session = manager.create_session(&request).await.unwrap();
        assert_eq!(
            session.source_context.unwrap().source,
            "sources/github/octo/widgets"
        );

        let empty = CreateSessionRequest::default();
        assert!(matches!(
            manager.create_session(&empty).await,
            Err(ManagerError::MissingArgument("prompt"))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_and_wait_times_out_with_snapshot() {
        let manager = manager();
        let request = CreateSessionRequest {
            prompt: "Refactor".to_string(),
            ..CreateSessionRequest::default()
        };
        let options = WaitOptions {
            interval: Some(Duration::from_millis(500)),
            max_duration: Some(Duration::from_millis(1_500)),
        };
        let result = manager.create_and_wait(&request, true, options).await.unwrap();
        assert!(result.waited);
        assert_eq!(result.poll.unwrap().reason, PollReason::Timeout);
        assert_eq!(result.session.state, "queued");
    }

    #[tokio::test]
    async fn test_plan_and_summary() {
        let manager = manager();
        manager.source().insert_session(Session::new("s1", "awaitingPlanApproval"));
        manager.source().push_activity("s1", plan("p", 1, &["A"]));

        let plan = manager.session_plan("s1").await.unwrap();
        assert_eq!(plan.status, PlanStatus::PendingApproval);

        manager.approve_plan("s1").await.unwrap();
        let summary = manager.session_summary("s1").await.unwrap();
        assert_eq!(summary.plan_status, PlanStatus::Approved);
        assert_eq!(summary.session.state, "inProgress");
        assert_eq!(summary.activity_total, 2);
        assert_eq!(
            summary.latest_activity.unwrap().activity_type(),
            ActivityType::PlanApproved
        );

        let latest = manager.latest_activity("s1").await.unwrap();
        assert_eq!(latest.map(|a| a.activity_type()), Some(ActivityType::PlanApproved));
    }

    #[tokio::test]
    async fn test_list_sessions_clamps_page_size() {
        let manager = manager();
        for i in 0..3 {
            manager.source().insert_session(Session::new(format!("s{i}"), "completed"));
        }
        let page = manager.list_sessions(Some(0), None).await.unwrap();
        assert_eq!(page.sessions.len(), 3);
        let page = manager.list_sessions(Some(1), None).await.unwrap();
        assert_eq!(page.sessions.len(), 1);
        assert!(page.next_page_token.is_some());
    }

    #[tokio::test]
    async fn test_sources_accept_any_repo_form() {
        let manager = manager();
        manager.source().insert_source(Source::github("octo", "repo"));

        let source = manager.get_source("sources/github/octo/repo").await.unwrap();
        assert_eq!(source.full_name().as_deref(), Some("octo/repo"));
        assert!(matches!(
            manager.get_source("  ").await,
            Err(ManagerError::MissingArgument("source"))
        ));
        assert!(matches!(
            manager.get_source("octo/other").await,
            Err(ManagerError::Source(SourceError::NotFound(_)))
        ));

        let page = manager.list_sources(None, None).await.unwrap();
        assert_eq!(page.sources.len(), 1);
    }

    #[tokio::test]
    async fn test_get_session_requires_id() {
        let manager = manager();
        manager.source().insert_session(Session::new("s1", "queued"));
        assert_eq!(manager.get_session("s1").await.unwrap().state, "queued");
        assert!(matches!(
            manager.get_session("").await,
            Err(ManagerError::MissingArgument("sessionId"))
        ));
    }
}
