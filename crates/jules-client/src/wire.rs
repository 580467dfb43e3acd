//! Wire format of the Jules REST API.
//!
//! The API models an activity's kind and each artifact as a one-of: exactly
//! one of several optional fields is set. These DTOs mirror that shape and
//! convert into the core's tagged enums.

use chrono::{DateTime, Utc};
use jules_core::{
    Activity, ActivityKind, Artifact, BashOutput, ChangeSetArtifact, CreateSessionRequest,
    MediaArtifact, Plan, PullRequest, Session, SessionOutput, SessionPage, Source, SourceContext,
    SourceError, SourcePage, session::GithubRepoContext,
};
use serde::{Deserialize, Serialize};

const DEFAULT_BRANCH: &str = "main";

/// Strip a resource prefix like `sessions/` from a name.
fn id_from_name<'a>(name: &'a str, collection: &str) -> &'a str {
    name.rsplit_once(&format!("{collection}/"))
        .map_or(name, |(_, id)| id)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSession {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub source_context: Option<SourceContext>,
    #[serde(default)]
    pub outputs: Vec<WireOutput>,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOutput {
    #[serde(default)]
    pub pull_request: Option<PullRequest>,
    #[serde(default)]
    pub change_set: Option<ChangeSetArtifact>,
}

impl TryFrom<WireSession> for Session {
    type Error = SourceError;

    fn try_from(wire: WireSession) -> Result<Self, Self::Error> {
        let id = wire
            .id
            .filter(|id| !id.is_empty())
            .or_else(|| wire.name.as_deref().map(|n| id_from_name(n, "sessions").to_string()))
            .ok_or_else(|| SourceError::Decode("session has neither id nor name".to_string()))?;

        let outputs = wire
            .outputs
            .into_iter()
            .flat_map(|output| {
                let pr = output
                    .pull_request
                    .map(|pull_request| SessionOutput::PullRequest { pull_request });
                let cs = output
                    .change_set
                    .map(|change_set| SessionOutput::ChangeSet { change_set });
                pr.into_iter().chain(cs)
            })
            .collect();

        let mut session = Self::new(id, wire.state.unwrap_or_else(|| "unspecified".to_string()));
        session.name = wire.name;
        session.title = wire.title;
        session.prompt = wire.prompt;
        session.url = wire.url;
        session.source_context = wire.source_context;
        session.outputs = outputs;
        session.create_time = wire.create_time;
        session.update_time = wire.update_time;
        Ok(session)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSessionPage {
    #[serde(default)]
    pub sessions: Vec<WireSession>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

impl TryFrom<WireSessionPage> for SessionPage {
    type Error = SourceError;

    fn try_from(wire: WireSessionPage) -> Result<Self, Self::Error> {
        Ok(Self {
            sessions: wire
                .sessions
                .into_iter()
                .map(Session::try_from)
                .collect::<Result<_, _>>()?,
            next_page_token: wire.next_page_token.filter(|t| !t.is_empty()),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSourcePage {
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

impl From<WireSourcePage> for SourcePage {
    fn from(wire: WireSourcePage) -> Self {
        Self {
            sources: wire.sources,
            next_page_token: wire.next_page_token.filter(|t| !t.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessaged {
    #[serde(default)]
    pub agent_message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessaged {
    #[serde(default)]
    pub user_message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanGenerated {
    pub plan: Plan,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanApproved {
    #[serde(default)]
    pub plan_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanRejected {
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressUpdated {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionFailed {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBashOutput {
    #[serde(default)]
    pub command: String,
    /// Combined stdout and stderr.
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireArtifact {
    #[serde(default)]
    pub change_set: Option<ChangeSetArtifact>,
    #[serde(default)]
    pub bash_output: Option<WireBashOutput>,
    #[serde(default)]
    pub media: Option<MediaArtifact>,
}

impl WireArtifact {
    fn into_artifact(self) -> Option<Artifact> {
        if let Some(change_set) = self.change_set {
            return Some(Artifact::ChangeSet(change_set));
        }
        if let Some(bash) = self.bash_output {
            return Some(Artifact::BashOutput(BashOutput {
                command: bash.command,
                stdout: bash.output,
                stderr: String::new(),
                exit_code: bash.exit_code,
            }));
        }
        self.media.map(Artifact::Media)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireActivity {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub agent_messaged: Option<AgentMessaged>,
    #[serde(default)]
    pub user_messaged: Option<UserMessaged>,
    #[serde(default)]
    pub plan_generated: Option<PlanGenerated>,
    #[serde(default)]
    pub plan_approved: Option<PlanApproved>,
    #[serde(default)]
    pub plan_rejected: Option<PlanRejected>,
    #[serde(default)]
    pub progress_updated: Option<ProgressUpdated>,
    #[serde(default)]
    pub session_completed: Option<serde_json::Value>,
    #[serde(default)]
    pub session_failed: Option<SessionFailed>,
    #[serde(default)]
    pub artifacts: Vec<WireArtifact>,
}

impl WireActivity {
    fn take_kind(&mut self) -> Option<ActivityKind> {
        if let Some(m) = self.agent_messaged.take() {
            return Some(ActivityKind::AgentMessaged {
                message: m.agent_message,
            });
        }
        if let Some(m) = self.user_messaged.take() {
            return Some(ActivityKind::UserMessaged {
                message: m.user_message,
            });
        }
        if let Some(p) = self.plan_generated.take() {
            return Some(ActivityKind::PlanGenerated { plan: p.plan });
        }
        if let Some(p) = self.plan_approved.take() {
            return Some(ActivityKind::PlanApproved { plan_id: p.plan_id });
        }
        if let Some(p) = self.plan_rejected.take() {
            return Some(ActivityKind::PlanRejected { feedback: p.feedback });
        }
        if let Some(p) = self.progress_updated.take() {
            return Some(ActivityKind::ProgressUpdated {
                title: p.title,
                description: p.description,
            });
        }
        if self.session_completed.take().is_some() {
            return Some(ActivityKind::SessionCompleted);
        }
        if let Some(f) = self.session_failed.take() {
            return Some(ActivityKind::SessionFailed { reason: f.reason });
        }
        None
    }
}

impl TryFrom<WireActivity> for Activity {
    type Error = SourceError;

    fn try_from(mut wire: WireActivity) -> Result<Self, Self::Error> {
        let id = wire
            .id
            .take()
            .filter(|id| !id.is_empty())
            .or_else(|| wire.name.as_deref().map(|n| id_from_name(n, "activities").to_string()))
            .ok_or_else(|| SourceError::Decode("activity has neither id nor name".to_string()))?;

        let create_time = wire
            .create_time
            .ok_or_else(|| SourceError::Decode(format!("activity {id} has no createTime")))?;

        let explicit = wire.take_kind();
        let artifacts: Vec<Artifact> = std::mem::take(&mut wire.artifacts)
            .into_iter()
            .filter_map(WireArtifact::into_artifact)
            .collect();

        let kind = match explicit {
            Some(kind) => kind,
            None => match artifacts.first() {
                Some(Artifact::ChangeSet(_)) => ActivityKind::ChangeSet,
                Some(Artifact::BashOutput(_)) => ActivityKind::BashOutput,
                _ => {
                    return Err(SourceError::Decode(format!(
                        "activity {id} has no recognizable kind"
                    )));
                }
            },
        };

        Ok(Self {
            id,
            create_time,
            kind,
            artifacts,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireActivityPage {
    #[serde(default)]
    pub activities: Vec<WireActivity>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Body of `POST sessions`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCreateSession {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_context: Option<SourceContext>,
    pub require_plan_approval: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automation_mode: Option<jules_core::AutomationMode>,
}

impl From<&CreateSessionRequest> for WireCreateSession {
    fn from(request: &CreateSessionRequest) -> Self {
        let source_context = request.repo.as_deref().map(|repo| SourceContext {
            source: format!("sources/github/{repo}"),
            github_repo_context: Some(GithubRepoContext {
                starting_branch: request
                    .branch
                    .clone()
                    .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            }),
        });

        Self {
            prompt: request.prompt.clone(),
            title: request.title.clone(),
            source_context,
            require_plan_approval: request.require_plan_approval,
            automation_mode: (request.automation_mode
                != jules_core::AutomationMode::AutomationModeUnspecified)
                .then_some(request.automation_mode),
        }
    }
}
