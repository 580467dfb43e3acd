//! Session snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::change_set::ChangeSetArtifact;
use crate::status::{self, SessionStatus};

/// Session identifier.
pub type SessionId = String;

/// Snapshot of one unit of asynchronous agent work.
///
/// The raw `state` string is owned by the remote system and is kept verbatim;
/// use [`Session::status`] for the semantic classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    /// Resource name (`sessions/<id>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub prompt: String,
    /// Raw state as reported by the remote API.
    #[serde(default = "unspecified_state")]
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_context: Option<SourceContext>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<SessionOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

fn unspecified_state() -> String {
    "unspecified".to_string()
}

impl Session {
    /// Create a bare session snapshot.
    #[must_use]
    pub fn new(id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            title: String::new(),
            prompt: String::new(),
            state: state.into(),
            url: None,
            source_context: None,
            outputs: Vec::new(),
            create_time: None,
            update_time: None,
        }
    }

    /// Semantic status of the raw state.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        status::classify(&self.state)
    }

    /// Whether the session reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        status::is_terminal(&self.state)
    }

    /// Pull request produced by the session, if any.
    #[must_use]
    pub fn pull_request(&self) -> Option<&PullRequest> {
        self.outputs.iter().find_map(|output| match output {
            SessionOutput::PullRequest { pull_request } => Some(pull_request),
            SessionOutput::ChangeSet { .. } => None,
        })
    }

    /// Final change-set produced by the session, if any.
    #[must_use]
    pub fn change_set(&self) -> Option<&ChangeSetArtifact> {
        self.outputs.iter().find_map(|output| match output {
            SessionOutput::ChangeSet { change_set } => Some(change_set),
            SessionOutput::PullRequest { .. } => None,
        })
    }

    /// Wall-clock time between creation and last update.
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.create_time, self.update_time) {
            (Some(created), Some(updated)) => Some((updated - created).num_milliseconds()),
            _ => None,
        }
    }

    /// Starting branch of the source repository.
    #[must_use]
    pub fn branch(&self) -> Option<&str> {
        self.source_context
            .as_ref()
            .and_then(|ctx| ctx.github_repo_context.as_ref())
            .map(|repo| repo.starting_branch.as_str())
    }
}

/// Repository the session works against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceContext {
    /// Source resource name, e.g. `sources/github/owner/repo`.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_repo_context: Option<GithubRepoContext>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubRepoContext {
    pub starting_branch: String,
}

/// Something a session produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionOutput {
    #[serde(rename_all = "camelCase")]
    PullRequest { pull_request: PullRequest },
    #[serde(rename_all = "camelCase")]
    ChangeSet { change_set: ChangeSetArtifact },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Parameters for starting a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Repository in `owner/repo` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Wait for plan approval before executing.
    #[serde(default)]
    pub require_plan_approval: bool,
    #[serde(default)]
    pub automation_mode: AutomationMode,
}

/// What the remote does once the work is finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutomationMode {
    #[default]
    AutomationModeUnspecified,
    AutoCreatePr,
    AutoCreateDraftPr,
}

/// A repository connected to the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Resource name, e.g. `sources/github/owner/repo`.
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_repo: Option<GithubRepo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubRepo {
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub is_private: bool,
}

impl Source {
    /// A GitHub repository source.
    #[must_use]
    pub fn github(owner: &str, repo: &str) -> Self {
        Self {
            name: source_name(&format!("{owner}/{repo}")),
            id: format!("github/{owner}/{repo}"),
            github_repo: Some(GithubRepo {
                owner: owner.to_string(),
                repo: repo.to_string(),
                is_private: false,
            }),
        }
    }

    /// `owner/repo`, for GitHub sources.
    #[must_use]
    pub fn full_name(&self) -> Option<String> {
        self.github_repo
            .as_ref()
            .map(|gh| format!("{}/{}", gh.owner, gh.repo))
    }
}

/// Resource name of a GitHub repository in any accepted form.
#[must_use]
pub fn source_name(repo: &str) -> String {
    format!("sources/github/{}", normalize_github_repo(repo))
}

/// Normalize `sources/github/owner/repo` or `github/owner/repo` to `owner/repo`.
#[must_use]
pub fn normalize_github_repo(input: &str) -> &str {
    input
        .strip_prefix("sources/github/")
        .or_else(|| input.strip_prefix("github/"))
        .unwrap_or(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outputs_lookup() {
        let json = r#"{
            "id": "s1",
            "state": "completed",
            "outputs": [
                {"type": "changeSet", "changeSet": {"gitPatch": {"unidiffPatch": "diff --git a/x b/x\n"}}},
                {"type": "pullRequest", "pullRequest": {"url": "https://example.test/pr/1", "title": "Fix"}}
            ]
        }"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.pull_request().unwrap().title, "Fix");
        assert!(session.change_set().is_some());
        assert!(session.is_terminal());
        assert_eq!(session.status(), SessionStatus::Stable);
    }

    #[test]
    fn test_missing_state_is_unspecified() {
        let session: Session = serde_json::from_str(r#"{"id": "s2"}"#).unwrap();
        assert_eq!(session.state, "unspecified");
        assert!(session.pull_request().is_none());
        assert!(session.duration_ms().is_none());
    }

    #[test]
    fn test_normalize_github_repo() {
        assert_eq!(normalize_github_repo("sources/github/o/r"), "o/r");
        assert_eq!(normalize_github_repo("github/o/r"), "o/r");
        assert_eq!(normalize_github_repo("o/r"), "o/r");
    }

    #[test]
    fn test_source_from_api() {
        let source: Source = serde_json::from_str(
            r#"{"name": "sources/github/octo/repo", "id": "github/octo/repo",
                "githubRepo": {"owner": "octo", "repo": "repo", "isPrivate": true}}"#,
        )
        .unwrap();
        assert_eq!(source.full_name().as_deref(), Some("octo/repo"));
        assert!(source.github_repo.as_ref().unwrap().is_private);
        assert_eq!(source_name("github/octo/repo"), source.name);

        let bare: Source = serde_json::from_str(r#"{"name": "sources/other"}"#).unwrap();
        assert!(bare.full_name().is_none());
        assert_eq!(Source::github("octo", "repo").name, "sources/github/octo/repo");
    }
}
