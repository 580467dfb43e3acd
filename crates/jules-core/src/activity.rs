//! Activities: the immutable, timestamped events of a session's history.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::change_set::ChangeSetArtifact;

/// Activity identifier.
pub type ActivityId = String;

/// One event in a session's history.
///
/// Activities are never mutated once recorded. The kind-specific payload is
/// flattened next to the common fields and discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Unique activity identifier.
    pub id: ActivityId,
    /// Creation timestamp, parsed once at ingestion.
    pub create_time: DateTime<Utc>,
    /// Kind-specific payload.
    #[serde(flatten)]
    pub kind: ActivityKind,
    /// Typed payloads attached to the activity.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
}

impl Activity {
    /// Create an activity without artifacts.
    #[must_use]
    pub fn new(id: impl Into<String>, create_time: DateTime<Utc>, kind: ActivityKind) -> Self {
        Self {
            id: id.into(),
            create_time,
            kind,
            artifacts: Vec::new(),
        }
    }

    /// Attach an artifact.
    #[must_use]
    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// The fieldless type tag of this activity.
    #[must_use]
    pub const fn activity_type(&self) -> ActivityType {
        self.kind.activity_type()
    }

    /// Change-set artifacts attached to this activity, in attachment order.
    pub fn change_sets(&self) -> impl Iterator<Item = &ChangeSetArtifact> {
        self.artifacts.iter().filter_map(|artifact| match artifact {
            Artifact::ChangeSet(change_set) => Some(change_set),
            _ => None,
        })
    }

    /// Bash command records attached to this activity.
    pub fn bash_outputs(&self) -> impl Iterator<Item = &BashOutput> {
        self.artifacts.iter().filter_map(|artifact| match artifact {
            Artifact::BashOutput(output) => Some(output),
            _ => None,
        })
    }

    /// Message text for agent/user messages.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match &self.kind {
            ActivityKind::AgentMessaged { message } | ActivityKind::UserMessaged { message } => {
                Some(message)
            }
            _ => None,
        }
    }
}

/// Kind-specific activity payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ActivityKind {
    /// The agent posted a message.
    AgentMessaged {
        #[serde(default)]
        message: String,
    },
    /// The user posted a message.
    UserMessaged {
        #[serde(default)]
        message: String,
    },
    /// The agent proposed a plan.
    PlanGenerated { plan: Plan },
    /// A plan was approved.
    #[serde(rename_all = "camelCase")]
    PlanApproved {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plan_id: Option<String>,
    },
    /// A plan was rejected.
    PlanRejected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feedback: Option<String>,
    },
    /// Intermediate progress report.
    ProgressUpdated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// The session finished its work.
    SessionCompleted,
    /// The session failed.
    SessionFailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// A shell command ran; details live in the artifacts.
    BashOutput,
    /// A patch was produced; details live in the artifacts.
    ChangeSet,
}

impl ActivityKind {
    /// The fieldless type tag of this payload.
    #[must_use]
    pub const fn activity_type(&self) -> ActivityType {
        match self {
            Self::AgentMessaged { .. } => ActivityType::AgentMessaged,
            Self::UserMessaged { .. } => ActivityType::UserMessaged,
            Self::PlanGenerated { .. } => ActivityType::PlanGenerated,
            Self::PlanApproved { .. } => ActivityType::PlanApproved,
            Self::PlanRejected { .. } => ActivityType::PlanRejected,
            Self::ProgressUpdated { .. } => ActivityType::ProgressUpdated,
            Self::SessionCompleted => ActivityType::SessionCompleted,
            Self::SessionFailed { .. } => ActivityType::SessionFailed,
            Self::BashOutput => ActivityType::BashOutput,
            Self::ChangeSet => ActivityType::ChangeSet,
        }
    }
}

/// Activity type tag, used for queries and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityType {
    AgentMessaged,
    UserMessaged,
    PlanGenerated,
    PlanApproved,
    PlanRejected,
    ProgressUpdated,
    SessionCompleted,
    SessionFailed,
    BashOutput,
    ChangeSet,
}

impl ActivityType {
    /// Wire name of the type tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AgentMessaged => "agentMessaged",
            Self::UserMessaged => "userMessaged",
            Self::PlanGenerated => "planGenerated",
            Self::PlanApproved => "planApproved",
            Self::PlanRejected => "planRejected",
            Self::ProgressUpdated => "progressUpdated",
            Self::SessionCompleted => "sessionCompleted",
            Self::SessionFailed => "sessionFailed",
            Self::BashOutput => "bashOutput",
            Self::ChangeSet => "changeSet",
        }
    }

    /// Human-readable description.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::AgentMessaged => "Response from the agent",
            Self::UserMessaged => "Message from you",
            Self::PlanGenerated => "The agent created a plan",
            Self::PlanApproved => "Plan was approved",
            Self::PlanRejected => "Plan was rejected",
            Self::ProgressUpdated => "Progress update",
            Self::SessionCompleted => "Work completed",
            Self::SessionFailed => "An error occurred",
            Self::BashOutput => "Command output",
            Self::ChangeSet => "Code changes produced",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Plan identifier.
    pub id: String,
    /// Ordered steps.
    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

/// One plan step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PlanStep {
    /// Create a step with just a title.
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            description: None,
        }
    }
}

/// Typed payload attached to an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Artifact {
    /// A code patch.
    ChangeSet(ChangeSetArtifact),
    /// A shell command record.
    BashOutput(BashOutput),
    /// Binary media (base64 encoded).
    Media(MediaArtifact),
}

/// Shell command record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BashOutput {
    pub command: String,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

impl BashOutput {
    /// A command succeeded when it exited 0 or reported no exit code.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(self.exit_code, None | Some(0))
    }
}

/// Media payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaArtifact {
    pub mime_type: String,
    /// Base64-encoded content.
    #[serde(default)]
    pub data: String,
}
