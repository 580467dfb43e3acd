//! Core building blocks for remote coding-agent sessions.
//!
//! - `Session`, `Activity`, `Artifact` - domain snapshots of the remote store
//! - `classify` / `is_terminal` - status classification of raw states
//! - `poll` - bounded retry-until-condition loop
//! - `SessionSource` - the remote store collaborator trait
//! - `ClientConfig` - immutable, explicitly passed configuration

pub mod activity;
pub mod change_set;
pub mod config;
pub mod poll;
pub mod session;
pub mod status;
pub mod traits;

pub use activity::{
    Activity, ActivityId, ActivityKind, ActivityType, Artifact, BashOutput, MediaArtifact, Plan,
    PlanStep,
};
pub use change_set::{
    ChangeSetArtifact, ChangeSummary, ChangeType, GitPatch, ParsedChangeSet, ParsedFile,
};
pub use config::{ClientConfig, ConfigError, ConfigFile};
pub use poll::{PollOptions, PollReason, PollResult, poll, retry};
pub use session::{
    AutomationMode, CreateSessionRequest, GithubRepo, PullRequest, Session, SessionId,
    SessionOutput, Source, SourceContext, source_name,
};
pub use status::{SessionStatus, classify, is_terminal};
pub use traits::{
    ActivityOrder, ActivityQuery, SessionPage, SessionSource, SourceError, SourcePage,
    select_activities,
};
