//! Session orchestration for remote coding agents.
//!
//! Provides:
//! - `SessionManager` - Operations over a [`jules_core::SessionSource`]
//! - Derived views: session state, change reconciliation, per-file diffs
//! - Milestone waiters (plan, completion, reply)
//! - Storage implementations (memory)

pub mod diff;
pub mod manager;
pub mod reconcile;
pub mod reducer;
pub mod storage;
pub mod waiters;

pub use diff::{DiffView, extract_diff, extract_file_diff};
pub use manager::{
    CreateAndWait, InteractOutcome, Interaction, ManagerError, PrRef, ReviewChanges,
    ReviewDetail, ReviewOptions, SessionBashOutputs, SessionManager, SessionPlan, SessionState,
    SessionSummary, ShowDiff, ShowDiffOptions, WaitOptions, derive_session_state,
};
pub use reconcile::{ChangeFilter, FileChange, ReconcileOptions, Reconciliation, reconcile_changes};
pub use reducer::{
    ActivityInsights, ActivityLog, BashCommand, BashOutputs, BashSummary, LastActivity,
    LastAgentMessage, PendingPlan, PlanStatus,
};
#[cfg(feature = "memory")]
pub use storage::MemorySource;
