//! Classification of raw session state strings.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Semantic status derived from a raw session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The agent is working; derived views may still change.
    Busy,
    /// Safe to act on: waiting for input, paused, completed or unknown.
    Stable,
    /// The session failed.
    Failed,
}

impl SessionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::Stable => "stable",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Compared after `normalize`, so `inProgress`, `IN_PROGRESS` and `in_progress`
// all land on the same entry.
const BUSY_STATES: &[&str] = &["queued", "planning", "inprogress"];
const FAILED_STATES: &[&str] = &["failed"];
const TERMINAL_STATES: &[&str] = &["completed", "failed", "cancelled", "canceled"];

/// Lowercase a raw state and drop underscores, so `IN_PROGRESS` and
/// `inProgress` compare equal.
#[must_use]
pub fn normalize(state: &str) -> String {
    state
        .chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Classify a raw state string.
///
/// Failed wins over busy. Unrecognized states are stable.
#[must_use]
pub fn classify(state: &str) -> SessionStatus {
    let state = normalize(state);
    if FAILED_STATES.contains(&state.as_str()) {
        SessionStatus::Failed
    } else if BUSY_STATES.contains(&state.as_str()) {
        SessionStatus::Busy
    } else {
        SessionStatus::Stable
    }
}

/// Whether no further progress will happen in this state.
#[must_use]
pub fn is_terminal(state: &str) -> bool {
    TERMINAL_STATES.contains(&normalize(state).as_str())
}

/// Human-readable description of a raw state.
#[must_use]
pub fn describe_state(state: &str) -> &'static str {
    match normalize(state).as_str() {
        "queued" => "Queued and waiting to start",
        "planning" => "The agent is planning",
        "awaitingplanapproval" => "Waiting for plan approval",
        "awaitinguserfeedback" => "Waiting for your input",
        "inprogress" => "The agent is actively working on this task",
        "paused" => "Session is paused",
        "completed" => "Task completed successfully",
        "failed" => "Task failed - check activities for error details",
        "cancelled" | "canceled" => "Task was cancelled",
        _ => "Unknown state",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_aliases() {
        for state in ["queued", "QUEUED", "planning", "PLANNING", "inProgress", "IN_PROGRESS", "in_progress"] {
            assert_eq!(classify(state), SessionStatus::Busy, "{state}");
        }
    }

    #[test]
    fn test_failed_and_unknown() {
        assert_eq!(classify("failed"), SessionStatus::Failed);
        assert_eq!(classify("FAILED"), SessionStatus::Failed);
        assert_eq!(classify("awaitingPlanApproval"), SessionStatus::Stable);
        assert_eq!(classify("somethingNew"), SessionStatus::Stable);
        assert_eq!(classify(""), SessionStatus::Stable);
    }

    #[test]
    fn test_terminal_states() {
        assert!(is_terminal("COMPLETED"));
        assert!(is_terminal("failed"));
        assert!(is_terminal("Cancelled"));
        assert!(is_terminal("canceled"));
        assert!(!is_terminal("inProgress"));
        assert!(!is_terminal("awaitingUserFeedback"));
    }

    #[test]
    fn test_describe_state() {
        assert_eq!(describe_state("AWAITING_PLAN_APPROVAL"), "Waiting for plan approval");
        assert_eq!(describe_state("bogus"), "Unknown state");
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&SessionStatus::Busy).unwrap();
        assert_eq!(json, "\"busy\"");
    }
}
