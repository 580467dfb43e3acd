//! Reconciling change-sets into a per-file change list.
//!
//! A settled session has one final change-set (the outcome); a busy one only
//! has the partial change-sets attached to its activities, which are merged
//! path by path.

use std::collections::HashMap;

use jules_core::{Activity, ChangeSetArtifact, ChangeSummary, ChangeType, Session, SessionStatus};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::reducer::ActivityLog;

/// Activity id recorded for files taken from the final outcome.
pub const OUTCOME_ACTIVITY_ID: &str = "outcome";

pub const STALE_HISTORY_WARNING: &str =
    "This session was previously stable, but is busy again. Changes may be incomplete.";

/// Net change to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub path: String,
    pub change_type: ChangeType,
    pub activity_ids: Vec<String>,
    pub additions: u64,
    pub deletions: u64,
}

/// Restrict results to one change type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeFilter {
    #[default]
    All,
    Created,
    Modified,
    Deleted,
}

impl ChangeFilter {
    #[must_use]
    pub fn matches(self, change_type: ChangeType) -> bool {
        match self {
            Self::All => true,
            Self::Created => change_type == ChangeType::Created,
            Self::Modified => change_type == ChangeType::Modified,
            Self::Deleted => change_type == ChangeType::Deleted,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOptions {
    /// Only look at this activity's own change-sets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(default)]
    pub filter: ChangeFilter,
}

/// Reconciled file changes of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub files: Vec<FileChange>,
    /// Counts over `files`, after filtering.
    pub summary: ChangeSummary,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub has_stable_history: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Net type of a file first seen as `first` and last seen as `latest`.
///
/// Created then deleted cancels out. Created stays created.
#[must_use]
pub fn net_change_type(first: ChangeType, latest: ChangeType) -> Option<ChangeType> {
    match (first, latest) {
        (ChangeType::Created, ChangeType::Deleted) => None,
        (ChangeType::Created, _) => Some(ChangeType::Created),
        (_, latest) => Some(latest),
    }
}

/// Files of a final change-set, copied verbatim.
#[must_use]
pub fn from_outcome(change_set: Option<&ChangeSetArtifact>) -> Vec<FileChange> {
    let Some(change_set) = change_set else {
        return Vec::new();
    };
    change_set
        .parsed()
        .files
        .into_iter()
        .map(|file| FileChange {
            path: file.path,
            change_type: file.change_type,
            activity_ids: vec![OUTCOME_ACTIVITY_ID.to_string()],
            additions: file.additions,
            deletions: file.deletions,
        })
        .collect()
}

/// Files of one activity's change-sets, without merging.
#[must_use]
pub fn from_activity(activity: &Activity) -> Vec<FileChange> {
    activity
        .change_sets()
        .flat_map(|change_set| change_set.parsed().files)
        .map(|file| FileChange {
            path: file.path,
            change_type: file.change_type,
            activity_ids: vec![activity.id.clone()],
            additions: file.additions,
            deletions: file.deletions,
        })
        .collect()
}

struct Accumulated {
    first: ChangeType,
    latest: ChangeType,
    activity_ids: Vec<String>,
    additions: u64,
    deletions: u64,
}

/// Merge every change-set in the log, in order, by path.
///
/// Line counts are summed; paths keep the order they were first seen in.
#[must_use]
pub fn accumulate(activities: &[Activity]) -> Vec<FileChange> {
    let mut order: Vec<String> = Vec::new();
    let mut by_path: HashMap<String, Accumulated> = HashMap::new();

    for activity in activities {
        for file in activity.change_sets().flat_map(|cs| cs.parsed().files) {
            if let Some(entry) = by_path.get_mut(&file.path) {
                entry.activity_ids.push(activity.id.clone());
                entry.additions += file.additions;
                entry.deletions += file.deletions;
                entry.latest = file.change_type;
            } else {
                order.push(file.path.clone());
                by_path.insert(
                    file.path,
                    Accumulated {
                        first: file.change_type,
                        latest: file.change_type,
                        activity_ids: vec![activity.id.clone()],
                        additions: file.additions,
                        deletions: file.deletions,
                    },
                );
            }
        }
    }

    order
        .into_iter()
        .filter_map(|path| {
            let entry = by_path.remove(&path)?;
            let change_type = net_change_type(entry.first, entry.latest)?;
            Some(FileChange {
                path,
                change_type,
                activity_ids: entry.activity_ids,
                additions: entry.additions,
                deletions: entry.deletions,
            })
        })
        .collect()
}

/// Current file changes of a session.
///
/// An explicit activity id bypasses both modes; an unknown id yields no files.
/// Otherwise a busy session accumulates across the log and any other session
/// reads its outcome.
#[must_use]
pub fn reconcile_changes(
    session: &Session,
    log: &ActivityLog,
    options: &ReconcileOptions,
) -> Reconciliation {
    let busy = session.status() == SessionStatus::Busy;

    let files = match &options.activity_id {
        Some(id) => log.find(id).map(from_activity).unwrap_or_default(),
        None if busy => accumulate(log.activities()),
        None => from_outcome(session.change_set()),
    };

    let files: Vec<FileChange> = files
        .into_iter()
        .filter(|file| options.filter.matches(file.change_type))
        .collect();
    let summary = ChangeSummary::from_types(files.iter().map(|f| f.change_type));

    let mut result = Reconciliation {
        files,
        summary,
        has_stable_history: false,
        warning: None,
    };
    if busy && log.has_stable_history() {
        warn!(session_id = %session.id, "Session is busy again after being stable");
        result.has_stable_history = true;
        result.warning = Some(STALE_HISTORY_WARNING.to_string());
    }
    result
}
