//! Derived views over a session's activity log.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use jules_core::{Activity, ActivityKind, ActivityType, BashOutput, PlanStep};
use serde::{Deserialize, Serialize};

/// The most recent activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastActivity {
    pub activity_id: String,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub timestamp: DateTime<Utc>,
}

/// The most recent non-empty agent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastAgentMessage {
    pub activity_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A generated plan with no later approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPlan {
    pub activity_id: String,
    pub plan_id: String,
    pub steps: Vec<PlanStep>,
}

/// Counters describing how a session went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityInsights {
    pub completion_attempts: usize,
    pub plan_regenerations: usize,
    pub user_interventions: usize,
    pub failed_command_count: usize,
}

/// Where the session's plan stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Approved,
    Rejected,
    PendingApproval,
    NotGenerated,
}

/// One bash command, tagged with its activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BashCommand {
    #[serde(flatten)]
    pub output: BashOutput,
    pub activity_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BashSummary {
    pub total_commands: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// All bash commands of a session, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BashOutputs {
    pub outputs: Vec<BashCommand>,
    pub summary: BashSummary,
}

/// A session's activities in chronological order.
///
/// Sorting happens once, at construction; ties keep their log order. Every
/// view is recomputed from the sorted sequence, so an empty log simply yields
/// empty views.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityLog {
    activities: Vec<Activity>,
}

impl ActivityLog {
    #[must_use]
    pub fn new(mut activities: Vec<Activity>) -> Self {
        activities.sort_by_key(|a| a.create_time);
        Self { activities }
    }

    #[must_use]
    pub fn activities(&self) -> &[Activity] {
        &self.activities
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.activities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    #[must_use]
    pub fn find(&self, id: &str) -> Option<&Activity> {
        self.activities.iter().find(|a| a.id == id)
    }

    /// Newest first.
    pub fn newest_first(&self) -> impl Iterator<Item = &Activity> {
        self.activities.iter().rev()
    }

    /// Most recent activity of a type.
    #[must_use]
    pub fn latest_of(&self, activity_type: ActivityType) -> Option<&Activity> {
        self.newest_first()
            .find(|a| a.activity_type() == activity_type)
    }

    #[must_use]
    pub fn last_activity(&self) -> Option<LastActivity> {
        self.activities.last().map(|a| LastActivity {
            activity_id: a.id.clone(),
            activity_type: a.activity_type(),
            timestamp: a.create_time,
        })
    }

    #[must_use]
    pub fn last_agent_message(&self) -> Option<LastAgentMessage> {
        self.newest_first().find_map(|a| match &a.kind {
            ActivityKind::AgentMessaged { message } if !message.is_empty() => {
                Some(LastAgentMessage {
                    activity_id: a.id.clone(),
                    content: message.clone(),
                    timestamp: a.create_time,
                })
            }
            _ => None,
        })
    }

    /// The newest plan, unless an approval is strictly newer.
    ///
    /// An approval sharing the plan's timestamp does not count.
    #[must_use]
    pub fn pending_plan(&self) -> Option<PendingPlan> {
        let (activity, plan) = self.newest_first().find_map(|a| match &a.kind {
            ActivityKind::PlanGenerated { plan } => Some((a, plan)),
            _ => None,
        })?;

        let approved_later = self.activities.iter().any(|a| {
            a.activity_type() == ActivityType::PlanApproved && a.create_time > activity.create_time
        });
        if approved_later {
            return None;
        }

        Some(PendingPlan {
            activity_id: activity.id.clone(),
            plan_id: plan.id.clone(),
            steps: plan.steps.clone(),
        })
    }

    /// Whether the session was ever completed or approved.
    #[must_use]
    pub fn has_stable_history(&self) -> bool {
        self.activities.iter().any(|a| {
            matches!(
                a.activity_type(),
                ActivityType::SessionCompleted | ActivityType::PlanApproved
            )
        })
    }

    #[must_use]
    pub fn counts(&self) -> BTreeMap<ActivityType, usize> {
        let mut counts = BTreeMap::new();
        for activity in &self.activities {
            *counts.entry(activity.activity_type()).or_insert(0) += 1;
        }
        counts
    }

    #[must_use]
    pub fn insights(&self) -> ActivityInsights {
        let counts = self.counts();
        let count = |ty: ActivityType| counts.get(&ty).copied().unwrap_or(0);
        ActivityInsights {
            completion_attempts: count(ActivityType::SessionCompleted),
            plan_regenerations: count(ActivityType::PlanGenerated).saturating_sub(1),
            user_interventions: count(ActivityType::UserMessaged),
            failed_command_count: self
                .activities
                .iter()
                .flat_map(Activity::bash_outputs)
                .filter(|output| !output.succeeded())
                .count(),
        }
    }

    /// The most recent approval or rejection decides.
    #[must_use]
    pub fn plan_status(&self) -> PlanStatus {
        let decision = self.newest_first().find_map(|a| match a.activity_type() {
            ActivityType::PlanApproved => Some(PlanStatus::Approved),
            ActivityType::PlanRejected => Some(PlanStatus::Rejected),
            _ => None,
        });
        match decision {
            Some(status) => status,
            None if self.latest_of(ActivityType::PlanGenerated).is_some() => {
                PlanStatus::PendingApproval
            }
            None => PlanStatus::NotGenerated,
        }
    }

    /// Bash commands, optionally restricted to some activities.
    #[must_use]
    pub fn bash_outputs(&self, activity_ids: Option<&[String]>) -> BashOutputs {
        let mut result = BashOutputs::default();
        let selected = self
            .activities
            .iter()
            .filter(|a| activity_ids.is_none_or(|ids| ids.contains(&a.id)));

        for activity in selected {
            for output in activity.bash_outputs() {
                result.summary.total_commands += 1;
                if output.succeeded() {
                    result.summary.succeeded += 1;
                } else {
                    result.summary.failed += 1;
                }
                result.outputs.push(BashCommand {
                    output: output.clone(),
                    activity_id: activity.id.clone(),
                });
            }
        }
        result
    }
}

impl From<Vec<Activity>> for ActivityLog {
    fn from(activities: Vec<Activity>) -> Self {
        Self::new(activities)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{TimeZone, Utc};
    use jules_core::{Activity, ActivityKind, Artifact, ChangeSetArtifact, Plan, PlanStep};

    pub fn at(id: &str, secs: i64, kind: ActivityKind) -> Activity {
        Activity::new(id, Utc.timestamp_opt(secs, 0).unwrap(), kind)
    }

    pub fn plan(id: &str, secs: i64, steps: &[&str]) -> Activity {
        at(
            id,
            secs,
            ActivityKind::PlanGenerated {
                plan: Plan {
                    id: format!("plan-{id}"),
                    steps: steps.iter().map(|s| PlanStep::titled(*s)).collect(),
                },
            },
        )
    }

    pub fn approved(id: &str, secs: i64) -> Activity {
        at(id, secs, ActivityKind::PlanApproved { plan_id: None })
    }

    pub fn agent(id: &str, secs: i64, message: &str) -> Activity {
        at(
            id,
            secs,
            ActivityKind::AgentMessaged {
                message: message.to_string(),
            },
        )
    }

    /// Single-file patch with the given change kind and line counts.
    pub fn file_patch(path: &str, change: &str, additions: usize, deletions: usize) -> String {
        let mut patch = format!("diff --git a/{path} b/{path}\n");
        match change {
            "created" => {
                patch.push_str("new file mode 100644\n--- /dev/null\n");
                patch.push_str(&format!("+++ b/{path}\n"));
            }
            "deleted" => {
                patch.push_str("deleted file mode 100644\n");
                patch.push_str(&format!("--- a/{path}\n+++ /dev/null\n"));
            }
            _ => patch.push_str(&format!("--- a/{path}\n+++ b/{path}\n")),
        }
        patch.push_str("@@ -1 +1 @@\n");
        for i in 0..additions {
            patch.push_str(&format!("+added {i}\n"));
        }
        for i in 0..deletions {
            patch.push_str(&format!("-removed {i}\n"));
        }
        patch
    }

    pub fn change_set(id: &str, secs: i64, patch: String) -> Activity {
        at(id, secs, ActivityKind::ChangeSet)
            .with_artifact(Artifact::ChangeSet(ChangeSetArtifact::from_patch(patch)))
    }
}
