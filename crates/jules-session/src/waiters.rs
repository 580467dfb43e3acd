//! Waiting for session milestones.
//!
//! Each waiter owns its own poll loop and budget; running one after another
//! does not share a deadline.

use std::collections::HashSet;

use jules_core::{
    Activity, ActivityKind, ActivityQuery, ActivityType, PollOptions, PollResult, Session,
    SessionSource, SourceError, poll,
};
use tracing::info;

/// Most recent generated plan not superseded by a rejection, re-hydrating first.
async fn latest_plan<S>(source: &S, session_id: &str) -> Result<Option<Activity>, SourceError>
where
    S: SessionSource + ?Sized,
{
    source.hydrate(session_id).await?;
    let plan_query = ActivityQuery::latest_of(ActivityType::PlanGenerated);
    let rejection_query = ActivityQuery::latest_of(ActivityType::PlanRejected);
    let (plans, rejections) = futures::try_join!(
        source.list_activities(session_id, &plan_query),
        source.list_activities(session_id, &rejection_query),
    )?;
    let rejected_at = rejections.first().map(|a| a.create_time);
    Ok(plans
        .into_iter()
        .next()
        .filter(|plan| rejected_at.is_none_or(|at| plan.create_time > at)))
}

/// Wait until a plan-generated activity exists.
///
/// A plan that was rejected does not count; the wait is for its replacement.
pub async fn wait_for_plan<S>(source: &S, session_id: &str, options: PollOptions) -> PollResult<Activity>
where
    S: SessionSource + ?Sized,
{
    let result = poll(
        || latest_plan(source, session_id),
        Option::is_some,
        options,
    )
    .await
    .flatten();
    info!(session_id, reason = ?result.reason, attempts = result.attempts, "Plan wait finished");
    result
}

/// Wait until the session reaches a terminal state.
///
/// The last fetched snapshot is returned whatever the outcome.
pub async fn wait_for_completion<S>(
    source: &S,
    session_id: &str,
    options: PollOptions,
) -> PollResult<Session>
where
    S: SessionSource + ?Sized,
{
    let result = poll(
        || source.get_session(session_id),
        Session::is_terminal,
        options,
    )
    .await;
    info!(session_id, reason = ?result.reason, attempts = result.attempts, "Completion wait finished");
    result
}

/// Ids of the agent messages already in the log.
///
/// Read before sending; the reply is the first agent message outside this set.
///
/// # Errors
/// Returns error if the source fails.
pub async fn seen_agent_messages<S>(source: &S, session_id: &str) -> Result<HashSet<String>, SourceError>
where
    S: SessionSource + ?Sized,
{
    source.hydrate(session_id).await?;
    let query = ActivityQuery {
        activity_type: Some(ActivityType::AgentMessaged),
        ..ActivityQuery::default()
    };
    let messages = source.list_activities(session_id, &query).await?;
    Ok(messages.into_iter().map(|a| a.id).collect())
}

/// Wait for an agent message that is not in `seen`.
pub async fn wait_for_reply<S>(
    source: &S,
    session_id: &str,
    seen: &HashSet<String>,
    options: PollOptions,
) -> PollResult<Activity>
where
    S: SessionSource + ?Sized,
{
    let query = ActivityQuery {
        activity_type: Some(ActivityType::AgentMessaged),
        ..ActivityQuery::default()
    };
    let fetch = || {
        let query = &query;
        async move {
            source.hydrate(session_id).await?;
            let messages = source.list_activities(session_id, query).await?;
            Ok::<_, SourceError>(messages.into_iter().find(|a| !seen.contains(&a.id)))
        }
    };
    poll(fetch, Option::is_some, options).await.flatten()
}

/// Message text of a reply activity.
#[must_use]
pub fn reply_text(activity: &Activity) -> Option<&str> {
    match &activity.kind {
        ActivityKind::AgentMessaged { message } => Some(message),
        _ => None,
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use std::time::Duration;

    use jules_core::PollReason;

    use super::*;
    use crate::reducer::fixtures::*;
    use crate::storage::MemorySource;

    fn options(interval_ms: u64, max_ms: u64) -> PollOptions {
        PollOptions::new(Duration::from_millis(interval_ms), Duration::from_millis(max_ms))
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_already_present() {
        let source = MemorySource::new();
        source.insert_session(Session::new("s1", "awaitingPlanApproval"));
        source.push_activity("s1", plan("p", 1, &["A", "B"]));

        let result = wait_for_plan(&source, "s1", options(1_000, 10_000)).await;
        assert!(result.success);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.value.unwrap().id, "p");
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_arrives_later() {
        let source = std::sync::Arc::new(MemorySource::new());
        source.insert_session(Session::new("s1", "planning"));

        let writer = source.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2_500)).await;
            writer.push_activity("s1", plan("p", 2, &["A"]));
        });

        let result = wait_for_plan(source.as_ref(), "s1", options(1_000, 10_000)).await;
        assert_eq!(result.reason, PollReason::ConditionMet);
        assert_eq!(result.attempts, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_timeout_has_no_value() {
        let source = MemorySource::new();
        source.insert_session(Session::new("s1", "planning"));

        let result = wait_for_plan(&source, "s1", options(1_000, 3_000)).await;
        assert_eq!(result.reason, PollReason::Timeout);
        assert!(!result.success);
        assert!(result.value.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_times_out_at_deadline() {
        let source = MemorySource::new();
        source.insert_session(Session::new("s1", "inProgress"));

        let start = tokio::time::Instant::now();
        let result = wait_for_completion(&source, "s1", options(10_000, 1_000)).await;
        assert_eq!(start.elapsed(), Duration::from_millis(1_000));
        assert_eq!(result.reason, PollReason::Timeout);
        assert!(!result.success);
        assert_eq!(result.value.unwrap().state, "inProgress");
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_reaches_terminal() {
        let source = MemorySource::new();
        source.insert_session(Session::new("s1", "CANCELLED"));

        let result = wait_for_completion(&source, "s1", options(1_000, 5_000)).await;
        assert!(result.success);
        assert_eq!(result.value.unwrap().state, "CANCELLED");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_session_is_error_result() {
        let source = MemorySource::new();
        let result = wait_for_completion(&source, "missing", options(1_000, 5_000)).await;
        assert_eq!(result.reason, PollReason::Error);
        assert!(result.error.unwrap().contains("missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_must_be_unseen() {
        let source = MemorySource::new();
        source.insert_session(Session::new("s1", "awaitingUserFeedback"));
        source.push_activity("s1", agent("old", 5, "earlier answer"));

        let seen = seen_agent_messages(&source, "s1").await.unwrap();
        let result = wait_for_reply(&source, "s1", &seen, options(1_000, 2_000)).await;
        assert_eq!(result.reason, PollReason::Timeout);

        source.push_activity("s1", agent("new", 6, "fresh answer"));
        let result = wait_for_reply(&source, "s1", &seen, options(1_000, 2_000)).await;
        assert_eq!(reply_text(&result.value.unwrap()), Some("fresh answer"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_stamped_before_the_old_one_is_seen() {
        let source = MemorySource::new();
        source.insert_session(Session::new("s1", "awaitingUserFeedback"));
        source.push_activity("s1", agent("old", 100, "earlier answer"));
        let seen = seen_agent_messages(&source, "s1").await.unwrap();

        // Remote clock behind: the reply carries an older timestamp.
        source.push_activity("s1", agent("reply", 50, "late clock"));
        let result = wait_for_reply(&source, "s1", &seen, options(1_000, 2_000)).await;
        assert!(result.success);
        assert_eq!(result.value.unwrap().id, "reply");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_plan_does_not_satisfy_wait() {
        let source = MemorySource::new();
        source.insert_session(Session::new("s1", "planning"));
        source.push_activity("s1", plan("p1", 1, &["A"]));
        source.push_activity(
            "s1",
            at("r1", 2, ActivityKind::PlanRejected { feedback: None }),
        );

        let result = wait_for_plan(&source, "s1", options(1_000, 2_000)).await;
        assert_eq!(result.reason, PollReason::Timeout);

        source.push_activity("s1", plan("p2", 3, &["B"]));
        let result = wait_for_plan(&source, "s1", options(1_000, 2_000)).await;
        assert!(result.success);
        assert_eq!(result.value.unwrap().id, "p2");
    }
}
