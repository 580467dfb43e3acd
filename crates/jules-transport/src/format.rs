//! Rendering of manager results for tool output.

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, SecondsFormat, Utc};
use jules_core::status::{describe_state, normalize};
use jules_core::{
    Activity, ActivityKind, Artifact, ChangeType, Session, SessionOutput, Source,
};
use jules_session::{FileChange, ReviewChanges};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Structured error of a failed tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub code: String,
    pub message: String,
}

/// Envelope returned by orchestration tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolEnvelope {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_next_steps: Option<Vec<String>>,
}

impl ToolEnvelope {
    #[must_use]
    pub fn ok(message: impl Into<String>, data: Value, next_steps: Vec<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
            suggested_next_steps: (!next_steps.is_empty()).then_some(next_steps),
        }
    }

    #[must_use]
    pub fn failure(message: impl Into<String>, code: &str) -> Self {
        let message = message.into();
        Self {
            success: false,
            error: Some(ToolFailure {
                code: code.to_string(),
                message: message.clone(),
            }),
            message,
            data: None,
            suggested_next_steps: None,
        }
    }
}

/// Owned list of hint strings.
pub(crate) fn steps(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

/// ISO-8601 with milliseconds and a `Z` suffix.
#[must_use]
pub fn iso(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// What to do next, by raw session state.
#[must_use]
pub fn next_steps(session: &Session) -> Vec<String> {
    match normalize(&session.state).as_str() {
        "inprogress" | "planning" | "queued" => steps(&[
            "Use get_session_state to check current status",
            "Use list_activities to see detailed progress",
            "Use wait_for_completion to wait for the task to finish",
        ]),
        "awaitingplanapproval" | "awaitinguserfeedback" => steps(&[
            "Use list_activities to see what the agent is waiting for",
            "If waiting for plan approval: use approve_plan or reject_plan",
            "Use send_reply_to_session to provide additional context",
        ]),
        "completed" if session.pull_request().is_some() => steps(&[
            "Review and merge the pull request",
            "Use create_session to start a new task",
        ]),
        "completed" => steps(&["Use list_activities to see the final results"]),
        "failed" => steps(&[
            "Use list_activities to see error details",
            "Use create_session to retry with a modified prompt",
        ]),
        "cancelled" | "canceled" => steps(&["Use create_session to start a new task"]),
        _ => steps(&["Use get_session_state to check current status"]),
    }
}

/// Session view with a state description; patch bodies are left out.
#[must_use]
pub fn format_session(session: &Session) -> Value {
    let outputs: Vec<Value> = session
        .outputs
        .iter()
        .map(|output| match output {
            SessionOutput::PullRequest { pull_request } => json!({
                "type": "pullRequest",
                "pullRequest": pull_request,
            }),
            SessionOutput::ChangeSet { change_set } => json!({
                "type": "changeSet",
                "changeSet": {
                    "source": change_set.source,
                    "gitPatch": {
                        "baseCommitId": change_set.git_patch.base_commit_id,
                        "suggestedCommitMessage": change_set.git_patch.suggested_commit_message,
                    },
                },
            }),
        })
        .collect();

    let title = if session.title.is_empty() {
        "(untitled)"
    } else {
        session.title.as_str()
    };

    json!({
        "id": session.id,
        "name": session.name,
        "url": session.url,
        "title": title,
        "prompt": session.prompt,
        "state": session.state,
        "stateDescription": describe_state(&session.state),
        "source": session.source_context.as_ref().map(|c| &c.source),
        "branch": session.branch(),
        "outputs": outputs,
        "createTime": session.create_time.as_ref().map(iso),
        "updateTime": session.update_time.as_ref().map(iso),
    })
}

/// Connected repository view.
#[must_use]
pub fn format_source(source: &Source) -> Value {
    match &source.github_repo {
        Some(gh) => json!({
            "name": source.name,
            "id": source.id,
            "owner": gh.owner,
            "repo": gh.repo,
            "isPrivate": gh.is_private,
            "fullName": source.full_name(),
        }),
        None => json!({ "name": source.name, "id": source.id, "type": "unknown" }),
    }
}

fn format_artifact(artifact: &Artifact) -> Value {
    match artifact {
        Artifact::ChangeSet(change_set) => {
            let parsed = change_set.parsed();
            json!({
                "type": "changeSet",
                "files": parsed.files.len(),
                "summary": parsed.summary,
            })
        }
        Artifact::BashOutput(bash) => json!({
            "type": "bashOutput",
            "command": bash.command,
            "exitCode": bash.exit_code,
        }),
        Artifact::Media(media) => json!({
            "type": "media",
            "mimeType": media.mime_type,
            "sizeBytes": BASE64.decode(media.data.as_bytes()).map_or(0, |bytes| bytes.len()),
        }),
    }
}

/// Compact activity view with kind-specific extras.
#[must_use]
pub fn format_activity(activity: &Activity) -> Value {
    let activity_type = activity.activity_type();
    let mut view = Map::new();
    view.insert("id".into(), json!(activity.id));
    view.insert("type".into(), json!(activity_type));
    view.insert("typeDescription".into(), json!(activity_type.description()));
    view.insert("timestamp".into(), json!(iso(&activity.create_time)));

    if let Some(message) = activity.message().filter(|m| !m.is_empty()) {
        view.insert("message".into(), json!(message));
    }

    match &activity.kind {
        ActivityKind::PlanGenerated { plan } => {
            view.insert(
                "plan".into(),
                json!({
                    "id": plan.id,
                    "totalSteps": plan.steps.len(),
                    "steps": plan.steps,
                }),
            );
        }
        ActivityKind::ProgressUpdated { title, description } => {
            view.insert(
                "progress".into(),
                json!({ "title": title, "description": description }),
            );
        }
        ActivityKind::SessionFailed { reason } => {
            view.insert("errorMessage".into(), json!(reason));
        }
        _ => {}
    }

    if !activity.artifacts.is_empty() {
        let artifacts: Vec<Value> = activity.artifacts.iter().map(format_artifact).collect();
        view.insert("artifacts".into(), Value::Array(artifacts));
    }

    Value::Object(view)
}

/// Output format of a code review.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewFormat {
    #[default]
    Summary,
    Tree,
    Detailed,
    Markdown,
}

const fn icon(change_type: ChangeType) -> &'static str {
    match change_type {
        ChangeType::Created => "🟢",
        ChangeType::Deleted => "🔴",
        ChangeType::Modified => "🟡",
    }
}

fn stats(file: &FileChange) -> String {
    format!("(+{}/-{})", file.additions, file.deletions)
}

fn format_summary(files: &[FileChange]) -> String {
    let additions: u64 = files.iter().map(|f| f.additions).sum();
    let deletions: u64 = files.iter().map(|f| f.deletions).sum();
    format!("{} files changed (+{additions}/-{deletions})", files.len())
}

fn format_tree(files: &[FileChange]) -> String {
    let mut by_dir: BTreeMap<&str, Vec<&FileChange>> = BTreeMap::new();
    for file in files {
        let dir = file.path.rsplit_once('/').map_or(".", |(dir, _)| dir);
        by_dir.entry(dir).or_default().push(file);
    }

    let mut lines = Vec::new();
    for (dir, dir_files) in by_dir {
        lines.push(format!("{dir}/"));
        for file in dir_files {
            let name = file.path.rsplit('/').next().unwrap_or(&file.path);
            if file.change_type == ChangeType::Deleted {
                lines.push(format!("  {} {name}", icon(file.change_type)));
            } else {
                lines.push(format!("  {} {name} {}", icon(file.change_type), stats(file)));
            }
        }
    }
    lines.join("\n")
}

fn format_detailed(files: &[FileChange]) -> String {
    files
        .iter()
        .map(|file| {
            format!(
                "{} {} {} [{} activities]",
                icon(file.change_type),
                file.path,
                stats(file),
                file.activity_ids.len()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_markdown(review: &ReviewChanges) -> String {
    let mut lines = vec![
        "# Code Review Summary".to_string(),
        String::new(),
        format!("**Session:** {} ({})", review.title, review.session_id),
        format!(
            "**Status:** {} ({})",
            review.status.as_str().to_uppercase(),
            review.state
        ),
        format!("**URL:** {}", review.url.as_deref().unwrap_or_default()),
    ];
    if let Some(pr) = &review.pr {
        lines.push(format!("**PR:** {} - {}", pr.title, pr.url));
    }
    lines.push(String::new());

    if let Some(warning) = &review.changes.warning {
        lines.push(format!("> ⚠️ {warning}"));
        lines.push(String::new());
    }

    let summary = &review.changes.summary;
    lines.push("## Summary".to_string());
    lines.push(format!(
        "- Files: {} (created: {}, modified: {}, deleted: {})",
        summary.total_files, summary.created, summary.modified, summary.deleted
    ));
    if let (Some(created), Some(updated)) = (&review.created_at, &review.updated_at) {
        lines.push(format!("- Created: {}", iso(created)));
        lines.push(format!("- Updated: {}", iso(updated)));
        if let Some(ms) = review.duration_ms {
            lines.push(format!("- Duration: {}s", (ms + 500).div_euclid(1000)));
        }
    }
    if let Some(insights) = &review.insights {
        lines.push(format!("- Completion attempts: {}", insights.completion_attempts));
        lines.push(format!("- Plan regenerations: {}", insights.plan_regenerations));
        lines.push(format!("- User interventions: {}", insights.user_interventions));
        lines.push(format!("- Failed commands: {}", insights.failed_command_count));
    }
    lines.push(String::new());

    if !review.changes.files.is_empty() {
        lines.push("## Files".to_string());
        lines.push(String::new());
        for file in &review.changes.files {
            lines.push(format!("- {} {} {}", icon(file.change_type), file.path, stats(file)));
        }
    }

    lines.join("\n")
}

/// Render a review in the requested format.
#[must_use]
pub fn format_review(review: &ReviewChanges, format: ReviewFormat) -> String {
    let files = &review.changes.files;
    match format {
        ReviewFormat::Summary => format_summary(files),
        ReviewFormat::Tree => format_tree(files),
        ReviewFormat::Detailed => format_detailed(files),
        ReviewFormat::Markdown => format_markdown(review),
    }
}
