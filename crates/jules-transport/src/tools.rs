//! Tool registry: maps `tools/call` requests onto the session manager.

use std::time::Duration;

use jules_core::{
    ActivityQuery, ActivityType, AutomationMode, CreateSessionRequest, PollReason, PollResult,
    SessionSource, SourceError, session::normalize_github_repo,
};
use jules_session::{
    ChangeFilter, Interaction, ManagerError, PlanStatus, ReviewDetail, ReviewOptions,
    SessionManager, ShowDiffOptions, WaitOptions,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;

use crate::format::{
    ReviewFormat, ToolEnvelope, format_activity, format_review, format_session, format_source,
    next_steps, steps,
};
use crate::protocol::{CallToolResult, ToolDescriptor};

const STILL_RUNNING: &str = "The session is still running - use get_session_state to check later";

/// Tool dispatch error.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments for {tool}: {source}")]
    InvalidArguments {
        tool: String,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Manager(#[from] ManagerError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionArgs {
    #[serde(default)]
    session_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewArgs {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    activity_id: Option<String>,
    #[serde(default)]
    format: ReviewFormat,
    #[serde(default)]
    filter: ChangeFilter,
    #[serde(default)]
    detail: ReviewDetail,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShowDiffArgs {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    activity_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ReplyAction {
    Approve,
    Send,
    Ask,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyArgs {
    #[serde(default)]
    session_id: String,
    action: ReplyAction,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateArgs {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    repo: Option<String>,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    interactive: bool,
    #[serde(default)]
    auto_pr: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageArgs {
    #[serde(default)]
    page_size: Option<i64>,
    #[serde(default)]
    page_token: Option<String>,
}

impl PageArgs {
    fn page_size(&self) -> Option<usize> {
        self.page_size.and_then(|n| usize::try_from(n).ok())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceArgs {
    #[serde(default)]
    source: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BashArgs {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    activity_ids: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListActivitiesArgs {
    #[serde(default)]
    session_id: String,
    #[serde(flatten)]
    query: ActivityQuery,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejectArgs {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    feedback: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WaitArgs {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    poll_interval_ms: Option<u64>,
}

impl WaitArgs {
    fn options(&self) -> WaitOptions {
        WaitOptions {
            interval: self.poll_interval_ms.map(Duration::from_millis),
            max_duration: self.timeout_ms.map(Duration::from_millis),
        }
    }
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAndWaitArgs {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    repo: String,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    automation_mode: AutomationMode,
    #[serde(default = "default_true")]
    wait_for_completion: bool,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    require_plan_approval: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuickTaskArgs {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    repo: String,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default = "default_true")]
    create_pr: bool,
}

impl From<QuickTaskArgs> for CreateAndWaitArgs {
    fn from(args: QuickTaskArgs) -> Self {
        Self {
            prompt: args.prompt,
            repo: args.repo,
            branch: args.branch,
            title: None,
            automation_mode: if args.create_pr {
                AutomationMode::AutoCreatePr
            } else {
                AutomationMode::AutomationModeUnspecified
            },
            wait_for_completion: true,
            timeout_ms: None,
            require_plan_approval: false,
        }
    }
}

fn poll_stats<T>(result: &PollResult<T>) -> Value {
    json!({ "attempts": result.attempts, "elapsedMs": result.elapsed_ms })
}

/// Render an envelope, flagging failures.
fn envelope(result: Result<ToolEnvelope, ManagerError>, code: &str) -> CallToolResult {
    let envelope = result.unwrap_or_else(|e| ToolEnvelope::failure(e.to_string(), code));
    let is_error = !envelope.success;
    CallToolResult {
        is_error,
        ..CallToolResult::json(&envelope)
    }
}

fn tool(name: &str, description: &str, properties: Value, required: &[&str]) -> ToolDescriptor {
    ToolDescriptor {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

fn session_id_schema() -> Value {
    json!({ "type": "string", "description": "Session ID" })
}

/// Every tool the server offers.
#[must_use]
pub fn descriptors() -> Vec<ToolDescriptor> {
    let only_session = || json!({ "sessionId": session_id_schema() });
    vec![
        tool(
            "get_session_state",
            "Get the current status of a session: busy, stable or failed, with the last activity, \
             the last agent message and any plan awaiting approval.",
            only_session(),
            &["sessionId"],
        ),
        tool(
            "get_code_review_context",
            "Review code changes from a session, organized by file with change types, line counts \
             and activity IDs. Busy sessions aggregate activity change-sets; stable sessions use \
             the final outcome.",
            json!({
                "sessionId": session_id_schema(),
                "activityId": { "type": "string", "description": "Review a single activity" },
                "format": { "type": "string", "enum": ["summary", "tree", "detailed", "markdown"] },
                "filter": { "type": "string", "enum": ["all", "created", "modified", "deleted"] },
                "detail": { "type": "string", "enum": ["minimal", "standard", "full"] },
            }),
            &["sessionId"],
        ),
        tool(
            "show_code_diff",
            "Show the unified diff of a session, optionally for one file or one activity.",
            json!({
                "sessionId": session_id_schema(),
                "file": { "type": "string", "description": "File path; omit for all files" },
                "activityId": { "type": "string", "description": "Diff a single activity" },
            }),
            &["sessionId"],
        ),
        tool(
            "send_reply_to_session",
            "Approve a plan or send a message. 'ask' waits for the agent's reply, 'send' does not.",
            json!({
                "sessionId": session_id_schema(),
                "action": { "type": "string", "enum": ["approve", "send", "ask"] },
                "message": { "type": "string", "description": "Required for 'send' and 'ask'" },
            }),
            &["sessionId", "action"],
        ),
        tool(
            "create_session",
            "Create a new session. Without repo and branch the session is repoless.",
            json!({
                "prompt": { "type": "string", "description": "The task for the agent" },
                "repo": { "type": "string", "description": "GitHub repository (owner/repo)" },
                "branch": { "type": "string", "description": "Starting branch" },
                "title": { "type": "string" },
                "interactive": { "type": "boolean", "description": "Wait for plan approval" },
                "autoPr": { "type": "boolean", "description": "Open a PR on completion (default true)" },
            }),
            &["prompt"],
        ),
        tool(
            "list_sessions",
            "List recent sessions with pagination.",
            json!({
                "pageSize": { "type": "number", "description": "Sessions per page (1-100)" },
                "pageToken": { "type": "string" },
            }),
            &[],
        ),
        tool(
            "get_bash_outputs",
            "Get the shell commands the agent ran, with output and exit codes.",
            json!({
                "sessionId": session_id_schema(),
                "activityIds": { "type": "array", "items": { "type": "string" } },
            }),
            &["sessionId"],
        ),
        tool(
            "list_activities",
            "List the activities of a session.",
            json!({
                "sessionId": session_id_schema(),
                "order": { "type": "string", "enum": ["asc", "desc"] },
                "activityType": { "type": "string" },
                "limit": { "type": "number" },
            }),
            &["sessionId"],
        ),
        tool(
            "get_session_plan",
            "Get the latest plan of a session and whether it was approved.",
            only_session(),
            &["sessionId"],
        ),
        tool(
            "get_session_summary",
            "Summarize a session: state, plan, progress, errors and activity counts.",
            only_session(),
            &["sessionId"],
        ),
        tool("approve_plan", "Approve the pending plan.", only_session(), &["sessionId"]),
        tool(
            "reject_plan",
            "Reject the pending plan, optionally with feedback.",
            json!({
                "sessionId": session_id_schema(),
                "feedback": { "type": "string" },
            }),
            &["sessionId"],
        ),
        tool("cancel_session", "Cancel a session.", only_session(), &["sessionId"]),
        tool(
            "wait_for_plan",
            "Wait until the agent has generated a plan.",
            json!({
                "sessionId": session_id_schema(),
                "timeoutMs": { "type": "number" },
            }),
            &["sessionId"],
        ),
        tool(
            "wait_for_completion",
            "Wait until a session completes, fails or is cancelled.",
            json!({
                "sessionId": session_id_schema(),
                "timeoutMs": { "type": "number" },
                "pollIntervalMs": { "type": "number" },
            }),
            &["sessionId"],
        ),
        tool(
            "create_and_wait",
            "Create a session and wait for it to finish.",
            json!({
                "prompt": { "type": "string" },
                "repo": { "type": "string", "description": "GitHub repository (owner/repo)" },
                "branch": { "type": "string", "description": "Starting branch (default: main)" },
                "title": { "type": "string" },
                "automationMode": {
                    "type": "string",
                    "enum": ["AUTOMATION_MODE_UNSPECIFIED", "AUTO_CREATE_PR", "AUTO_CREATE_DRAFT_PR"],
                },
                "waitForCompletion": { "type": "boolean" },
                "timeoutMs": { "type": "number" },
                "requirePlanApproval": { "type": "boolean" },
            }),
            &["prompt", "repo"],
        ),
        tool(
            "quick_task",
            "Assign a task to a repository with defaults: no plan approval, a PR on completion, \
             and wait for the session to finish.",
            json!({
                "prompt": { "type": "string", "description": "The task for the agent" },
                "repo": { "type": "string", "description": "GitHub repository (owner/repo)" },
                "branch": { "type": "string", "description": "Starting branch (default: main)" },
                "createPr": { "type": "boolean", "description": "Open a PR (default true)" },
            }),
            &["prompt", "repo"],
        ),
        tool(
            "get_session",
            "Get the details of a session, with suggested next steps for its state.",
            only_session(),
            &["sessionId"],
        ),
        tool(
            "get_latest_activity",
            "Get the most recent activity of a session.",
            only_session(),
            &["sessionId"],
        ),
        tool(
            "list_sources",
            "List the GitHub repositories connected to the account.",
            json!({
                "pageSize": { "type": "number", "description": "Repositories per page (1-100)" },
                "pageToken": { "type": "string" },
            }),
            &[],
        ),
        tool(
            "get_source",
            "Check that a GitHub repository is connected and show its details.",
            json!({
                "source": {
                    "type": "string",
                    "description": "owner/repo or sources/github/owner/repo",
                },
            }),
            &["source"],
        ),
    ]
}

/// Dispatches tool calls to a [`SessionManager`].
pub struct ToolRegistry<S>
where
    S: SessionSource,
{
    manager: SessionManager<S>,
}

impl<S> ToolRegistry<S>
where
    S: SessionSource,
{
    #[must_use]
    pub const fn new(manager: SessionManager<S>) -> Self {
        Self { manager }
    }

    #[must_use]
    pub const fn manager(&self) -> &SessionManager<S> {
        &self.manager
    }

    #[must_use]
    pub fn list(&self) -> Vec<ToolDescriptor> {
        descriptors()
    }

    /// Run one tool.
    ///
    /// # Errors
    /// Returns error for unknown tools, malformed arguments and manager
    /// failures of the non-envelope tools.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<CallToolResult, DispatchError> {
        info!(tool = name, "Tool call");
        match name {
            "get_session_state" => {
                let args: SessionArgs = parse(name, arguments)?;
                let state = self.manager.session_state(&args.session_id).await?;
                Ok(CallToolResult::json(&state))
            }
            "get_code_review_context" => {
                let args: ReviewArgs = parse(name, arguments)?;
                let options = ReviewOptions {
                    activity_id: args.activity_id,
                    filter: args.filter,
                    detail: args.detail,
                };
                let review = self.manager.review_changes(&args.session_id, &options).await?;
                Ok(CallToolResult::text(format_review(&review, args.format)))
            }
            "show_code_diff" => {
                let args: ShowDiffArgs = parse(name, arguments)?;
                let options = ShowDiffOptions {
                    file: args.file,
                    activity_id: args.activity_id,
                };
                let diff = self.manager.show_diff(&args.session_id, &options).await?;
                if diff.diff.unidiff_patch.is_empty() {
                    let context = options
                        .activity_id
                        .map_or_else(|| "this session".to_string(), |id| format!("activity {id}"));
                    return Ok(CallToolResult::text(format!("No changes found in {context}.")));
                }
                Ok(CallToolResult::text(diff.diff.unidiff_patch))
            }
            "send_reply_to_session" => {
                let args: ReplyArgs = parse(name, arguments)?;
                let message = args.message.unwrap_or_default();
                let interaction = match args.action {
                    ReplyAction::Approve => Interaction::Approve,
                    ReplyAction::Send => Interaction::Send(message),
                    ReplyAction::Ask => Interaction::Ask(message),
                };
                let outcome = self.manager.interact(&args.session_id, interaction).await?;
                Ok(CallToolResult::text(outcome.reply.map_or_else(
                    || outcome.message.unwrap_or_default(),
                    |reply| format!("Agent reply: {reply}"),
                )))
            }
            "create_session" => {
                let args: CreateArgs = parse(name, arguments)?;
                let with_repo = args.repo.is_some() && args.branch.is_some();
                let request = CreateSessionRequest {
                    prompt: args.prompt,
                    title: args.title,
                    repo: if with_repo { args.repo } else { None },
                    branch: if with_repo { args.branch } else { None },
                    require_plan_approval: args.interactive,
                    automation_mode: if args.auto_pr.unwrap_or(true) {
                        AutomationMode::AutoCreatePr
                    } else {
                        AutomationMode::AutomationModeUnspecified
                    },
                };
                let session = self.manager.create_session(&request).await?;
                Ok(CallToolResult::text(format!("Session created. ID: {}", session.id)))
            }
            "list_sessions" => {
                let args: PageArgs = parse(name, arguments)?;
                let page = self
                    .manager
                    .list_sessions(args.page_size(), args.page_token.as_deref())
                    .await?;
                let sessions: Vec<Value> = page.sessions.iter().map(format_session).collect();
                Ok(CallToolResult::json(&json!({
                    "sessions": sessions,
                    "nextPageToken": page.next_page_token,
                })))
            }
            "get_bash_outputs" => {
                let args: BashArgs = parse(name, arguments)?;
                let outputs = self
                    .manager
                    .bash_outputs(&args.session_id, args.activity_ids.as_deref())
                    .await?;
                Ok(CallToolResult::json(&outputs))
            }
            "list_activities" => {
                let args: ListActivitiesArgs = parse(name, arguments)?;
                Ok(envelope(self.list_activities(&args).await, "LIST_ACTIVITIES_ERROR"))
            }
            "get_session_plan" => {
                let args: SessionArgs = parse(name, arguments)?;
                Ok(envelope(self.session_plan(&args.session_id).await, "GET_SESSION_PLAN_ERROR"))
            }
            "get_session_summary" => {
                let args: SessionArgs = parse(name, arguments)?;
                Ok(envelope(
                    self.session_summary(&args.session_id).await,
                    "GET_SESSION_SUMMARY_ERROR",
                ))
            }
            "approve_plan" => {
                let args: SessionArgs = parse(name, arguments)?;
                let id = args.session_id;
                let result = self.manager.approve_plan(&id).await.map(|()| {
                    ToolEnvelope::ok(
                        format!("Plan approved for session {id}. The agent will now execute the plan."),
                        json!({ "sessionId": id, "action": "PLAN_APPROVED" }),
                        steps(&[
                            "Use wait_for_completion to wait for the task to finish",
                            "Use list_activities to monitor progress",
                        ]),
                    )
                });
                Ok(envelope(result, "APPROVE_PLAN_ERROR"))
            }
            "reject_plan" => {
                let args: RejectArgs = parse(name, arguments)?;
                let id = args.session_id;
                let feedback = args.feedback.as_deref();
                let result = self.manager.reject_plan(&id, feedback).await.map(|()| {
                    ToolEnvelope::ok(
                        format!("Plan rejected for session {id}. The agent will generate a new plan."),
                        json!({
                            "sessionId": id,
                            "action": "PLAN_REJECTED",
                            "feedbackProvided": feedback.is_some_and(|f| !f.trim().is_empty()),
                        }),
                        steps(&[
                            "The agent will generate a new plan based on your feedback",
                            "Use wait_for_plan to wait for the replacement plan",
                        ]),
                    )
                });
                Ok(envelope(result, "REJECT_PLAN_ERROR"))
            }
            "cancel_session" => {
                let args: SessionArgs = parse(name, arguments)?;
                let id = args.session_id;
                let result = self.manager.cancel_session(&id).await.map(|()| {
                    ToolEnvelope::ok(
                        format!("Session {id} cancelled."),
                        json!({ "sessionId": id, "action": "CANCELLED" }),
                        steps(&["Use create_session to start a new task"]),
                    )
                });
                Ok(envelope(result, "CANCEL_SESSION_ERROR"))
            }
            "wait_for_plan" => {
                let args: WaitArgs = parse(name, arguments)?;
                let options = WaitOptions {
                    interval: None,
                    ..args.options()
                };
                Ok(envelope(
                    self.wait_for_plan(&args.session_id, options).await,
                    "WAIT_FOR_PLAN_ERROR",
                ))
            }
            "wait_for_completion" => {
                let args: WaitArgs = parse(name, arguments)?;
                Ok(envelope(
                    self.wait_for_completion(&args.session_id, args.options()).await,
                    "WAIT_FOR_COMPLETION_ERROR",
                ))
            }
            "create_and_wait" => {
                let args: CreateAndWaitArgs = parse(name, arguments)?;
                Ok(envelope(
                    self.create_and_wait(args, "CREATE_AND_WAIT_ERROR").await,
                    "CREATE_AND_WAIT_ERROR",
                ))
            }
            "quick_task" => {
                let args: QuickTaskArgs = parse(name, arguments)?;
                Ok(envelope(
                    self.create_and_wait(args.into(), "QUICK_TASK_ERROR").await,
                    "QUICK_TASK_ERROR",
                ))
            }
            "get_session" => {
                let args: SessionArgs = parse(name, arguments)?;
                let id = args.session_id;
                let result = self.manager.get_session(&id).await.map(|session| {
                    ToolEnvelope::ok(
                        format!("Session {id} is {}", session.state),
                        format_session(&session),
                        next_steps(&session),
                    )
                });
                Ok(envelope(result, "GET_SESSION_ERROR"))
            }
            "get_latest_activity" => {
                let args: SessionArgs = parse(name, arguments)?;
                Ok(envelope(
                    self.latest_activity(&args.session_id).await,
                    "GET_LATEST_ACTIVITY_ERROR",
                ))
            }
            "list_sources" => {
                let args: PageArgs = parse(name, arguments)?;
                Ok(envelope(self.list_sources(&args).await, "LIST_SOURCES_ERROR"))
            }
            "get_source" => {
                let args: SourceArgs = parse(name, arguments)?;
                Ok(envelope(self.get_source(&args.source).await, "GET_SOURCE_ERROR"))
            }
            other => Err(DispatchError::UnknownTool(other.to_string())),
        }
    }

    async fn list_activities(&self, args: &ListActivitiesArgs) -> Result<ToolEnvelope, ManagerError> {
        let id = &args.session_id;
        let activities = self.manager.list_activities(id, &args.query).await?;

        let mut counts = std::collections::BTreeMap::<ActivityType, usize>::new();
        for activity in &activities {
            *counts.entry(activity.activity_type()).or_default() += 1;
        }
        let latest = activities.iter().max_by_key(|a| a.create_time);

        let mut hints = Vec::new();
        if counts.contains_key(&ActivityType::PlanGenerated) {
            hints.push("A plan was generated - use get_session_plan to see whether it needs approval");
        }
        if counts.contains_key(&ActivityType::SessionFailed) {
            hints.push("An error occurred - review the error message and consider retrying");
        }

        let views: Vec<Value> = activities.iter().map(format_activity).collect();
        Ok(ToolEnvelope::ok(
            format!("Found {} activities for session {id}", activities.len()),
            json!({
                "activities": views,
                "summary": counts,
                "latestActivityType": latest.map(jules_core::Activity::activity_type),
            }),
            steps(&hints),
        ))
    }

    async fn session_plan(&self, id: &str) -> Result<ToolEnvelope, ManagerError> {
        let plan = self.manager.session_plan(id).await?;
        let Some(activity) = &plan.plan else {
            return Ok(ToolEnvelope::ok(
                format!("No plan found for session {id}"),
                json!({ "sessionId": id, "plan": null }),
                steps(&["The agent may still be analyzing the codebase - try again in a moment"]),
            ));
        };

        let hints = if plan.status == PlanStatus::PendingApproval {
            steps(&[
                "Review the plan carefully",
                "Use approve_plan to approve and start execution",
                "Use reject_plan with feedback to request changes",
            ])
        } else {
            Vec::new()
        };
        let status = serde_json::to_value(plan.status).unwrap_or(Value::Null);
        Ok(ToolEnvelope::ok(
            format!(
                "Found plan for session {id} (status: {})",
                status.as_str().unwrap_or_default()
            ),
            json!({ "sessionId": id, "status": status, "plan": format_activity(activity) }),
            hints,
        ))
    }

    async fn session_summary(&self, id: &str) -> Result<ToolEnvelope, ManagerError> {
        let summary = self.manager.session_summary(id).await?;
        let session = &summary.session;
        Ok(ToolEnvelope::ok(
            format!("Session {id} summary: {}", session.state),
            json!({
                "session": format_session(session),
                "activitySummary": {
                    "total": summary.activity_total,
                    "byType": summary.activity_counts,
                },
                "plan": summary.plan.as_ref().map(format_activity),
                "planStatus": summary.plan_status,
                "latestProgress": summary.latest_progress.as_ref().map(format_activity),
                "error": summary.error.as_ref().map(format_activity),
                "latestActivity": summary.latest_activity.as_ref().map(format_activity),
            }),
            next_steps(session),
        ))
    }

    async fn wait_for_plan(&self, id: &str, options: WaitOptions) -> Result<ToolEnvelope, ManagerError> {
        let result = self.manager.wait_for_plan(id, options).await?;
        if let Some(error) = &result.error {
            return Ok(ToolEnvelope::failure(error.clone(), "WAIT_FOR_PLAN_ERROR"));
        }
        match &result.value {
            Some(plan) if result.success => Ok(ToolEnvelope::ok(
                format!("Plan generated for session {id}"),
                json!({
                    "sessionId": id,
                    "plan": format_activity(plan),
                    "pollStats": poll_stats(&result),
                }),
                steps(&[
                    "Review the plan carefully",
                    "Use approve_plan to approve",
                    "Use reject_plan with feedback to request changes",
                ]),
            )),
            _ => Ok(ToolEnvelope::ok(
                format!("Timed out waiting for plan (session: {id})"),
                json!({
                    "sessionId": id,
                    "reason": result.reason,
                    "pollStats": poll_stats(&result),
                }),
                steps(&[
                    "The agent may still be analyzing the codebase",
                    "Use list_activities to check current status",
                ]),
            )),
        }
    }

    async fn wait_for_completion(
        &self,
        id: &str,
        options: WaitOptions,
    ) -> Result<ToolEnvelope, ManagerError> {
        let result = self.manager.wait_for_completion(id, options).await?;
        let Some(session) = result.value.as_ref().filter(|_| result.reason != PollReason::Error) else {
            return Ok(ToolEnvelope::failure(
                result
                    .error
                    .clone()
                    .unwrap_or_else(|| "Failed to fetch session state".to_string()),
                "WAIT_FOR_COMPLETION_ERROR",
            ));
        };

        if result.success {
            return Ok(ToolEnvelope::ok(
                format!("Session {id} completed with state: {}", session.state),
                json!({ "session": format_session(session), "pollStats": poll_stats(&result) }),
                next_steps(session),
            ));
        }
        Ok(ToolEnvelope::ok(
            format!(
                "Timed out waiting for session {id} (current state: {})",
                session.state
            ),
            json!({
                "session": format_session(session),
                "reason": result.reason,
                "pollStats": poll_stats(&result),
            }),
            steps(&[STILL_RUNNING]),
        ))
    }

    async fn create_and_wait(
        &self,
        args: CreateAndWaitArgs,
        code: &str,
    ) -> Result<ToolEnvelope, ManagerError> {
        if args.repo.trim().is_empty() {
            return Err(ManagerError::MissingArgument("repo"));
        }
        let request = CreateSessionRequest {
            prompt: args.prompt,
            title: args.title,
            repo: Some(args.repo),
            branch: Some(args.branch.unwrap_or_else(|| "main".to_string())),
            require_plan_approval: args.require_plan_approval,
            automation_mode: args.automation_mode,
        };
        let options = WaitOptions {
            interval: None,
            max_duration: args.timeout_ms.map(Duration::from_millis),
        };

        let outcome = self
            .manager
            .create_and_wait(&request, args.wait_for_completion, options)
            .await?;
        let session = &outcome.session;
        let id = &session.id;

        let Some(poll) = &outcome.poll else {
            return Ok(ToolEnvelope::ok(
                format!("Session created: {id}. Not waiting for completion."),
                json!({ "session": format_session(session), "waited": false }),
                next_steps(session),
            ));
        };

        if let (PollReason::Error, Some(error)) = (poll.reason, &poll.error) {
            return Ok(ToolEnvelope::failure(error.clone(), code));
        }
        if poll.success {
            return Ok(ToolEnvelope::ok(
                format!("Session {id} completed with state: {}", session.state),
                json!({
                    "session": format_session(session),
                    "waited": true,
                    "pollStats": poll_stats(poll),
                }),
                next_steps(session),
            ));
        }
        Ok(ToolEnvelope::ok(
            format!(
                "Session {id} created but timed out waiting (current state: {})",
                session.state
            ),
            json!({
                "session": format_session(session),
                "waited": true,
                "timedOut": true,
                "reason": poll.reason,
                "pollStats": poll_stats(poll),
            }),
            steps(&[STILL_RUNNING]),
        ))
    }

    async fn latest_activity(&self, id: &str) -> Result<ToolEnvelope, ManagerError> {
        let Some(activity) = self.manager.latest_activity(id).await? else {
            return Ok(ToolEnvelope::ok(
                format!("No activities yet for session {id}"),
                json!({ "sessionId": id, "latestActivity": null }),
                steps(&["The agent may still be initializing - try again in a moment"]),
            ));
        };
        let view = format_activity(&activity);
        Ok(ToolEnvelope::ok(
            format!(
                "Latest activity: {}",
                view["type"].as_str().unwrap_or_default()
            ),
            json!({ "sessionId": id, "latestActivity": view }),
            Vec::new(),
        ))
    }

    async fn list_sources(&self, args: &PageArgs) -> Result<ToolEnvelope, ManagerError> {
        let page = self
            .manager
            .list_sources(args.page_size(), args.page_token.as_deref())
            .await?;
        let sources: Vec<Value> = page.sources.iter().map(format_source).collect();
        Ok(ToolEnvelope::ok(
            format!("Found {} connected repositories", sources.len()),
            json!({
                "sources": sources,
                "hasMore": page.next_page_token.is_some(),
                "nextPageToken": page.next_page_token,
            }),
            steps(&[
                "Use the repository's fullName as repo when creating sessions",
                "If a repository is missing, connect it at https://jules.google.com",
            ]),
        ))
    }

    async fn get_source(&self, input: &str) -> Result<ToolEnvelope, ManagerError> {
        let repo = normalize_github_repo(input.trim());
        match self.manager.get_source(input).await {
            Ok(source) => Ok(ToolEnvelope::ok(
                format!("Repository {repo} is connected"),
                format_source(&source),
                steps(&["Use create_session to start a task on this repository"]),
            )),
            Err(ManagerError::Source(SourceError::NotFound(_))) => Ok(ToolEnvelope::failure(
                format!("Repository {repo} is not connected"),
                "GET_SOURCE_ERROR",
            )),
            Err(e) => Err(e),
        }
    }
}

fn parse<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, DispatchError> {
    let arguments = if arguments.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|source| DispatchError::InvalidArguments {
        tool: tool.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use jules_core::{Activity, ActivityKind, ClientConfig, Plan, PlanStep, Session, Source};
    use jules_session::MemorySource;

    use super::*;

    fn registry() -> ToolRegistry<MemorySource> {
        ToolRegistry::new(SessionManager::new(MemorySource::new(), ClientConfig::default()))
    }

    fn source(registry: &ToolRegistry<MemorySource>) -> &MemorySource {
        registry.manager().source()
    }

    fn plan_activity(secs: i64) -> Activity {
        Activity::new(
            "plan-1",
            Utc.timestamp_opt(secs, 0).unwrap(),
            ActivityKind::PlanGenerated {
                plan: Plan {
                    id: "p1".to_string(),
                    steps: vec![PlanStep::titled("Write code"), PlanStep::titled("Test it")],
                },
            },
        )
    }

    fn envelope_of(result: &CallToolResult) -> Value {
        serde_json::from_str(&result.joined_text()).unwrap()
    }

    #[test]
    fn test_tool_names_are_unique() {
        let tools = descriptors();
        assert_eq!(tools.len(), 21);
        let mut names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 21);
        assert!(tools.iter().all(|t| t.input_schema["type"] == "object"));
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_args() {
        let registry = registry();
        let result = registry.call("nope", json!({})).await;
        assert!(matches!(result, Err(DispatchError::UnknownTool(name)) if name == "nope"));

        let result = registry
            .call("send_reply_to_session", json!({"sessionId": "s1", "action": "shout"}))
            .await;
        assert!(matches!(result, Err(DispatchError::InvalidArguments { .. })));
    }

    #[tokio::test]
    async fn test_missing_session_id() {
        let result = registry().call("get_session_state", Value::Null).await;
        assert!(matches!(
            result,
            Err(DispatchError::Manager(ManagerError::MissingArgument("sessionId")))
        ));
    }

    #[tokio::test]
    async fn test_review_and_diff_text() {
        let registry = registry();
        source(&registry).insert_session(Session::new("s1", "completed"));

        let review = registry
            .call("get_code_review_context", json!({"sessionId": "s1"}))
            .await
            .unwrap();
        assert_eq!(review.joined_text(), "0 files changed (+0/-0)");

        let diff = registry
            .call("show_code_diff", json!({"sessionId": "s1", "activityId": "a9"}))
            .await
            .unwrap();
        assert_eq!(diff.joined_text(), "No changes found in activity a9.");
    }

    #[tokio::test]
    async fn test_send_and_approve() {
        let registry = registry();
        source(&registry).insert_session(Session::new("s1", "awaitingPlanApproval"));
        source(&registry).push_activity("s1", plan_activity(1));

        let sent = registry
            .call(
                "send_reply_to_session",
                json!({"sessionId": "s1", "action": "send", "message": "Use tabs"}),
            )
            .await
            .unwrap();
        assert_eq!(sent.joined_text(), "Message sent.");

        let plan = registry
            .call("get_session_plan", json!({"sessionId": "s1"}))
            .await
            .unwrap();
        let plan = envelope_of(&plan);
        assert_eq!(plan["data"]["status"], "pending_approval");
        assert_eq!(plan["data"]["plan"]["plan"]["totalSteps"], 2);

        let approved = registry
            .call("send_reply_to_session", json!({"sessionId": "s1", "action": "approve"}))
            .await
            .unwrap();
        assert_eq!(approved.joined_text(), "Plan approved.");

        let plan = registry
            .call("get_session_plan", json!({"sessionId": "s1"}))
            .await
            .unwrap();
        assert_eq!(envelope_of(&plan)["data"]["status"], "approved");
        assert!(envelope_of(&plan).get("suggestedNextSteps").is_none());
    }

    #[tokio::test]
    async fn test_envelope_failure_is_error() {
        let result = registry()
            .call("get_session_summary", json!({"sessionId": "ghost"}))
            .await
            .unwrap();
        assert!(result.is_error);
        let envelope = envelope_of(&result);
        assert_eq!(envelope["success"], false);
        assert_eq!(envelope["error"]["code"], "GET_SESSION_SUMMARY_ERROR");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_completion_timeout_is_success() {
        let registry = registry();
        source(&registry).insert_session(Session::new("s1", "inProgress"));

        let result = registry
            .call(
                "wait_for_completion",
                json!({"sessionId": "s1", "timeoutMs": 2000, "pollIntervalMs": 1000}),
            )
            .await
            .unwrap();
        assert!(!result.is_error);
        let envelope = envelope_of(&result);
        assert_eq!(envelope["success"], true);
        assert_eq!(envelope["data"]["reason"], "timeout");
        assert_eq!(envelope["data"]["pollStats"]["attempts"], 2);
        assert_eq!(envelope["suggestedNextSteps"][0], STILL_RUNNING);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_and_wait_without_waiting() {
        let registry = registry();
        let result = registry
            .call(
                "create_and_wait",
                json!({"prompt": "Bump deps", "repo": "octo/repo", "waitForCompletion": false}),
            )
            .await
            .unwrap();
        let envelope = envelope_of(&result);
        assert_eq!(envelope["data"]["waited"], false);
        assert_eq!(envelope["data"]["session"]["branch"], "main");
        assert_eq!(envelope["data"]["session"]["source"], "sources/github/octo/repo");

        let missing = registry
            .call("create_and_wait", json!({"prompt": "Bump deps"}))
            .await
            .unwrap();
        assert!(missing.is_error);
    }

    #[tokio::test]
    async fn test_list_activities_envelope() {
        let registry = registry();
        source(&registry).insert_session(Session::new("s1", "awaitingPlanApproval"));
        source(&registry).push_activity("s1", plan_activity(1));

        let result = registry
            .call("list_activities", json!({"sessionId": "s1", "order": "desc"}))
            .await
            .unwrap();
        let envelope = envelope_of(&result);
        assert_eq!(envelope["message"], "Found 1 activities for session s1");
        assert_eq!(envelope["data"]["summary"]["planGenerated"], 1);
        assert_eq!(envelope["data"]["latestActivityType"], "planGenerated");
    }

    #[tokio::test]
    async fn test_latest_activity_envelope() {
        let registry = registry();
        source(&registry).insert_session(Session::new("s1", "planning"));

        let empty = registry
            .call("get_latest_activity", json!({"sessionId": "s1"}))
            .await
            .unwrap();
        let envelope = envelope_of(&empty);
        assert_eq!(envelope["message"], "No activities yet for session s1");
        assert_eq!(envelope["data"]["latestActivity"], Value::Null);

        source(&registry).push_activity("s1", plan_activity(1));
        let latest = registry
            .call("get_latest_activity", json!({"sessionId": "s1"}))
            .await
            .unwrap();
        let envelope = envelope_of(&latest);
        assert_eq!(envelope["message"], "Latest activity: planGenerated");
        assert_eq!(envelope["data"]["latestActivity"]["id"], "plan-1");
    }

    #[tokio::test]
    async fn test_get_session_envelope() {
        let registry = registry();
        source(&registry).insert_session(Session::new("s1", "awaitingPlanApproval"));

        let result = registry
            .call("get_session", json!({"sessionId": "s1"}))
            .await
            .unwrap();
        let envelope = envelope_of(&result);
        assert_eq!(envelope["message"], "Session s1 is awaitingPlanApproval");
        assert_eq!(envelope["data"]["id"], "s1");

        let missing = registry
            .call("get_session", json!({"sessionId": "ghost"}))
            .await
            .unwrap();
        assert!(missing.is_error);
        assert_eq!(envelope_of(&missing)["error"]["code"], "GET_SESSION_ERROR");
    }

    #[tokio::test]
    async fn test_sources_tools() {
        let registry = registry();
        source(&registry).insert_source(Source::github("octo", "repo"));
        source(&registry).insert_source(Source::github("octo", "site"));

        let listed = registry
            .call("list_sources", json!({"pageSize": 1}))
            .await
            .unwrap();
        let envelope = envelope_of(&listed);
        assert_eq!(envelope["message"], "Found 1 connected repositories");
        assert_eq!(envelope["data"]["sources"][0]["fullName"], "octo/repo");
        assert_eq!(envelope["data"]["hasMore"], true);

        let found = registry
            .call("get_source", json!({"source": "sources/github/octo/site"}))
            .await
            .unwrap();
        assert_eq!(envelope_of(&found)["message"], "Repository octo/site is connected");

        let missing = registry
            .call("get_source", json!({"source": "octo/gone"}))
            .await
            .unwrap();
        assert!(missing.is_error);
        let envelope = envelope_of(&missing);
        assert_eq!(envelope["message"], "Repository octo/gone is not connected");
        assert_eq!(envelope["error"]["code"], "GET_SOURCE_ERROR");
    }

    #[tokio::test(start_paused = true)]
    async fn test_quick_task_waits_for_completion() {
        let registry = registry();
        let result = registry
            .call("quick_task", json!({"prompt": "Bump deps", "repo": "octo/repo"}))
            .await
            .unwrap();
        let envelope = envelope_of(&result);
        assert_eq!(envelope["data"]["waited"], true);
        assert_eq!(envelope["data"]["timedOut"], true);
        assert_eq!(envelope["data"]["session"]["branch"], "main");

        let missing = registry
            .call("quick_task", json!({"prompt": "Bump deps"}))
            .await
            .unwrap();
        assert!(missing.is_error);
        assert_eq!(envelope_of(&missing)["error"]["code"], "QUICK_TASK_ERROR");
    }
}
