use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};

use crate::{
    backoff_delay, is_known_tool, is_mutating, normalize_title, parse_args, parse_due_date,
    ClientError, CreateTaskArgs, DeleteTaskArgs, GetTaskArgs, GetTasksArgs, RequestContext,
    RetryPolicy, SimilarityIndex, TaskApi, TaskFields, TaskFilter, TaskRecord, TaskStatus,
    ToolExecution, UpdateTaskArgs,
};

pub(crate) struct ToolRuntime<'a> {
    pub(crate) tasks: &'a dyn TaskApi,
    pub(crate) index: &'a SimilarityIndex,
    pub(crate) retry: RetryPolicy,
}

/// Bounded retry for transient store failures. Everything else passes
/// straight through; the deadline cuts retries short.
fn with_retry<T>(
    rt: &ToolRuntime<'_>,
    ctx: &RequestContext,
    mut op: impl FnMut() -> Result<T, ClientError>,
) -> Result<T, ClientError> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(ClientError::Unavailable(msg)) => {
                if attempt >= rt.retry.max || ctx.deadline_exceeded() {
                    return Err(ClientError::Unavailable(msg));
                }
                attempt += 1;
                let delay = backoff_delay(attempt, rt.retry.base_s, rt.retry.max_s);
                std::thread::sleep(std::time::Duration::from_secs_f64(delay));
            }
            other => return other,
        }
    }
}

/// Dispatch one tool call. Failures come back as data with `is_error`
/// set so the reasoning loop can correct itself; nothing here panics on
/// model-supplied input.
pub(crate) fn execute_tool(
    rt: &ToolRuntime<'_>,
    ctx: &RequestContext,
    name: &str,
    args: &Value,
) -> ToolExecution {
    if !is_known_tool(name) {
        return ToolExecution::validation(format!("unknown tool '{name}'"));
    }
    let result = match name {
        "create_task" => create_task(rt, ctx, args),
        "get_tasks" => get_tasks(rt, ctx, args),
        "get_task_by_id" => get_task_by_id(rt, ctx, args),
        "update_task" => update_task(rt, ctx, args),
        "delete_task" => delete_task(rt, ctx, args),
        _ => unreachable!(),
    };
    let execution = match result {
        Ok(execution) => execution,
        Err(e) => client_failure(&e),
    };
    if is_mutating(name) && !execution.is_error {
        rt.index.invalidate(ctx.user_id());
    }
    execution
}

fn client_failure(e: &ClientError) -> ToolExecution {
    let kind = match e {
        ClientError::NotFound => "not_found",
        ClientError::Unauthorized => "unauthorized",
        ClientError::Validation(_) => "validation",
        ClientError::Unavailable(_) => "unavailable",
    };
    ToolExecution {
        output: e.user_message(),
        details: json!({ "error": kind }),
        is_error: true,
    }
}

/// Identity of a task for duplicate detection: owner, canonical title,
/// due date.
pub(crate) fn create_key(owner: &str, title: &str, due: Option<NaiveDate>) -> String {
    let due = due.map(|d| d.to_string()).unwrap_or_default();
    let material = format!("{owner}\u{1f}{}\u{1f}{due}", normalize_title(title));
    blake3::hash(material.as_bytes()).to_hex().to_string()
}

fn resolve_due(raw: &str) -> Result<NaiveDate, ToolExecution> {
    parse_due_date(raw, Utc::now().date_naive()).ok_or_else(|| {
        ToolExecution::validation(format!(
            "could not parse due date '{raw}'; use YYYY-MM-DD, 'today', 'tomorrow', or a weekday name"
        ))
    })
}

fn resolve_status(raw: &str) -> Result<TaskStatus, ToolExecution> {
    TaskStatus::parse(raw).ok_or_else(|| {
        ToolExecution::validation(format!(
            "unknown status '{raw}'; use open, in_progress, or done"
        ))
    })
}

fn render_task(record: &TaskRecord) -> String {
    let due = record
        .due
        .map(|d| format!(" (due {d})"))
        .unwrap_or_default();
    format!("{} [{}] {}{due}", record.id, record.status, record.title)
}

fn task_details(record: &TaskRecord) -> Value {
    serde_json::to_value(record).unwrap_or(Value::Null)
}

fn create_task(
    rt: &ToolRuntime<'_>,
    ctx: &RequestContext,
    args: &Value,
) -> Result<ToolExecution, ClientError> {
    let args: CreateTaskArgs = match parse_args("create_task", args) {
        Ok(args) => args,
        Err(e) => return Ok(ToolExecution::validation(e)),
    };
    let title = args.title.trim().to_string();
    if title.is_empty() {
        return Ok(ToolExecution::validation("title must not be empty"));
    }
    let due = match args.due.as_deref().filter(|d| !d.trim().is_empty()) {
        Some(raw) => match resolve_due(raw) {
            Ok(d) => Some(d),
            Err(v) => return Ok(v),
        },
        None => None,
    };
    let status = match args.status.as_deref() {
        Some(raw) => match resolve_status(raw) {
            Ok(s) => Some(s),
            Err(v) => return Ok(v),
        },
        None => None,
    };

    // Duplicate check before the write: a retried or re-phrased create of
    // the same task returns the existing record instead of a second copy.
    let key = create_key(ctx.user_id(), &title, due);
    let existing = with_retry(rt, ctx, || rt.tasks.list(ctx, &TaskFilter::default()))?;
    if let Some(found) = existing
        .iter()
        .find(|r| create_key(&r.owner, &r.title, r.due) == key)
    {
        return Ok(ToolExecution::ok(
            format!("Task already exists: {}", render_task(found)),
            json!({ "task": task_details(found), "deduplicated": true }),
        ));
    }

    let fields = TaskFields {
        title: Some(title),
        status,
        due,
        body: args.body,
    };
    let record = with_retry(rt, ctx, || rt.tasks.create(ctx, &fields))?;
    Ok(ToolExecution::ok(
        format!("Created {}", render_task(&record)),
        json!({ "task": task_details(&record), "deduplicated": false }),
    ))
}

fn get_tasks(
    rt: &ToolRuntime<'_>,
    ctx: &RequestContext,
    args: &Value,
) -> Result<ToolExecution, ClientError> {
    let args: GetTasksArgs = match parse_args("get_tasks", args) {
        Ok(args) => args,
        Err(e) => return Ok(ToolExecution::validation(e)),
    };
    let mut filter = TaskFilter::default();
    if let Some(raw) = args.status.as_deref() {
        filter.status = match resolve_status(raw) {
            Ok(s) => Some(s),
            Err(v) => return Ok(v),
        };
    }
    if let Some(raw) = args.due_before.as_deref() {
        filter.due_before = match resolve_due(raw) {
            Ok(d) => Some(d),
            Err(v) => return Ok(v),
        };
    }
    let records = with_retry(rt, ctx, || rt.tasks.list(ctx, &filter))?;
    let lines: Vec<String> = records.iter().map(render_task).collect();
    let output = if lines.is_empty() {
        "No tasks found.".to_string()
    } else {
        format!("{} task(s):\n{}", lines.len(), lines.join("\n"))
    };
    Ok(ToolExecution::ok(
        output,
        json!({ "count": records.len(), "tasks": records }),
    ))
}

fn get_task_by_id(
    rt: &ToolRuntime<'_>,
    ctx: &RequestContext,
    args: &Value,
) -> Result<ToolExecution, ClientError> {
    let args: GetTaskArgs = match parse_args("get_task_by_id", args) {
        Ok(args) => args,
        Err(e) => return Ok(ToolExecution::validation(e)),
    };
    let record = with_retry(rt, ctx, || rt.tasks.get(ctx, &args.id))?;
    Ok(ToolExecution::ok(
        render_task(&record),
        json!({ "task": task_details(&record) }),
    ))
}

fn update_task(
    rt: &ToolRuntime<'_>,
    ctx: &RequestContext,
    args: &Value,
) -> Result<ToolExecution, ClientError> {
    let args: UpdateTaskArgs = match parse_args("update_task", args) {
        Ok(args) => args,
        Err(e) => return Ok(ToolExecution::validation(e)),
    };
    let mut fields = TaskFields::default();
    if let Some(title) = args.title {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Ok(ToolExecution::validation("title must not be empty"));
        }
        fields.title = Some(title);
    }
    if let Some(raw) = args.due.as_deref().filter(|d| !d.trim().is_empty()) {
        fields.due = match resolve_due(raw) {
            Ok(d) => Some(d),
            Err(v) => return Ok(v),
        };
    }
    if let Some(raw) = args.status.as_deref() {
        fields.status = match resolve_status(raw) {
            Ok(s) => Some(s),
            Err(v) => return Ok(v),
        };
    }
    fields.body = args.body;
    if fields.title.is_none() && fields.due.is_none() && fields.status.is_none()
        && fields.body.is_none()
    {
        return Ok(ToolExecution::validation(
            "update_task needs at least one field to change",
        ));
    }
    let record = with_retry(rt, ctx, || rt.tasks.update(ctx, &args.id, &fields))?;
    Ok(ToolExecution::ok(
        format!("Updated {}", render_task(&record)),
        json!({ "task": task_details(&record) }),
    ))
}

fn delete_task(
    rt: &ToolRuntime<'_>,
    ctx: &RequestContext,
    args: &Value,
) -> Result<ToolExecution, ClientError> {
    let args: DeleteTaskArgs = match parse_args("delete_task", args) {
        Ok(args) => args,
        Err(e) => return Ok(ToolExecution::validation(e)),
    };
    match with_retry(rt, ctx, || rt.tasks.delete(ctx, &args.id)) {
        Ok(()) => Ok(ToolExecution::ok(
            format!("Deleted task {}", args.id),
            json!({ "deleted": args.id }),
        )),
        // Deleting something already gone is success, not failure
        Err(ClientError::NotFound) => Ok(ToolExecution::ok(
            format!("Task {} was already gone", args.id),
            json!({ "deleted": args.id, "already_absent": true }),
        )),
        Err(e) => Err(e),
    }
}
