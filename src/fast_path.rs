use chrono::{Duration, NaiveDate};

use crate::{ClientError, RequestContext, TaskApi, TaskFilter, TaskRecord, TaskStatus};

/// The read-only question shapes the deterministic path can answer
/// without a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueryShape {
    Count,
    Overdue,
    DueWithin(i64),
    ByStatus(TaskStatus),
    List,
}

pub(crate) fn detect_shape(message: &str) -> QueryShape {
    let lower = message.to_lowercase();
    if lower.contains("how many") || lower.contains("count") {
        return QueryShape::Count;
    }
    if lower.contains("overdue") || lower.contains("late") {
        return QueryShape::Overdue;
    }
    if lower.contains("due today") {
        return QueryShape::DueWithin(0);
    }
    if lower.contains("due tomorrow") {
        return QueryShape::DueWithin(1);
    }
    if lower.contains("due this week") || lower.contains("due soon") || lower.contains("due ") {
        return QueryShape::DueWithin(7);
    }
    if lower.contains("in progress") || lower.contains("working on") {
        return QueryShape::ByStatus(TaskStatus::InProgress);
    }
    if lower.contains("done") || lower.contains("finished") || lower.contains("completed") {
        return QueryShape::ByStatus(TaskStatus::Done);
    }
    if lower.contains("open") || lower.contains("todo") || lower.contains("to do") {
        return QueryShape::ByStatus(TaskStatus::Open);
    }
    QueryShape::List
}

/// Answer a read-shaped question with exactly one list call. This path
/// never calls a model and never mutates backend state.
pub(crate) fn run_fast_path(
    tasks: &dyn TaskApi,
    ctx: &RequestContext,
    message: &str,
    today: NaiveDate,
) -> Result<String, ClientError> {
    let shape = detect_shape(message);
    let records = tasks.list(ctx, &TaskFilter::default())?;
    Ok(answer(shape, &records, today))
}

fn answer(shape: QueryShape, records: &[TaskRecord], today: NaiveDate) -> String {
    match shape {
        QueryShape::Count => {
            let open = records.iter().filter(|r| r.status == TaskStatus::Open).count();
            let doing = records
                .iter()
                .filter(|r| r.status == TaskStatus::InProgress)
                .count();
            let done = records.iter().filter(|r| r.status == TaskStatus::Done).count();
            format!(
                "You have {} task(s): {open} open, {doing} in progress, {done} done.",
                records.len()
            )
        }
        QueryShape::Overdue => {
            let overdue: Vec<&TaskRecord> = records
                .iter()
                .filter(|r| r.status != TaskStatus::Done)
                .filter(|r| r.due.map(|d| d < today).unwrap_or(false))
                .collect();
            if overdue.is_empty() {
                "Nothing is overdue.".to_string()
            } else {
                format!("{} overdue task(s):\n{}", overdue.len(), lines(&overdue))
            }
        }
        QueryShape::DueWithin(days) => {
            let horizon = today + Duration::days(days);
            let due: Vec<&TaskRecord> = records
                .iter()
                .filter(|r| r.status != TaskStatus::Done)
                .filter(|r| r.due.map(|d| d <= horizon).unwrap_or(false))
                .collect();
            let window = match days {
                0 => "today".to_string(),
                1 => "by tomorrow".to_string(),
                d => format!("in the next {d} days"),
            };
            if due.is_empty() {
                format!("Nothing is due {window}.")
            } else {
                format!("{} task(s) due {window}:\n{}", due.len(), lines(&due))
            }
        }
        QueryShape::ByStatus(status) => {
            let matched: Vec<&TaskRecord> =
                records.iter().filter(|r| r.status == status).collect();
            if matched.is_empty() {
                format!("No {status} tasks.")
            } else {
                format!("{} {status} task(s):\n{}", matched.len(), lines(&matched))
            }
        }
        QueryShape::List => {
            if records.is_empty() {
                "You have no tasks.".to_string()
            } else {
                let all: Vec<&TaskRecord> = records.iter().collect();
                format!("Your {} task(s):\n{}", all.len(), lines(&all))
            }
        }
    }
}

fn lines(records: &[&TaskRecord]) -> String {
    records
        .iter()
        .map(|r| {
            let due = r.due.map(|d| format!(", due {d}")).unwrap_or_default();
            format!("- {} [{}{}]", r.title, r.status, due)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
