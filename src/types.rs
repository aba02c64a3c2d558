use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ── Task records (owned by the backing store) ────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum TaskStatus {
    Open,
    InProgress,
    Done,
}

impl TaskStatus {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }

    /// Accepts the synonyms models and users actually produce.
    pub(crate) fn parse(value: &str) -> Option<TaskStatus> {
        let v = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match v.as_str() {
            "open" | "todo" | "pending" | "new" => Some(TaskStatus::Open),
            "in_progress" | "doing" | "started" | "active" => Some(TaskStatus::InProgress),
            "done" | "complete" | "completed" | "closed" | "finished" => Some(TaskStatus::Done),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TaskRecord {
    pub(crate) id: String,
    pub(crate) owner: String,
    pub(crate) title: String,
    pub(crate) status: TaskStatus,
    #[serde(default)]
    pub(crate) due: Option<NaiveDate>,
    #[serde(default)]
    pub(crate) body: String,
    #[serde(default)]
    pub(crate) updated_at: i64,
}

impl TaskRecord {
    /// Free text used for embedding: title plus body.
    pub(crate) fn embed_text(&self) -> String {
        if self.body.trim().is_empty() {
            self.title.clone()
        } else {
            format!("{}\n{}", self.title, self.body)
        }
    }
}

/// Create/update payload; unset fields are left untouched by the backend.
#[derive(Debug, Clone, Default, Serialize)]
pub(crate) struct TaskFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) due: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) body: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct TaskFilter {
    pub(crate) status: Option<TaskStatus>,
    pub(crate) due_before: Option<NaiveDate>,
}

// ── Conversation memory ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ConversationTurn {
    pub(crate) user_id: String,
    pub(crate) session_id: String,
    pub(crate) seq: i64,
    pub(crate) role: String,
    pub(crate) content: String,
    pub(crate) ts_utc: i64,
}

// ── Routing ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RoutePath {
    FastPath,
    AgentPath,
}

impl RoutePath {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            RoutePath::FastPath => "fast",
            RoutePath::AgentPath => "agent",
        }
    }
}

// ── Chat endpoint wire types ─────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChatRequest {
    pub(crate) user_id: String,
    pub(crate) session_id: String,
    pub(crate) message: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChatResponse {
    pub(crate) response: String,
    pub(crate) path: String,
}

// ── Model conversation shapes ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AgentMessage {
    pub(crate) role: String,
    pub(crate) content: Option<String>,
    #[serde(default)]
    pub(crate) tool_calls: Vec<AgentToolCall>,
    #[serde(default)]
    pub(crate) name: Option<String>,
    #[serde(default)]
    pub(crate) tool_call_id: Option<String>,
    #[serde(default)]
    pub(crate) is_error: Option<bool>,
}

impl AgentMessage {
    pub(crate) fn text(role: &str, content: impl Into<String>) -> AgentMessage {
        AgentMessage {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            name: None,
            tool_call_id: None,
            is_error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AgentToolCall {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) args: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ModelRequest {
    pub(crate) messages: Vec<AgentMessage>,
    pub(crate) tools: Vec<serde_json::Value>,
}

/// Result of one tool dispatch. Errors are data, not panics: the reasoning
/// loop reads `is_error` and may retry with corrected arguments.
#[derive(Debug, Clone)]
pub(crate) struct ToolExecution {
    pub(crate) output: String,
    pub(crate) details: serde_json::Value,
    pub(crate) is_error: bool,
}

impl ToolExecution {
    pub(crate) fn ok(output: impl Into<String>, details: serde_json::Value) -> ToolExecution {
        ToolExecution {
            output: output.into(),
            details,
            is_error: false,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> ToolExecution {
        let message = message.into();
        ToolExecution {
            output: format!("Validation: {message}"),
            details: serde_json::json!({ "error": "validation", "message": message }),
            is_error: true,
        }
    }
}

// ── Error taxonomy ───────────────────────────────────────────────────────

/// Typed failures from the backing CRUD store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ClientError {
    NotFound,
    Unauthorized,
    Validation(String),
    Unavailable(String),
}

impl ClientError {
    /// User-facing phrasing; never leaks backend internals or credentials.
    pub(crate) fn user_message(&self) -> String {
        match self {
            ClientError::NotFound => "I couldn't find that task.".to_string(),
            ClientError::Unauthorized => {
                "Your credentials were rejected by the task store.".to_string()
            }
            ClientError::Validation(msg) => format!("The task store rejected the request: {msg}"),
            ClientError::Unavailable(_) => {
                "The task store is unavailable right now; please try again shortly.".to_string()
            }
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::NotFound => write!(f, "not found"),
            ClientError::Unauthorized => write!(f, "unauthorized"),
            ClientError::Validation(msg) => write!(f, "validation: {msg}"),
            ClientError::Unavailable(msg) => write!(f, "unavailable: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IndexError {
    /// No successful build exists for the user and none could be completed.
    NotReady,
    Build(String),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::NotReady => write!(f, "similarity index not ready"),
            IndexError::Build(msg) => write!(f, "index build failed: {msg}"),
        }
    }
}

impl std::error::Error for IndexError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MemoryError {
    Unavailable(String),
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::Unavailable(msg) => write!(f, "memory unavailable: {msg}"),
        }
    }
}

impl std::error::Error for MemoryError {}

/// Programmer error: the credential relay was consulted outside a held
/// request scope. Never surfaced to end users as a normal failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RelayError {
    NotHeld,
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::NotHeld => {
                write!(f, "configuration error: no credential held for this request")
            }
        }
    }
}

impl std::error::Error for RelayError {}
