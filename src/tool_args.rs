use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub(crate) struct CreateTaskArgs {
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) due: Option<String>,
    #[serde(default)]
    pub(crate) status: Option<String>,
    #[serde(default)]
    pub(crate) body: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct GetTasksArgs {
    #[serde(default)]
    pub(crate) status: Option<String>,
    #[serde(default)]
    pub(crate) due_before: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GetTaskArgs {
    pub(crate) id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateTaskArgs {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) title: Option<String>,
    #[serde(default)]
    pub(crate) due: Option<String>,
    #[serde(default)]
    pub(crate) status: Option<String>,
    #[serde(default)]
    pub(crate) body: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeleteTaskArgs {
    pub(crate) id: String,
}

/// Credentials come only from the request context. A model echoing one
/// into tool arguments gets it silently dropped.
fn is_credential_field(key: &str) -> bool {
    matches!(
        key.to_ascii_lowercase().as_str(),
        "credential" | "token" | "auth" | "authorization" | "api_key" | "apikey" | "bearer"
    )
}

/// Map the field names models actually emit onto the canonical ones.
fn canonical_field(key: &str) -> &str {
    match key {
        "due_date" | "due-date" | "dueDate" | "deadline" | "due_by" | "by" => "due",
        "name" | "task" | "summary" | "subject" => "title",
        "state" => "status",
        "description" | "notes" | "details" => "body",
        "task_id" | "taskId" | "id_" => "id",
        "before" | "dueBefore" => "due_before",
        other => other,
    }
}

/// Rewrite raw model arguments into the canonical shape before strict
/// deserialization. Handles the common malformations: synonym field
/// names, a bare string where an object belongs, ids sent as numbers,
/// and arguments nested one level under "arguments"/"input".
pub(crate) fn canonicalize_args(tool: &str, raw: &Value) -> Value {
    match raw {
        Value::String(s) => bare_string_args(tool, s),
        Value::Object(map) => {
            // Unwrap one level of accidental nesting
            if map.len() == 1 {
                if let Some(inner) = map.get("arguments").or_else(|| map.get("input")) {
                    if inner.is_object() || inner.is_string() {
                        return canonicalize_args(tool, inner);
                    }
                }
            }
            let mut out = serde_json::Map::new();
            for (key, value) in map {
                if is_credential_field(key) {
                    continue;
                }
                let key = canonical_field(key).to_string();
                let value = match (key.as_str(), value) {
                    // ids arrive as numbers often enough to matter
                    ("id", Value::Number(n)) => Value::String(n.to_string()),
                    (_, Value::Null) => continue,
                    (_, v) => v.clone(),
                };
                // first canonical spelling wins
                out.entry(key).or_insert(value);
            }
            Value::Object(out)
        }
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other.clone(),
    }
}

/// A bare string means the one obvious argument for the tool. For
/// create_task a trailing "due <when>" or "by <when>" splits off into
/// the due field.
fn bare_string_args(tool: &str, s: &str) -> Value {
    let s = s.trim();
    match tool {
        "create_task" => {
            let lower = s.to_lowercase();
            for marker in [" due ", " by "] {
                if let Some(pos) = lower.rfind(marker) {
                    let title = s[..pos].trim();
                    let due = s[pos + marker.len()..].trim();
                    if !title.is_empty() && !due.is_empty() {
                        return serde_json::json!({ "title": title, "due": due });
                    }
                }
            }
            serde_json::json!({ "title": s })
        }
        "get_task_by_id" | "delete_task" | "update_task" => serde_json::json!({ "id": s }),
        _ => serde_json::json!({ "query": s }),
    }
}

pub(crate) fn parse_args<T: DeserializeOwned>(tool: &str, raw: &Value) -> Result<T, String> {
    let canonical = canonicalize_args(tool, raw);
    serde_json::from_value(canonical).map_err(|e| format!("bad arguments for {tool}: {e}"))
}
