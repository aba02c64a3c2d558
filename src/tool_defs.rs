use serde_json::{json, Value};

/// Tool names the reasoning loop may dispatch. Anything else coming back
/// from the model is rejected as a validation error.
pub(crate) const TOOL_NAMES: &[&str] = &[
    "create_task",
    "get_tasks",
    "get_task_by_id",
    "update_task",
    "delete_task",
];

/// Tools that change backend state. The index is invalidated after any of
/// these succeeds, and the fast path is forbidden from reaching them.
pub(crate) fn is_mutating(tool: &str) -> bool {
    matches!(tool, "create_task" | "update_task" | "delete_task")
}

pub(crate) fn is_known_tool(tool: &str) -> bool {
    TOOL_NAMES.contains(&tool)
}

/// Schema catalog sent to the model with every agent request.
pub(crate) fn tool_catalog() -> Vec<Value> {
    vec![
        json!({
            "name": "create_task",
            "description": "Create a new task for the current user. Idempotent: re-creating an identical task returns the existing one.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Short task title" },
                    "due": { "type": "string", "description": "Due date: YYYY-MM-DD, 'today', 'tomorrow', or a weekday name" },
                    "status": { "type": "string", "enum": ["open", "in_progress", "done"] },
                    "body": { "type": "string", "description": "Longer free-form details" }
                },
                "required": ["title"]
            }
        }),
        json!({
            "name": "get_tasks",
            "description": "List the current user's tasks, optionally filtered.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "status": { "type": "string", "enum": ["open", "in_progress", "done"] },
                    "due_before": { "type": "string", "description": "Only tasks due strictly before this date" }
                }
            }
        }),
        json!({
            "name": "get_task_by_id",
            "description": "Fetch one task by id.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string" }
                },
                "required": ["id"]
            }
        }),
        json!({
            "name": "update_task",
            "description": "Update fields on an existing task. Unset fields are left unchanged.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "title": { "type": "string" },
                    "due": { "type": "string" },
                    "status": { "type": "string", "enum": ["open", "in_progress", "done"] },
                    "body": { "type": "string" }
                },
                "required": ["id"]
            }
        }),
        json!({
            "name": "delete_task",
            "description": "Delete a task by id. Deleting an already-deleted task succeeds.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string" }
                },
                "required": ["id"]
            }
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_covers_every_tool_name() {
        let catalog = tool_catalog();
        assert_eq!(catalog.len(), TOOL_NAMES.len());
        for def in &catalog {
            let name = def.get("name").and_then(|n| n.as_str()).unwrap();
            assert!(is_known_tool(name), "unlisted tool {name}");
            assert!(def.get("input_schema").is_some());
        }
    }

    #[test]
    fn test_mutating_split() {
        assert!(is_mutating("create_task"));
        assert!(is_mutating("update_task"));
        assert!(is_mutating("delete_task"));
        assert!(!is_mutating("get_tasks"));
        assert!(!is_mutating("get_task_by_id"));
        assert!(!is_known_tool("drop_database"));
    }
}
