use chrono::Utc;

use crate::{
    execute_tool, tool_catalog, AgentMessage, AgentToolCall, ConversationTurn, IndexHit,
    ModelHook, ModelRequest, RequestContext, ToolRuntime,
};

const STEP_LIMIT_REPLY: &str =
    "I had to stop before finishing; the request took too many steps. \
     Anything done so far has been saved.";
const TIMEOUT_REPLY: &str =
    "I ran out of time on that request. Anything done so far has been saved.";
const MODEL_DOWN_REPLY: &str =
    "I can't reach the language model right now, so I couldn't finish that. \
     Please try again shortly.";

enum AgentState {
    Thinking,
    AwaitingTools(Vec<AgentToolCall>),
    Finished(String),
}

fn system_prompt(user_id: &str, context_hits: &[IndexHit]) -> String {
    let mut prompt = format!(
        "You are a task assistant for user {user_id}. Today is {}. \
         Use the tools to read and change tasks; never invent task ids. \
         Keep replies short and concrete.",
        Utc::now().date_naive()
    );
    if !context_hits.is_empty() {
        prompt.push_str("\n\nPossibly relevant existing tasks:");
        for hit in context_hits {
            prompt.push_str(&format!("\n- {} (id {})", hit.title, hit.task_id));
        }
    }
    prompt
}

/// Run the tool-using loop for one message. Bounded two ways: a step
/// budget and the request deadline. Every exit produces a user-facing
/// reply; partial work is not rolled back, which is safe because the
/// mutating tools are idempotent.
pub(crate) fn run_agent(
    model: &dyn ModelHook,
    rt: &ToolRuntime<'_>,
    ctx: &RequestContext,
    history: &[ConversationTurn],
    context_hits: &[IndexHit],
    message: &str,
    max_steps: usize,
) -> String {
    let mut messages = vec![AgentMessage::text(
        "system",
        system_prompt(ctx.user_id(), context_hits),
    )];
    for turn in history {
        messages.push(AgentMessage::text(&turn.role, turn.content.clone()));
    }
    messages.push(AgentMessage::text("user", message));

    let tools = tool_catalog();
    let mut state = AgentState::Thinking;
    let mut last_text: Option<String> = None;
    for _ in 0..max_steps {
        state = match state {
            AgentState::Thinking => {
                if ctx.deadline_exceeded() {
                    return TIMEOUT_REPLY.to_string();
                }
                let request = ModelRequest {
                    messages: messages.clone(),
                    tools: tools.clone(),
                };
                let reply = match model.complete(&request) {
                    Ok(reply) => reply,
                    Err(e) => {
                        eprintln!("[agent] model call failed: {e}");
                        return MODEL_DOWN_REPLY.to_string();
                    }
                };
                let calls = reply.tool_calls.clone();
                let text = reply.content.clone();
                messages.push(reply);
                if let Some(text) = &text {
                    if !text.trim().is_empty() {
                        last_text = Some(text.clone());
                    }
                }
                if calls.is_empty() {
                    AgentState::Finished(
                        text.unwrap_or_else(|| "Done.".to_string()),
                    )
                } else {
                    AgentState::AwaitingTools(calls)
                }
            }
            AgentState::AwaitingTools(calls) => {
                for call in &calls {
                    if ctx.deadline_exceeded() {
                        return TIMEOUT_REPLY.to_string();
                    }
                    let execution = execute_tool(rt, ctx, &call.name, &call.args);
                    messages.push(AgentMessage {
                        role: "tool".to_string(),
                        content: Some(execution.output),
                        tool_calls: Vec::new(),
                        name: Some(call.name.clone()),
                        tool_call_id: Some(call.id.clone()),
                        is_error: Some(execution.is_error),
                    });
                }
                AgentState::Thinking
            }
            AgentState::Finished(reply) => return reply,
        };
    }
    if let AgentState::Finished(reply) = state {
        return reply;
    }
    // Best effort: hand back whatever the model said last
    match last_text {
        Some(text) => format!("{text}\n\n{STEP_LIMIT_REPLY}"),
        None => STEP_LIMIT_REPLY.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ClientError, CredentialRelay, Embedder, RetryPolicy, SimilarityIndex, TaskApi, TaskFields,
        TaskFilter, TaskRecord, TaskStatus,
    };
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct NullEmbedder;
    impl Embedder for NullEmbedder {
        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    /// Plays back a fixed sequence of model turns.
    struct ScriptedModel {
        turns: Mutex<VecDeque<AgentMessage>>,
    }

    impl ScriptedModel {
        fn new(turns: Vec<AgentMessage>) -> ScriptedModel {
            ScriptedModel {
                turns: Mutex::new(turns.into()),
            }
        }
    }

    impl ModelHook for ScriptedModel {
        fn complete(&self, _: &ModelRequest) -> Result<AgentMessage, String> {
            self.turns
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| "script exhausted".to_string())
        }
    }

    fn tool_call(name: &str, args: serde_json::Value) -> AgentMessage {
        AgentMessage {
            role: "assistant".to_string(),
            content: None,
            tool_calls: vec![AgentToolCall {
                id: "c1".to_string(),
                name: name.to_string(),
                args,
            }],
            name: None,
            tool_call_id: None,
            is_error: None,
        }
    }

    struct MiniStore {
        records: Mutex<Vec<TaskRecord>>,
        next_id: AtomicUsize,
    }

    impl MiniStore {
        fn new() -> MiniStore {
            MiniStore {
                records: Mutex::new(Vec::new()),
                next_id: AtomicUsize::new(1),
            }
        }
    }

    impl TaskApi for MiniStore {
        fn create(
            &self,
            ctx: &RequestContext,
            fields: &TaskFields,
        ) -> Result<TaskRecord, ClientError> {
            let record = TaskRecord {
                id: format!("t{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
                owner: ctx.user_id().to_string(),
                title: fields.title.clone().unwrap_or_default(),
                status: fields.status.unwrap_or(TaskStatus::Open),
                due: fields.due,
                body: fields.body.clone().unwrap_or_default(),
                updated_at: 1,
            };
            self.records.lock().unwrap().push(record.clone());
            Ok(record)
        }
        fn get(&self, _: &RequestContext, _: &str) -> Result<TaskRecord, ClientError> {
            Err(ClientError::NotFound)
        }
        fn list(
            &self,
            ctx: &RequestContext,
            _: &TaskFilter,
        ) -> Result<Vec<TaskRecord>, ClientError> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.owner == ctx.user_id())
                .cloned()
                .collect())
        }
        fn update(
            &self,
            _: &RequestContext,
            _: &str,
            _: &TaskFields,
        ) -> Result<TaskRecord, ClientError> {
            Err(ClientError::NotFound)
        }
        fn delete(&self, _: &RequestContext, _: &str) -> Result<(), ClientError> {
            Err(ClientError::NotFound)
        }
    }

    fn ctx(relay: &Arc<CredentialRelay>, timeout: Option<Duration>) -> RequestContext {
        RequestContext::new(relay, "u1", "tok".to_string(), timeout)
    }

    #[test]
    fn test_direct_answer_without_tools() {
        let store = MiniStore::new();
        let index = SimilarityIndex::new(Arc::new(NullEmbedder));
        let rt = ToolRuntime {
            tasks: &store,
            index: &index,
            retry: RetryPolicy::none(),
        };
        let relay = CredentialRelay::new();
        let ctx = ctx(&relay, None);
        let model = ScriptedModel::new(vec![AgentMessage::text("assistant", "Hello!")]);

        let reply = run_agent(&model, &rt, &ctx, &[], &[], "hi", 8);
        assert_eq!(reply, "Hello!");
    }

    #[test]
    fn test_tool_call_then_answer() {
        let store = MiniStore::new();
        let index = SimilarityIndex::new(Arc::new(NullEmbedder));
        let rt = ToolRuntime {
            tasks: &store,
            index: &index,
            retry: RetryPolicy::none(),
        };
        let relay = CredentialRelay::new();
        let ctx = ctx(&relay, None);
        let model = ScriptedModel::new(vec![
            tool_call("create_task", json!({ "title": "buy milk", "due": "2025-07-01" })),
            AgentMessage::text("assistant", "Created your task."),
        ]);

        let reply = run_agent(&model, &rt, &ctx, &[], &[], "add buy milk", 8);
        assert_eq!(reply, "Created your task.");
        let records = store.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "buy milk");
    }

    #[test]
    fn test_step_limit_stops_runaway_loop() {
        let store = MiniStore::new();
        let index = SimilarityIndex::new(Arc::new(NullEmbedder));
        let rt = ToolRuntime {
            tasks: &store,
            index: &index,
            retry: RetryPolicy::none(),
        };
        let relay = CredentialRelay::new();
        let ctx = ctx(&relay, None);
        // Enough scripted turns to keep looping past any reasonable budget
        let turns: Vec<AgentMessage> = (0..20)
            .map(|_| tool_call("get_tasks", json!({})))
            .collect();
        let model = ScriptedModel::new(turns);

        let reply = run_agent(&model, &rt, &ctx, &[], &[], "loop forever", 4);
        assert_eq!(reply, STEP_LIMIT_REPLY);
    }

    #[test]
    fn test_expired_deadline_short_circuits() {
        let store = MiniStore::new();
        let index = SimilarityIndex::new(Arc::new(NullEmbedder));
        let rt = ToolRuntime {
            tasks: &store,
            index: &index,
            retry: RetryPolicy::none(),
        };
        let relay = CredentialRelay::new();
        let ctx = ctx(&relay, Some(Duration::from_millis(0)));
        let model = ScriptedModel::new(vec![AgentMessage::text("assistant", "too late")]);

        let reply = run_agent(&model, &rt, &ctx, &[], &[], "hi", 8);
        assert_eq!(reply, TIMEOUT_REPLY);
    }

    #[test]
    fn test_model_failure_degrades() {
        let store = MiniStore::new();
        let index = SimilarityIndex::new(Arc::new(NullEmbedder));
        let rt = ToolRuntime {
            tasks: &store,
            index: &index,
            retry: RetryPolicy::none(),
        };
        let relay = CredentialRelay::new();
        let ctx = ctx(&relay, None);
        let model = ScriptedModel::new(Vec::new()); // every call errors

        let reply = run_agent(&model, &rt, &ctx, &[], &[], "hi", 8);
        assert_eq!(reply, MODEL_DOWN_REPLY);
    }

    #[test]
    fn test_bad_tool_call_is_fed_back_not_fatal() {
        let store = MiniStore::new();
        let index = SimilarityIndex::new(Arc::new(NullEmbedder));
        let rt = ToolRuntime {
            tasks: &store,
            index: &index,
            retry: RetryPolicy::none(),
        };
        let relay = CredentialRelay::new();
        let ctx = ctx(&relay, None);
        let model = ScriptedModel::new(vec![
            tool_call("summon_demon", json!({})),
            AgentMessage::text("assistant", "Sorry, I can't do that."),
        ]);

        let reply = run_agent(&model, &rt, &ctx, &[], &[], "do a thing", 8);
        assert_eq!(reply, "Sorry, I can't do that.");
    }

    #[test]
    fn test_context_hits_reach_the_system_prompt() {
        let hits = vec![IndexHit {
            task_id: "t9".to_string(),
            title: "renew passport".to_string(),
            score: 0.9,
        }];
        let prompt = system_prompt("u1", &hits);
        assert!(prompt.contains("renew passport"));
        assert!(prompt.contains("t9"));
    }
}
