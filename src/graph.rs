use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::{
    classify, classify_heuristic, run_agent, run_fast_path, ChatRequest, ChatResponse, Config,
    CredentialRelay, MemoryStore, ModelHook, RequestContext, RetryPolicy, RoutePath,
    SimilarityIndex, TaskApi, ToolRuntime,
};

const CRASH_REPLY: &str =
    "Something went wrong handling that message. Nothing else was affected; please try again.";
const NO_MODEL_REPLY: &str =
    "No language model is configured, so I can only answer simple questions \
     about your existing tasks.";

/// One assembled pipeline: router in front, the deterministic path and
/// the tool-using loop behind it, conversation memory on the side.
pub(crate) struct Harness {
    pub(crate) tasks: Arc<dyn TaskApi>,
    pub(crate) index: Arc<SimilarityIndex>,
    pub(crate) memory: Arc<MemoryStore>,
    pub(crate) model: Option<Arc<dyn ModelHook>>,
    pub(crate) relay: Arc<CredentialRelay>,
    pub(crate) config: Config,
}

impl Harness {
    /// Handle one chat message end to end. The credential lives in the
    /// relay only while this call runs; both the user turn and the reply
    /// turn are persisted no matter how the pipeline exits.
    pub(crate) fn handle_chat(&self, req: &ChatRequest, credential: String) -> ChatResponse {
        let ctx = RequestContext::new(
            &self.relay,
            &req.user_id,
            credential,
            Some(Duration::from_millis(self.config.agent_timeout_ms)),
        );

        let history = self
            .memory
            .recent_turns(&req.user_id, &req.session_id, 20)
            .unwrap_or_else(|e| {
                eprintln!("[graph] history unavailable, continuing without: {e}");
                Vec::new()
            });

        // Guarded separately so a panic while classifying still reaches
        // the persistence stage below
        let decision = std::panic::catch_unwind(AssertUnwindSafe(|| {
            classify(
                self.model.as_deref(),
                self.config.router_confidence,
                &req.message,
                &history,
            )
        }))
        .unwrap_or_else(|_| {
            eprintln!("[graph] classifier panicked, using heuristic");
            classify_heuristic(&req.message)
        });
        eprintln!(
            "[graph] req={} route={} source={} user={}",
            ctx.request_id(),
            decision.path.as_str(),
            decision.source,
            req.user_id
        );

        let response = std::panic::catch_unwind(AssertUnwindSafe(|| match decision.path {
            RoutePath::FastPath => {
                match run_fast_path(
                    self.tasks.as_ref(),
                    &ctx,
                    &req.message,
                    Utc::now().date_naive(),
                ) {
                    Ok(answer) => answer,
                    Err(e) => {
                        eprintln!("[graph] fast path failed: {e}");
                        e.user_message()
                    }
                }
            }
            RoutePath::AgentPath => match &self.model {
                Some(model) => {
                    let hits = self
                        .index
                        .query_text(&ctx, self.tasks.as_ref(), &req.message, self.config.context_k)
                        .unwrap_or_else(|e| {
                            eprintln!("[graph] context lookup failed, continuing without: {e}");
                            Vec::new()
                        });
                    if let Some(top) = hits.first() {
                        eprintln!("[graph] {} context hit(s), best {:.2}", hits.len(), top.score);
                    }
                    let rt = ToolRuntime {
                        tasks: self.tasks.as_ref(),
                        index: self.index.as_ref(),
                        retry: RetryPolicy {
                            max: self.config.retry_max,
                            base_s: self.config.retry_base_s,
                            max_s: self.config.retry_max_s,
                        },
                    };
                    run_agent(
                        model.as_ref(),
                        &rt,
                        &ctx,
                        &history,
                        &hits,
                        &req.message,
                        self.config.max_steps,
                    )
                }
                None => NO_MODEL_REPLY.to_string(),
            },
        }))
        .unwrap_or_else(|_| {
            eprintln!("[graph] pipeline panicked for user {}", req.user_id);
            CRASH_REPLY.to_string()
        });

        // Persist both sides of the exchange, including degraded replies
        if let Err(e) = self
            .memory
            .append(&req.user_id, &req.session_id, "user", &req.message)
        {
            eprintln!("[graph] failed to persist user turn: {e}");
        }
        if let Err(e) = self
            .memory
            .append(&req.user_id, &req.session_id, "assistant", &response)
        {
            eprintln!("[graph] failed to persist reply turn: {e}");
        }

        drop(ctx); // releases the credential before the response leaves

        ChatResponse {
            response,
            path: decision.path.as_str().to_string(),
        }
    }
}
