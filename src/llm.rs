use std::time::Duration;

use serde_json::{json, Value};

use crate::{
    backoff_delay, parse_retry_after, AgentMessage, AgentToolCall, Config, ModelRequest,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 2048;

/// Seam over the chat model. The router and the reasoning loop both go
/// through this, so tests can script model behavior turn by turn.
pub(crate) trait ModelHook: Send + Sync {
    fn complete(&self, request: &ModelRequest) -> Result<AgentMessage, String>;
}

pub(crate) struct AnthropicModel {
    agent: ureq::Agent,
    url: String,
    model: String,
    api_key: String,
    retry_max: usize,
    retry_base_s: f64,
    retry_max_s: f64,
}

impl AnthropicModel {
    /// None when no model is configured; callers degrade without one.
    pub(crate) fn from_config(config: &Config) -> Option<AnthropicModel> {
        if config.model_name.trim().is_empty() {
            return None;
        }
        let api_key = config.model_api_key.clone()?;
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.http_timeout_s.max(60)))
            .build();
        Some(AnthropicModel {
            agent,
            url: config.model_url.clone(),
            model: config.model_name.clone(),
            api_key,
            retry_max: config.retry_max,
            retry_base_s: config.retry_base_s,
            retry_max_s: config.retry_max_s,
        })
    }
}

/// Split our flat message list into the wire shape: system text goes in
/// the top-level system field, assistant tool calls become tool_use
/// blocks, and tool results become tool_result blocks on a user message.
fn to_wire(request: &ModelRequest) -> (Option<String>, Vec<Value>) {
    let mut system_parts = Vec::new();
    let mut messages: Vec<Value> = Vec::new();
    for msg in &request.messages {
        match msg.role.as_str() {
            "system" => {
                if let Some(content) = &msg.content {
                    system_parts.push(content.clone());
                }
            }
            "assistant" if !msg.tool_calls.is_empty() => {
                let mut blocks = Vec::new();
                if let Some(content) = &msg.content {
                    if !content.is_empty() {
                        blocks.push(json!({ "type": "text", "text": content }));
                    }
                }
                for call in &msg.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.args,
                    }));
                }
                messages.push(json!({ "role": "assistant", "content": blocks }));
            }
            "tool" => {
                messages.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                        "content": msg.content.clone().unwrap_or_default(),
                        "is_error": msg.is_error.unwrap_or(false),
                    }],
                }));
            }
            role => {
                messages.push(json!({
                    "role": role,
                    "content": msg.content.clone().unwrap_or_default(),
                }));
            }
        }
    }
    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, messages)
}

fn parse_response(value: &Value) -> Result<AgentMessage, String> {
    let content = value
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or("model response missing content")?;
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    for block in content {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                    text_parts.push(text.to_string());
                }
            }
            Some("tool_use") => {
                tool_calls.push(AgentToolCall {
                    id: block
                        .get("id")
                        .and_then(|i| i.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    name: block
                        .get("name")
                        .and_then(|n| n.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    args: block.get("input").cloned().unwrap_or(Value::Null),
                });
            }
            _ => {}
        }
    }
    Ok(AgentMessage {
        role: "assistant".to_string(),
        content: if text_parts.is_empty() {
            None
        } else {
            Some(text_parts.join("\n"))
        },
        tool_calls,
        name: None,
        tool_call_id: None,
        is_error: None,
    })
}

impl ModelHook for AnthropicModel {
    fn complete(&self, request: &ModelRequest) -> Result<AgentMessage, String> {
        let (system, messages) = to_wire(request);
        let mut body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": messages,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
        }

        let mut attempt = 0;
        loop {
            let result = self
                .agent
                .post(&self.url)
                .set("x-api-key", &self.api_key)
                .set("anthropic-version", ANTHROPIC_VERSION)
                .set("Content-Type", "application/json")
                .send_json(body.clone());
            let retry_after = match result {
                Ok(resp) => {
                    let value: Value = resp
                        .into_json()
                        .map_err(|e| format!("model response body: {e}"))?;
                    return parse_response(&value);
                }
                Err(ureq::Error::Status(code, resp)) if code == 429 || code >= 500 => {
                    parse_retry_after(&resp)
                }
                Err(ureq::Error::Status(code, resp)) => {
                    let detail = resp
                        .into_string()
                        .unwrap_or_default()
                        .chars()
                        .take(300)
                        .collect::<String>();
                    return Err(format!("model returned {code}: {detail}"));
                }
                Err(ureq::Error::Transport(_)) => None,
            };
            if attempt >= self.retry_max {
                return Err("model unavailable after retries".to_string());
            }
            attempt += 1;
            let delay = retry_after
                .unwrap_or_else(|| backoff_delay(attempt, self.retry_base_s, self.retry_max_s));
            std::thread::sleep(Duration::from_secs_f64(delay));
        }
    }
}
