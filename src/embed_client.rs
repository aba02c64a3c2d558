use std::time::Duration;

use serde_json::json;

use crate::{backoff_delay, Config};

/// Text-to-vector seam. The index never cares where vectors come from.
pub(crate) trait Embedder: Send + Sync {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String>;
}

/// Client for an OpenAI-compatible /embeddings endpoint.
pub(crate) struct HttpEmbedder {
    agent: ureq::Agent,
    url: String,
    model: String,
    retry_max: usize,
    retry_base_s: f64,
    retry_max_s: f64,
}

impl HttpEmbedder {
    pub(crate) fn new(config: &Config) -> HttpEmbedder {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.http_timeout_s))
            .build();
        HttpEmbedder {
            agent,
            url: config.embed_url.clone(),
            model: config.embed_model.clone(),
            retry_max: config.retry_max,
            retry_base_s: config.retry_base_s,
            retry_max_s: config.retry_max_s,
        }
    }
}

impl Embedder for HttpEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({ "model": self.model, "input": texts });
        let mut attempt = 0;
        let value: serde_json::Value = loop {
            let result = self
                .agent
                .post(&self.url)
                .set("Content-Type", "application/json")
                .send_json(body.clone());
            match result {
                Ok(resp) => {
                    break resp
                        .into_json()
                        .map_err(|e| format!("embed response body: {e}"))?
                }
                Err(ureq::Error::Status(code, _)) if !(code == 429 || code >= 500) => {
                    return Err(format!("embed endpoint returned {code}"));
                }
                Err(e) => {
                    if attempt >= self.retry_max {
                        return Err(format!("embed request failed: {e}"));
                    }
                    attempt += 1;
                    let delay = backoff_delay(attempt, self.retry_base_s, self.retry_max_s);
                    std::thread::sleep(Duration::from_secs_f64(delay));
                }
            }
        };
        parse_embeddings(&value, texts.len())
    }
}

/// {"data": [{"index": i, "embedding": [...]}, ...]} — order by index, since
/// providers are allowed to return entries out of order.
fn parse_embeddings(value: &serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>, String> {
    let data = value
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or("embed response missing data array")?;
    if data.len() != expected {
        return Err(format!(
            "embed response has {} entries, expected {expected}",
            data.len()
        ));
    }
    let mut out = vec![Vec::new(); expected];
    for (pos, entry) in data.iter().enumerate() {
        let index = entry
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        if index >= expected {
            return Err(format!("embed entry index {index} out of range"));
        }
        let vector = entry
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or("embed entry missing embedding")?
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32).ok_or("non-numeric embedding"))
            .collect::<Result<Vec<f32>, _>>()?;
        out[index] = vector;
    }
    Ok(out)
}
