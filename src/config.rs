use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{env_f64, env_optional, env_u64, env_usize};

pub(crate) const DEFAULT_DB_PATH: &str = "taskpilot.sqlite";
pub(crate) const DEFAULT_BIND: &str = "127.0.0.1";
pub(crate) const DEFAULT_PORT: u16 = 8737;

/// Resolved runtime configuration. Precedence: env var over config file
/// over default.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    /// Base URL of the backing task CRUD API, e.g. http://localhost:9000/tasks
    pub(crate) tasks_url: String,
    /// Embedding endpoint (OpenAI-compatible /embeddings shape).
    pub(crate) embed_url: String,
    pub(crate) embed_model: String,
    /// Chat-model endpoint; empty disables the model router and agent path
    /// degrades to an explanatory message.
    pub(crate) model_url: String,
    pub(crate) model_name: String,
    pub(crate) model_api_key: Option<String>,
    /// Router falls back to the heuristic below this model confidence.
    pub(crate) router_confidence: f64,
    /// Top-k retrieved similarity entries injected into the agent context.
    pub(crate) context_k: usize,
    pub(crate) max_steps: usize,
    pub(crate) agent_timeout_ms: u64,
    pub(crate) retry_max: usize,
    pub(crate) retry_base_s: f64,
    pub(crate) retry_max_s: f64,
    pub(crate) http_timeout_s: u64,
    pub(crate) db_path: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            tasks_url: "http://127.0.0.1:9000/tasks".to_string(),
            embed_url: "http://127.0.0.1:9001/embeddings".to_string(),
            embed_model: "text-embedding-3-small".to_string(),
            model_url: "https://api.anthropic.com/v1/messages".to_string(),
            model_name: String::new(),
            model_api_key: None,
            router_confidence: 0.6,
            context_k: 5,
            max_steps: 8,
            agent_timeout_ms: 60_000,
            retry_max: 2,
            retry_base_s: 0.5,
            retry_max_s: 4.0,
            http_timeout_s: 30,
            db_path: DEFAULT_DB_PATH.to_string(),
        }
    }
}

/// On-disk shape (TASKPILOT_CONFIG, JSON). Every field optional; unknown
/// fields ignored so old configs keep working.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct FileConfig {
    #[serde(default)]
    pub(crate) tasks_url: Option<String>,
    #[serde(default)]
    pub(crate) embed_url: Option<String>,
    #[serde(default)]
    pub(crate) embed_model: Option<String>,
    #[serde(default)]
    pub(crate) model_url: Option<String>,
    #[serde(default)]
    pub(crate) model_name: Option<String>,
    #[serde(default)]
    pub(crate) router_confidence: Option<f64>,
    #[serde(default)]
    pub(crate) context_k: Option<usize>,
    #[serde(default)]
    pub(crate) max_steps: Option<usize>,
    #[serde(default)]
    pub(crate) agent_timeout_ms: Option<u64>,
    #[serde(default)]
    pub(crate) db_path: Option<String>,
}

pub(crate) fn load_file_config(path: &Path) -> FileConfig {
    match std::fs::read_to_string(path) {
        Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
            eprintln!("[config] ignoring malformed {}: {e}", path.display());
            FileConfig::default()
        }),
        Err(_) => FileConfig::default(),
    }
}

pub(crate) fn load_config() -> Config {
    let mut cfg = Config::default();

    if let Some(path) = env_optional("TASKPILOT_CONFIG") {
        let file = load_file_config(Path::new(&path));
        if let Some(v) = file.tasks_url {
            cfg.tasks_url = v;
        }
        if let Some(v) = file.embed_url {
            cfg.embed_url = v;
        }
        if let Some(v) = file.embed_model {
            cfg.embed_model = v;
        }
        if let Some(v) = file.model_url {
            cfg.model_url = v;
        }
        if let Some(v) = file.model_name {
            cfg.model_name = v;
        }
        if let Some(v) = file.router_confidence {
            cfg.router_confidence = v;
        }
        if let Some(v) = file.context_k {
            cfg.context_k = v;
        }
        if let Some(v) = file.max_steps {
            cfg.max_steps = v;
        }
        if let Some(v) = file.agent_timeout_ms {
            cfg.agent_timeout_ms = v;
        }
        if let Some(v) = file.db_path {
            cfg.db_path = v;
        }
    }

    if let Some(v) = env_optional("TASKPILOT_TASKS_URL") {
        cfg.tasks_url = v;
    }
    if let Some(v) = env_optional("TASKPILOT_EMBED_URL") {
        cfg.embed_url = v;
    }
    if let Some(v) = env_optional("TASKPILOT_EMBED_MODEL") {
        cfg.embed_model = v;
    }
    if let Some(v) = env_optional("TASKPILOT_MODEL_URL") {
        cfg.model_url = v;
    }
    if let Some(v) = env_optional("TASKPILOT_MODEL") {
        cfg.model_name = v;
    }
    cfg.model_api_key = env_optional("TASKPILOT_API_KEY");
    cfg.router_confidence = env_f64("TASKPILOT_ROUTER_CONFIDENCE", cfg.router_confidence);
    cfg.context_k = env_usize("TASKPILOT_CONTEXT_K", cfg.context_k);
    cfg.max_steps = env_usize("TASKPILOT_MAX_STEPS", cfg.max_steps);
    cfg.agent_timeout_ms = env_u64("TASKPILOT_AGENT_TIMEOUT_MS", cfg.agent_timeout_ms);
    cfg.retry_max = env_usize("TASKPILOT_MAX_RETRIES", cfg.retry_max);
    cfg.retry_base_s = env_f64("TASKPILOT_RETRY_BASE", cfg.retry_base_s);
    cfg.retry_max_s = env_f64("TASKPILOT_RETRY_MAX", cfg.retry_max_s);
    cfg.http_timeout_s = env_u64("TASKPILOT_HTTP_TIMEOUT", cfg.http_timeout_s);
    if let Some(v) = env_optional("TASKPILOT_DB") {
        cfg.db_path = v;
    }

    cfg
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_config_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("taskpilot_test");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(format!("cfg_{}_{name}.json", std::process::id()))
    }

    #[test]
    fn test_file_config_partial() {
        let path = temp_config_path("partial");
        std::fs::write(&path, r#"{"tasks_url":"http://tasks.local","max_steps":3}"#).unwrap();
        let file = load_file_config(&path);
        assert_eq!(file.tasks_url.as_deref(), Some("http://tasks.local"));
        assert_eq!(file.max_steps, Some(3));
        assert!(file.embed_url.is_none());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_file_config_malformed_falls_back() {
        let path = temp_config_path("malformed");
        std::fs::write(&path, "{not json").unwrap();
        let file = load_file_config(&path);
        assert!(file.tasks_url.is_none());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file_is_default() {
        let file = load_file_config(Path::new("/nonexistent/taskpilot.json"));
        assert!(file.db_path.is_none());
    }
}
