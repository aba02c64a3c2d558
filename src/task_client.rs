use std::time::Duration;

use crate::{
    ClientError, Config, RequestContext, TaskFields, TaskFilter, TaskRecord,
};

/// Seam over the backing task CRUD store. Everything above this trait is
/// testable without a live backend.
pub(crate) trait TaskApi: Send + Sync {
    fn create(&self, ctx: &RequestContext, fields: &TaskFields) -> Result<TaskRecord, ClientError>;
    fn get(&self, ctx: &RequestContext, id: &str) -> Result<TaskRecord, ClientError>;
    fn list(&self, ctx: &RequestContext, filter: &TaskFilter)
        -> Result<Vec<TaskRecord>, ClientError>;
    fn update(
        &self,
        ctx: &RequestContext,
        id: &str,
        fields: &TaskFields,
    ) -> Result<TaskRecord, ClientError>;
    fn delete(&self, ctx: &RequestContext, id: &str) -> Result<(), ClientError>;
}

/// Single-attempt HTTP wrapper. Transient failures surface as
/// `Unavailable`; retry is the caller's policy, not this layer's.
pub(crate) struct HttpTaskClient {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpTaskClient {
    pub(crate) fn new(config: &Config) -> HttpTaskClient {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.http_timeout_s))
            .build();
        HttpTaskClient {
            agent,
            base_url: config.tasks_url.trim_end_matches('/').to_string(),
        }
    }

    fn send(
        &self,
        ctx: &RequestContext,
        method: &str,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, ClientError> {
        if ctx.deadline_exceeded() {
            return Err(ClientError::Unavailable("request deadline exceeded".into()));
        }
        let credential = ctx
            .credential()
            .map_err(|e| ClientError::Unavailable(e.to_string()))?;
        let req = self
            .agent
            .request(method, url)
            .set("Authorization", &format!("Bearer {credential}"))
            .set("Accept", "application/json");
        let result = match body {
            Some(json) => req.send_json(json.clone()),
            None => req.call(),
        };
        match result {
            Ok(resp) => {
                if resp.status() == 204 {
                    return Ok(serde_json::Value::Null);
                }
                resp.into_json()
                    .map_err(|e| ClientError::Unavailable(format!("bad response body: {e}")))
            }
            Err(ureq::Error::Status(code, resp)) => match code {
                404 => Err(ClientError::NotFound),
                401 | 403 => Err(ClientError::Unauthorized),
                400 | 422 => {
                    let detail = resp
                        .into_string()
                        .unwrap_or_default()
                        .chars()
                        .take(300)
                        .collect::<String>();
                    Err(ClientError::Validation(detail))
                }
                _ => Err(ClientError::Unavailable(format!("http status {code}"))),
            },
            Err(ureq::Error::Transport(t)) => {
                Err(ClientError::Unavailable(format!("transport: {t}")))
            }
        }
    }

    fn list_url(&self, filter: &TaskFilter) -> String {
        let mut url = self.base_url.clone();
        let mut params = Vec::new();
        if let Some(status) = filter.status {
            params.push(format!("status={}", status.as_str()));
        }
        if let Some(due_before) = filter.due_before {
            params.push(format!("due_before={}", due_before.format("%Y-%m-%d")));
        }
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }
        url
    }
}

fn parse_record(value: serde_json::Value) -> Result<TaskRecord, ClientError> {
    serde_json::from_value(value)
        .map_err(|e| ClientError::Unavailable(format!("malformed task record: {e}")))
}

impl TaskApi for HttpTaskClient {
    fn create(&self, ctx: &RequestContext, fields: &TaskFields) -> Result<TaskRecord, ClientError> {
        let body = serde_json::to_value(fields)
            .map_err(|e| ClientError::Validation(format!("unencodable fields: {e}")))?;
        let value = self.send(ctx, "POST", &self.base_url, Some(&body))?;
        parse_record(value)
    }

    fn get(&self, ctx: &RequestContext, id: &str) -> Result<TaskRecord, ClientError> {
        let url = format!("{}/{id}", self.base_url);
        parse_record(self.send(ctx, "GET", &url, None)?)
    }

    fn list(
        &self,
        ctx: &RequestContext,
        filter: &TaskFilter,
    ) -> Result<Vec<TaskRecord>, ClientError> {
        let value = self.send(ctx, "GET", &self.list_url(filter), None)?;
        // Accept both a bare array and {"tasks": [...]}
        let items = match value {
            serde_json::Value::Array(items) => items,
            serde_json::Value::Object(mut map) => match map.remove("tasks") {
                Some(serde_json::Value::Array(items)) => items,
                _ => return Err(ClientError::Unavailable("malformed list response".into())),
            },
            _ => return Err(ClientError::Unavailable("malformed list response".into())),
        };
        items.into_iter().map(parse_record).collect()
    }

    fn update(
        &self,
        ctx: &RequestContext,
        id: &str,
        fields: &TaskFields,
    ) -> Result<TaskRecord, ClientError> {
        let body = serde_json::to_value(fields)
            .map_err(|e| ClientError::Validation(format!("unencodable fields: {e}")))?;
        let url = format!("{}/{id}", self.base_url);
        parse_record(self.send(ctx, "PATCH", &url, Some(&body))?)
    }

    fn delete(&self, ctx: &RequestContext, id: &str) -> Result<(), ClientError> {
        let url = format!("{}/{id}", self.base_url);
        self.send(ctx, "DELETE", &url, None)?;
        Ok(())
    }
}
