use std::io::{self, Read};
use std::sync::Arc;

use serde_json::json;
use tiny_http::{Method, Response, Server};

use crate::{ChatRequest, Harness};

/// Blocking HTTP front end. One thread per request; the pipeline behind
/// it is shared through the harness. The bearer credential is pulled off
/// the Authorization header and lives only inside `handle_chat`.
pub(crate) fn run_server(
    harness: Arc<Harness>,
    bind: &str,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{bind}:{port}");
    let server = Server::http(&addr)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("server: {e}")))?;
    eprintln!("taskpilot listening on http://{addr}");

    for mut request in server.incoming_requests() {
        let harness = Arc::clone(&harness);
        std::thread::spawn(move || {
            let method = request.method().clone();
            let path = request.url().split('?').next().unwrap_or("/").to_string();
            let auth = request
                .headers()
                .iter()
                .find(|h| h.field.equiv("Authorization"))
                .map(|h| h.value.as_str().to_string());
            let mut body = String::new();
            if request.as_reader().read_to_string(&mut body).is_err() {
                body.clear();
            }

            let (status, payload) = handle(&harness, &method, &path, auth.as_deref(), &body);
            let mut response =
                Response::from_string(payload.to_string()).with_status_code(status);
            if let Ok(header) =
                tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
            {
                response = response.with_header(header);
            }
            let _ = request.respond(response);
        });
    }
    Ok(())
}

pub(crate) fn parse_bearer(value: &str) -> Option<String> {
    let value = value.trim();
    let rest = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?;
    let credential = rest.trim();
    if credential.is_empty() {
        None
    } else {
        Some(credential.to_string())
    }
}

/// Pure request handler, split from the socket loop so it can be tested
/// without binding a port.
fn handle(
    harness: &Harness,
    method: &Method,
    path: &str,
    auth: Option<&str>,
    body: &str,
) -> (u16, serde_json::Value) {
    match (method, path) {
        (Method::Get, "/health") => (200, json!({ "ok": true })),
        (Method::Post, "/chat") => {
            let Some(credential) = auth.and_then(parse_bearer) else {
                return (401, json!({ "error": "missing bearer credential" }));
            };
            let req: ChatRequest = match serde_json::from_str(body) {
                Ok(req) => req,
                Err(e) => return (400, json!({ "error": format!("bad request body: {e}") })),
            };
            if req.user_id.trim().is_empty()
                || req.session_id.trim().is_empty()
                || req.message.trim().is_empty()
            {
                return (
                    400,
                    json!({ "error": "user_id, session_id, and message are required" }),
                );
            }
            let resp = harness.handle_chat(&req, credential);
            match serde_json::to_value(&resp) {
                Ok(value) => (200, value),
                Err(e) => (500, json!({ "error": format!("encode response: {e}") })),
            }
        }
        _ => (404, json!({ "error": "not found" })),
    }
}
