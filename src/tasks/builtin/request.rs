use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;

use crate::command::ParsedCommand;
use crate::error::TaskError;
use crate::mail::text::truncate;
use crate::mail::{IncomingMessage, OutgoingMessage};
use crate::tasks::builtin::shell::MAX_OUTPUT_SIZE;
use crate::tasks::builtin::subject;
use crate::tasks::task::{TaskContext, TaskHandler};

const USAGE: &str = "Usage: request [METHOD] [URL] [headers-json] [body]\n\
A single [URL] sends a GET. Headers must be a JSON object; \
the body is sent as JSON when it parses as JSON.";

/// Parsed `request` arguments.
#[derive(Debug, PartialEq)]
struct HttpCall {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<String>,
}

fn parse_call(args: &[String]) -> Result<HttpCall, TaskError> {
    let (method, rest) = match args {
        [url] => (Method::GET, std::slice::from_ref(url)),
        [method, rest @ ..] => {
            let method = Method::from_bytes(method.trim().to_uppercase().as_bytes())
                .map_err(|_| TaskError::invalid("request", format!("bad method {method:?}")))?;
            (method, rest)
        }
        [] => return Err(TaskError::invalid("request", "missing URL")),
    };

    let url = rest
        .first()
        .map(|u| u.trim().to_string())
        .ok_or_else(|| TaskError::invalid("request", "missing URL"))?;
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(TaskError::invalid(
            "request",
            format!("URL must start with http:// or https://, got {url:?}"),
        ));
    }

    let headers = match rest.get(1).map(|h| h.trim()).filter(|h| !h.is_empty()) {
        None => Vec::new(),
        Some(raw) => {
            let value: Value = serde_json::from_str(raw).map_err(|e| {
                TaskError::invalid("request", format!("headers are not valid JSON: {e}"))
            })?;
            let Value::Object(map) = value else {
                return Err(TaskError::invalid("request", "headers must be a JSON object"));
            };
            map.into_iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (k, v)
                })
                .collect()
        }
    };

    Ok(HttpCall {
        method,
        url,
        headers,
        body: rest.get(2).cloned(),
    })
}

/// `request [METHOD] [URL] [headers] [body]`: proxy an HTTP call.
pub struct RequestTask;

#[async_trait]
impl TaskHandler for RequestTask {
    async fn run(
        &self,
        ctx: &TaskContext<'_>,
        msg: &IncomingMessage,
        cmd: &ParsedCommand,
    ) -> Result<OutgoingMessage, TaskError> {
        if cmd.args.is_empty() {
            return Ok(OutgoingMessage::reply_to(
                msg,
                subject("REQUEST", "Main Menu"),
                USAGE,
            ));
        }
        let call = parse_call(&cmd.args)?;

        let client = Client::builder()
            .timeout(ctx.config.handler_timeout())
            .build()
            .map_err(|e| TaskError::Http(format!("Failed to build HTTP client: {e}")))?;

        let mut request = client
            .request(call.method.clone(), &call.url)
            .header("User-Agent", concat!("emalia/", env!("CARGO_PKG_VERSION")));
        for (key, value) in &call.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(body) = call.body {
            request = match serde_json::from_str::<Value>(&body) {
                Ok(json) => request.json(&json),
                Err(_) => request.body(body),
            };
        }

        tracing::info!(method = %call.method, url = %call.url, sender = %msg.sender(), "Proxying HTTP request");
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TaskError::Timeout(ctx.config.handler_timeout())
            } else {
                TaskError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TaskError::Http(e.to_string()))?;

        let label = if status.is_success() { "Completed" } else { "Failed" };
        Ok(OutgoingMessage::reply_to(
            msg,
            subject("REQUEST", label),
            format!(
                "{} {}\nStatus: {status}\n\n{}",
                call.method,
                call.url,
                truncate(&text, MAX_OUTPUT_SIZE)
            ),
        ))
    }
}
