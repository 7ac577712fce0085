//! OpenAI-compatible LLM adapter.
//!
//! Works with OpenAI, Groq, Together, vLLM, and any other endpoint that
//! follows the OpenAI chat completions contract. Streams tokens via SSE and
//! assembles tool-call argument deltas across events.

use std::collections::HashMap;

use serde_json::Value;

use vx_domain::config::ProviderAuthConfig;
use vx_domain::error::{Error, Result};
use vx_domain::session::{ChatEntry, ChatRole};
use vx_domain::stream::{BoxStream, LlmEvent, TokenUsage};
use vx_domain::tool::ToolDefinition;

use crate::retry::with_retry;
use crate::sse::sse_response_stream;
use crate::traits::{ChatRequest, LlmProvider};
use crate::util::{from_reqwest, status_error};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiLlmProvider {
    slug: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiLlmProvider {
    pub fn from_auth(slug: &str, auth: &ProviderAuthConfig) -> Result<Self> {
        let api_key = auth
            .resolve_key("llm", slug)
            .ok_or_else(|| Error::AuthFailed(format!("{slug}: no API key configured")))?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| from_reqwest(slug, e))?;
        Ok(Self {
            slug: slug.to_string(),
            api_key,
            base_url: auth
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.into())
                .trim_end_matches('/')
                .to_string(),
            client,
        })
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(entry_to_openai).collect();
        let mut body = serde_json::json!({
            "model": req.model,
            "messages": messages,
            "temperature": req.temperature,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiLlmProvider {
    async fn stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, Result<LlmEvent>>> {
        let body = self.build_body(req);
        let url = format!("{}/chat/completions", self.base_url);
        let slug = self.slug.clone();

        let response = with_retry("openai.stream", || {
            let body = body.clone();
            let url = url.clone();
            let slug = slug.clone();
            async move {
                let response = self
                    .client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| from_reqwest(&slug, e))?;
                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(status_error(&slug, status, &text));
                }
                Ok(response)
            }
        })
        .await?;

        let mut state = StreamState::default();
        Ok(sse_response_stream(response, move |data| {
            state.parse(data)
        }))
    }

    fn slug(&self) -> &str {
        &self.slug
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE parsing with tool-call assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tool-call deltas arrive keyed by index; arguments accumulate across
/// events and flush when the choice finishes with `tool_calls`.
#[derive(Default)]
struct StreamState {
    tool_calls: HashMap<u64, (String, String, String)>, // index -> (id, name, args)
}

impl StreamState {
    fn parse(&mut self, data: &str) -> Vec<Result<LlmEvent>> {
        if data == "[DONE]" {
            return Vec::new();
        }
        let value: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "unparseable SSE payload, skipping");
                return Vec::new();
            }
        };

        let mut events = Vec::new();

        // The usage-only terminal event has an empty choices array.
        if let Some(usage) = value.get("usage").filter(|u| !u.is_null()) {
            let usage = TokenUsage {
                prompt_tokens: usage
                    .get("prompt_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32,
                completion_tokens: usage
                    .get("completion_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32,
            };
            events.push(Ok(LlmEvent::Done { usage: Some(usage) }));
            return events;
        }

        let Some(choice) = value.get("choices").and_then(|c| c.get(0)) else {
            return events;
        };

        if let Some(delta) = choice.get("delta") {
            if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
                if !text.is_empty() {
                    events.push(Ok(LlmEvent::Token {
                        text: text.to_string(),
                    }));
                }
            }
            if let Some(tcs) = delta.get("tool_calls").and_then(|v| v.as_array()) {
                for tc in tcs {
                    let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                    let entry = self.tool_calls.entry(index).or_default();
                    if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                        entry.0 = id.to_string();
                    }
                    if let Some(function) = tc.get("function") {
                        if let Some(name) = function.get("name").and_then(|v| v.as_str()) {
                            entry.1 = name.to_string();
                        }
                        if let Some(args) = function.get("arguments").and_then(|v| v.as_str()) {
                            entry.2.push_str(args);
                        }
                    }
                }
            }
        }

        if choice.get("finish_reason").and_then(|v| v.as_str()) == Some("tool_calls") {
            let mut pending: Vec<_> = std::mem::take(&mut self.tool_calls).into_iter().collect();
            pending.sort_by_key(|(index, _)| *index);
            for (_, (id, name, args)) in pending {
                let arguments = if args.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&args).unwrap_or_else(|e| {
                        tracing::warn!(
                            tool = %name,
                            error = %e,
                            "tool call arguments are not valid JSON; defaulting to empty object"
                        );
                        Value::Object(Default::default())
                    })
                };
                events.push(Ok(LlmEvent::ToolCall {
                    call_id: id,
                    tool_name: name,
                    arguments,
                }));
            }
        }

        events
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    }
}

fn entry_to_openai(entry: &ChatEntry) -> Value {
    match entry.role {
        ChatRole::Tool => {
            // Tool results carry their call id in the attachment.
            let call_id = entry
                .tool_calls
                .as_ref()
                .and_then(|v| v.get("call_id"))
                .and_then(|v| v.as_str())
                .unwrap_or("");
            serde_json::json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": entry.content,
            })
        }
        ChatRole::Assistant => {
            let mut obj = serde_json::json!({
                "role": "assistant",
                "content": if entry.content.is_empty() { Value::Null } else { Value::String(entry.content.clone()) },
            });
            if let Some(tcs) = entry.tool_calls.as_ref().and_then(|v| v.get("tool_calls")) {
                obj["tool_calls"] = tcs.clone();
            }
            obj
        }
        _ => serde_json::json!({
            "role": role_to_str(entry.role),
            "content": entry.content,
        }),
    }
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}
