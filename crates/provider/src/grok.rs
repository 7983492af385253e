use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde_json::json;

use crate::sse::parse_sse_stream;
use crate::types::*;
use crate::{Provider, ProviderError};

const DEFAULT_BASE_URL: &str = "https://api.x.ai/v1";
const DEFAULT_MODEL: &str = "grok-code-fast-1";

pub struct GrokProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    default_model: String,
    timeout: Duration,
    stream_timeout: Duration,
}

impl GrokProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder().build().unwrap_or_default(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            default_model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout: Duration::from_millis(360_000),
            stream_timeout: Duration::from_millis(3_600_000),
        }
    }

    pub fn from_settings(settings: &grok_config::Settings) -> Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no API key configured (set GROK_API_KEY or .grok/settings.json)"))?;
        let mut provider = Self::new(
            api_key,
            settings.base_url.clone(),
            settings.default_model.clone(),
        );
        provider.timeout = Duration::from_millis(settings.timeout_ms);
        provider.stream_timeout = Duration::from_millis(settings.stream_timeout_ms);
        Ok(provider)
    }

    fn build_body(&self, model: &str, request: &ChatRequest) -> serde_json::Value {
        let mut body = json!({
            "model": model,
            "messages": self.build_messages(request),
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(self.build_tools(&request.tools));
            body["tool_choice"] = request.tool_choice.to_wire();
        }
        body
    }

    fn build_messages(&self, request: &ChatRequest) -> Vec<serde_json::Value> {
        let mut msgs = Vec::new();

        if let Some(system) = &request.system {
            msgs.push(json!({
                "role": "system",
                "content": system,
            }));
        }

        for msg in &request.messages {
            match &msg.content {
                MessageContent::Text(text) => msgs.push(json!({
                    "role": role_str(&msg.role),
                    "content": text,
                })),
                MessageContent::Parts(parts) => {
                    // Tool-use parts fold into an assistant message with
                    // `tool_calls`; tool results become individual `tool`
                    // role messages, as the chat/completions wire expects.
                    let mut text = String::new();
                    let mut tool_calls = Vec::new();
                    let mut tool_results = Vec::new();
                    for part in parts {
                        match part {
                            ContentPart::Text { text: t } => text.push_str(t),
                            ContentPart::ToolUse { id, name, input } => {
                                tool_calls.push(json!({
                                    "id": id,
                                    "type": "function",
                                    "function": {
                                        "name": name,
                                        "arguments": input.to_string(),
                                    }
                                }));
                            }
                            ContentPart::ToolResult {
                                tool_use_id,
                                content,
                            } => {
                                tool_results.push(json!({
                                    "role": "tool",
                                    "tool_call_id": tool_use_id,
                                    "content": content,
                                }));
                            }
                        }
                    }
                    if !tool_calls.is_empty() || !text.is_empty() {
                        let mut m = json!({
                            "role": role_str(&msg.role),
                            "content": text,
                        });
                        if !tool_calls.is_empty() {
                            m["tool_calls"] = json!(tool_calls);
                        }
                        msgs.push(m);
                    }
                    msgs.extend(tool_results);
                }
            }
        }

        msgs
    }

    fn build_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }

    async fn send(
        &self,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::Error::from(ProviderError::Timeout(e.to_string()))
                } else {
                    anyhow::Error::from(ProviderError::Stream(e.to_string()))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let body = resp.text().await.unwrap_or_default();
            return Err(
                ProviderError::from_http(status.as_u16(), body, retry_after.as_deref()).into(),
            );
        }
        Ok(resp)
    }
}

fn role_str(role: &Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Translate one streaming chunk into zero or more stream events. A single
/// chunk may carry both a tool-call start (function.name) and its first
/// argument slice, and `index` values are not guaranteed to arrive in order.
fn parse_stream_chunk(data: &serde_json::Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    if let Some(usage) = data.get("usage").filter(|u| u.is_object()) {
        events.push(StreamEvent::Usage(Usage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        }));
    }

    let choice = &data["choices"][0];
    let delta = &choice["delta"];

    if let Some(content) = delta["content"].as_str() {
        if !content.is_empty() {
            events.push(StreamEvent::TextDelta(content.to_string()));
        }
    }

    if let Some(tool_calls) = delta["tool_calls"].as_array() {
        for tc in tool_calls {
            let index = tc["index"].as_u64().unwrap_or(0) as u32;
            if let Some(function) = tc.get("function") {
                if let Some(name) = function["name"].as_str() {
                    events.push(StreamEvent::ToolCallStart {
                        index,
                        id: tc["id"].as_str().unwrap_or("").to_string(),
                        name: name.to_string(),
                    });
                }
                if let Some(args) = function["arguments"].as_str() {
                    if !args.is_empty() {
                        events.push(StreamEvent::ToolCallDelta {
                            index,
                            arguments_delta: args.to_string(),
                        });
                    }
                }
            }
        }
    }

    if choice["finish_reason"].is_string() {
        events.push(StreamEvent::Done);
    }

    events
}

#[async_trait]
impl Provider for GrokProvider {
    fn name(&self) -> &str {
        "grok"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let model = if request.model.is_empty() {
            &self.default_model
        } else {
            &request.model
        };

        let body = self.build_body(model, request);
        let resp = self.send(&body, self.timeout).await?;
        let data: serde_json::Value = resp.json().await?;

        let choice = &data["choices"][0];
        let content = choice["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok(ChatResponse {
            message: Message {
                role: Role::Assistant,
                content: MessageContent::Text(content),
            },
            usage: data.get("usage").map(|u| Usage {
                input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
            }),
            finish_reason: choice["finish_reason"].as_str().map(String::from),
        })
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let model = if request.model.is_empty() {
            &self.default_model
        } else {
            &request.model
        };

        let mut body = self.build_body(model, request);
        body["stream"] = json!(true);
        body["stream_options"] = json!({"include_usage": true});

        let resp = self.send(&body, self.stream_timeout).await?;
        let sse_stream = parse_sse_stream(resp);

        let event_stream = sse_stream.flat_map(|result| {
            let events: Vec<Result<StreamEvent>> = match result {
                Ok(sse) => match serde_json::from_str::<serde_json::Value>(&sse.data) {
                    Ok(data) => parse_stream_chunk(&data).into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(ProviderError::Stream(format!(
                        "malformed stream chunk: {e}"
                    ))
                    .into())],
                },
                Err(e) => vec![Err(e)],
            };
            futures::stream::iter(events)
        });

        Ok(Box::pin(event_stream))
    }
}
