//! Streaming adapter for OpenAI-compatible chat-completion endpoints.
//!
//! Parses the SSE stream into unified chunks: `delta.content` → text,
//! `delta.reasoning_content` → thinking, accumulated `delta.tool_calls`
//! fragments → complete tool calls at finish, `usage` → one usage chunk.

use std::{collections::BTreeMap, time::Duration};

use {
    async_stream::stream,
    async_trait::async_trait,
    futures::StreamExt,
    secrecy::{ExposeSecret, Secret},
    tracing::{debug, warn},
};

use crate::{
    chunks::{ParsedToolCall, UnifiedStreamChunk},
    error::ProviderError,
    messages::ChatMessage,
    model::{ChatProvider, ChunkStream, CompletionRequest, CompletionResponse},
    usage::coalesce_usage,
};

/// Provider-call timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct OpenAiCompatProvider {
    api_key: Secret<String>,
    model: String,
    base_url: String,
    provider_name: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        api_key: Secret<String>,
        model: String,
        base_url: String,
        provider_name: String,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            api_key,
            model,
            base_url,
            provider_name,
            client,
        }
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(to_openai_message)
            .collect();

        let mut body = serde_json::json!({
            "model": request.model_id,
            "messages": messages,
            "stream": stream,
        });
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "type": "function",
                            "function": t,
                        })
                    })
                    .collect(),
            );
            if let Some(choice) = &request.tool_choice {
                body["tool_choice"] = serde_json::Value::String(choice.clone());
            }
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }

    async fn send(
        &self,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let text = response.text().await.unwrap_or_default();

        Err(match status.as_u16() {
            429 => ProviderError::RateLimited {
                wait_time_seconds: retry_after.unwrap_or(30),
            },
            404 => ProviderError::ModelNotFound(self.model.clone()),
            code if (400..500).contains(&code) => {
                ProviderError::Permanent(format!("{status}: {text}"))
            },
            _ => ProviderError::Transient(format!("{status}: {text}")),
        })
    }
}

/// In-flight tool-call accumulation, keyed by stream index.
#[derive(Default)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallBuilder {
    fn finish(self) -> ParsedToolCall {
        let arguments_parsed =
            serde_json::from_str(&self.arguments).unwrap_or(serde_json::Value::Null);
        ParsedToolCall {
            tool_call_id: self.id,
            name: self.name,
            arguments_parsed,
            arguments_raw: self.arguments,
            thought_signature: None,
        }
    }
}

fn to_openai_message(message: &ChatMessage) -> serde_json::Value {
    match message {
        ChatMessage::System { content } => {
            serde_json::json!({ "role": "system", "content": content })
        },
        ChatMessage::User { content } => {
            serde_json::json!({ "role": "user", "content": content })
        },
        ChatMessage::Assistant {
            content,
            tool_calls,
        } => {
            if tool_calls.is_empty() {
                serde_json::json!({
                    "role": "assistant",
                    "content": content.as_deref().unwrap_or(""),
                })
            } else {
                let calls: Vec<serde_json::Value> = tool_calls
                    .iter()
                    .map(|call| {
                        serde_json::json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            },
                        })
                    })
                    .collect();
                serde_json::json!({
                    "role": "assistant",
                    "content": content,
                    "tool_calls": calls,
                })
            }
        },
        ChatMessage::Tool {
            tool_call_id,
            content,
            ..
        } => serde_json::json!({
            "role": "tool",
            "tool_call_id": tool_call_id,
            "content": content,
        }),
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    fn id(&self) -> &str {
        &self.model
    }

    fn supports_tools(&self) -> bool {
        true
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = self.request_body(request, false);
        let response = self.send(&body).await?;
        let value: serde_json::Value = response.json().await?;

        let message = &value["choices"][0]["message"];
        let text = message["content"].as_str().map(str::to_string);
        let tool_calls = message["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .map(|call| {
                        let raw = call["function"]["arguments"]
                            .as_str()
                            .unwrap_or("")
                            .to_string();
                        ParsedToolCall {
                            tool_call_id: call["id"].as_str().unwrap_or("").to_string(),
                            name: call["function"]["name"].as_str().unwrap_or("").to_string(),
                            arguments_parsed: serde_json::from_str(&raw)
                                .unwrap_or(serde_json::Value::Null),
                            arguments_raw: raw,
                            thought_signature: None,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let usage = coalesce_usage(
            value["usage"]["prompt_tokens"].as_u64(),
            value["usage"]["completion_tokens"].as_u64(),
            value["usage"]["total_tokens"].as_u64(),
        );

        Ok(CompletionResponse {
            text,
            tool_calls,
            usage,
        })
    }

    fn stream_chunks(&self, request: CompletionRequest) -> ChunkStream {
        let body = self.request_body(&request, true);
        let client = self.client.clone();
        let url = format!("{}/chat/completions", self.base_url);
        let api_key = self.api_key.expose_secret().clone();
        let model = self.model.clone();

        Box::pin(stream! {
            let response = match client
                .post(&url)
                .bearer_auth(&api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    yield Err(ProviderError::Transport(e));
                    return;
                },
            };

            let status = response.status();
            if !status.is_success() {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                let text = response.text().await.unwrap_or_default();
                yield Err(match status.as_u16() {
                    429 => ProviderError::RateLimited {
                        wait_time_seconds: retry_after.unwrap_or(30),
                    },
                    404 => ProviderError::ModelNotFound(model),
                    code if (400..500).contains(&code) => {
                        ProviderError::Permanent(format!("{status}: {text}"))
                    },
                    _ => ProviderError::Transient(format!("{status}: {text}")),
                });
                return;
            }

            let mut byte_stream = response.bytes_stream();
            let mut buf = String::new();
            let mut builders: BTreeMap<usize, ToolCallBuilder> = BTreeMap::new();
            let mut usage = None;

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(ProviderError::Transport(e));
                        return;
                    },
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf = buf[pos + 1..].to_string();

                    if line.is_empty() {
                        continue;
                    }
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };

                    if data == "[DONE]" {
                        // Tool calls complete at stream end.
                        for (_, builder) in std::mem::take(&mut builders) {
                            yield Ok(UnifiedStreamChunk::ToolCall(builder.finish()));
                        }
                        if let Some(usage) = usage.take() {
                            yield Ok(UnifiedStreamChunk::Usage(usage));
                        }
                        return;
                    }

                    let Ok(event) = serde_json::from_str::<serde_json::Value>(data) else {
                        debug!("skipping malformed SSE data line");
                        continue;
                    };

                    if let Some(u) = event.get("usage").filter(|u| !u.is_null()) {
                        usage = Some(coalesce_usage(
                            u["prompt_tokens"].as_u64(),
                            u["completion_tokens"].as_u64(),
                            u["total_tokens"].as_u64(),
                        ));
                    }

                    let delta = &event["choices"][0]["delta"];
                    if let Some(thinking) = delta["reasoning_content"].as_str()
                        && !thinking.is_empty()
                    {
                        yield Ok(UnifiedStreamChunk::Thinking {
                            content: thinking.to_string(),
                        });
                    }
                    if let Some(content) = delta["content"].as_str()
                        && !content.is_empty()
                    {
                        yield Ok(UnifiedStreamChunk::Text {
                            content: content.to_string(),
                        });
                    }
                    if let Some(calls) = delta["tool_calls"].as_array() {
                        for call in calls {
                            let index = call["index"].as_u64().unwrap_or(0) as usize;
                            let builder = builders.entry(index).or_default();
                            if let Some(id) = call["id"].as_str() {
                                builder.id = id.to_string();
                            }
                            if let Some(name) = call["function"]["name"].as_str() {
                                builder.name.push_str(name);
                            }
                            if let Some(args) = call["function"]["arguments"].as_str() {
                                builder.arguments.push_str(args);
                            }
                        }
                    }
                }
            }

            // Stream closed without [DONE]; flush what we have.
            warn!("SSE stream ended without DONE marker");
            for (_, builder) in builders {
                yield Ok(UnifiedStreamChunk::ToolCall(builder.finish()));
            }
            if let Some(usage) = usage {
                yield Ok(UnifiedStreamChunk::Usage(usage));
            }
        })
    }
}
