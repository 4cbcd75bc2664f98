//! Anthropic messages dialect.
//!
//! The interesting conversions: `system` messages become the top-level
//! `system` field, tool results ride in a synthetic `user` message as
//! `tool_result` blocks, assistant tool calls become `tool_use` content
//! blocks, and `data:` image URIs are re-emitted as base64 sources.

use std::pin::Pin;

use {
    futures::StreamExt, secrecy::ExposeSecret, tokio_stream::Stream,
    tracing::{debug, trace, warn},
};

use crate::{
    error::ProviderError,
    model::{
        ChatMessage, ChatRequest, CompletionResponse, ContentBlock, StreamEvent, ToolCall, Usage,
        UserContent,
    },
};

const CALL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    api_key: secrecy::Secret<String>,
    model: String,
    base_url: String,
    client: reqwest::Client,
    stream_client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: secrecy::Secret<String>, model: String, base_url: String) -> Self {
        Self {
            api_key,
            model,
            base_url,
            client: reqwest::Client::builder()
                .timeout(CALL_TIMEOUT)
                .build()
                .unwrap_or_default(),
            stream_client: reqwest::Client::builder()
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, req: &ChatRequest, stream: bool) -> serde_json::Value {
        let (system_text, messages) = to_anthropic_messages(&req.messages);

        let model = if req.model.is_empty() || req.model == "auto" {
            &self.model
        } else {
            &req.model
        };
        let mut body = serde_json::json!({
            "model": model,
            "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
        });
        if let Some(sys) = system_text {
            body["system"] = serde_json::Value::String(sys);
        }
        if !req.tools.is_empty() {
            body["tools"] = serde_json::Value::Array(to_anthropic_tools(&req.tools));
        }
        if let Some(t) = req.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if stream {
            body["stream"] = serde_json::json!(true);
        }
        body
    }

    fn post(&self, client: &reqwest::Client, body: &serde_json::Value) -> reqwest::RequestBuilder {
        client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
    }

    pub async fn complete(&self, req: &ChatRequest) -> Result<CompletionResponse, ProviderError> {
        let body = self.request_body(req, false);
        debug!(
            model = %self.model,
            messages_count = req.messages.len(),
            tools_count = req.tools.len(),
            "anthropic complete request"
        );
        trace!(body = %body, "anthropic request body");

        let http_resp = self
            .post(&self.client, &body)
            .send()
            .await
            .map_err(|source| ProviderError::Network {
                provider: "anthropic",
                source,
            })?;

        let status = http_resp.status();
        if !status.is_success() {
            let body_text = http_resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body_text, "anthropic API error");
            return Err(ProviderError::Status {
                provider: "anthropic",
                status: status.as_u16(),
                body: body_text,
            });
        }

        let resp: serde_json::Value =
            http_resp
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    provider: "anthropic",
                    message: e.to_string(),
                })?;
        trace!(response = %resp, "anthropic raw response");

        let content = resp["content"].as_array().cloned().unwrap_or_default();
        let text = content
            .iter()
            .filter_map(|b| {
                if b["type"].as_str() == Some("text") {
                    b["text"].as_str().map(|s| s.to_string())
                } else {
                    None
                }
            })
            .reduce(|a, b| a + &b);

        Ok(CompletionResponse {
            text,
            tool_calls: parse_tool_use_blocks(&content),
            usage: Usage {
                input_tokens: resp["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: resp["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
            },
        })
    }

    pub async fn stream(
        &self,
        req: &ChatRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, ProviderError> {
        let body = self.request_body(req, true);
        debug!(model = %self.model, messages_count = req.messages.len(), "anthropic stream request");

        let resp = self
            .post(&self.stream_client, &body)
            .send()
            .await
            .map_err(|source| ProviderError::Network {
                provider: "anthropic",
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                provider: "anthropic",
                status: status.as_u16(),
                body: body_text,
            });
        }

        Ok(Box::pin(decode_stream(resp.bytes_stream())))
    }
}

/// Convert canonical tool schemas to Anthropic's tool format.
fn to_anthropic_tools(tools: &[serde_json::Value]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|t| {
            serde_json::json!({
                "name": t["name"],
                "description": t["description"],
                "input_schema": t["parameters"],
            })
        })
        .collect()
}

/// Parse `tool_use` blocks from an Anthropic content array.
fn parse_tool_use_blocks(content: &[serde_json::Value]) -> Vec<ToolCall> {
    content
        .iter()
        .filter_map(|block| {
            if block["type"].as_str() == Some("tool_use") {
                Some(ToolCall {
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: block["name"].as_str().unwrap_or("").to_string(),
                    arguments: block["input"].clone(),
                })
            } else {
                None
            }
        })
        .collect()
}

/// Convert an image URL to an Anthropic image source block. `data:` URIs
/// are decoded into base64 sources; plain URLs pass through as URL sources.
fn image_block(url: &str) -> serde_json::Value {
    if let Some(rest) = url.strip_prefix("data:")
        && let Some((media_type, data)) = rest.split_once(";base64,")
    {
        return serde_json::json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": media_type,
                "data": data,
            }
        });
    }
    serde_json::json!({
        "type": "image",
        "source": { "type": "url", "url": url }
    })
}

/// Convert internal messages to Anthropic format.
///
/// Returns `(system_text, messages)`. Consecutive system messages are
/// joined into the single top-level `system` field.
fn to_anthropic_messages(
    messages: &[ChatMessage],
) -> (Option<String>, Vec<serde_json::Value>) {
    let mut system_text: Option<String> = None;
    let mut out = Vec::new();

    for msg in messages {
        match msg {
            ChatMessage::System { content } => {
                system_text = Some(match system_text {
                    Some(existing) => format!("{existing}\n\n{content}"),
                    None => content.clone(),
                });
            },
            ChatMessage::User { content } => match content {
                UserContent::Text(text) => {
                    out.push(serde_json::json!({"role": "user", "content": text}));
                },
                UserContent::Blocks(blocks) => {
                    let parts: Vec<serde_json::Value> = blocks
                        .iter()
                        .map(|b| match b {
                            ContentBlock::Text { text } => {
                                serde_json::json!({"type": "text", "text": text})
                            },
                            ContentBlock::ImageUrl { url } => image_block(url),
                        })
                        .collect();
                    out.push(serde_json::json!({"role": "user", "content": parts}));
                },
            },
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                if tool_calls.is_empty() {
                    out.push(serde_json::json!({
                        "role": "assistant",
                        "content": content.as_deref().unwrap_or(""),
                    }));
                } else {
                    let mut blocks = Vec::new();
                    if let Some(text) = content
                        && !text.is_empty()
                    {
                        blocks.push(serde_json::json!({"type": "text", "text": text}));
                    }
                    for tc in tool_calls {
                        blocks.push(serde_json::json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": tc.arguments,
                        }));
                    }
                    out.push(serde_json::json!({"role": "assistant", "content": blocks}));
                }
            },
            ChatMessage::Tool {
                tool_call_id,
                content,
            } => {
                out.push(serde_json::json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": tool_call_id,
                        "content": content,
                    }]
                }));
            },
        }
    }

    (system_text, out)
}

/// Decode an Anthropic SSE byte stream into canonical events.
fn decode_stream(
    byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = StreamEvent> + Send {
    async_stream::stream! {
        let mut byte_stream = std::pin::pin!(byte_stream);
        let mut buf = String::new();
        let mut usage = Usage::default();
        // Content-block index of the tool_use block currently streaming.
        let mut current_tool_block: Option<usize> = None;

        while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield StreamEvent::Error(e.to_string());
                    return;
                }
            };
            buf.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buf.find("\n\n") {
                let block = buf[..pos].to_string();
                buf = buf[pos + 2..].to_string();

                for line in block.lines() {
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let Ok(evt) = serde_json::from_str::<serde_json::Value>(data) else {
                        continue;
                    };

                    match evt["type"].as_str().unwrap_or("") {
                        "message_start" => {
                            let u = &evt["message"]["usage"];
                            if let Some(v) = u["input_tokens"].as_u64() {
                                usage.input_tokens = v as u32;
                            }
                        },
                        "content_block_start" => {
                            let index = evt["index"].as_u64().unwrap_or(0) as usize;
                            let content_block = &evt["content_block"];
                            if content_block["type"].as_str() == Some("tool_use") {
                                current_tool_block = Some(index);
                                yield StreamEvent::ToolCallStart {
                                    id: content_block["id"].as_str().unwrap_or("").to_string(),
                                    name: content_block["name"].as_str().unwrap_or("").to_string(),
                                    index,
                                };
                            }
                        },
                        "content_block_delta" => {
                            let delta = &evt["delta"];
                            match delta["type"].as_str().unwrap_or("") {
                                "text_delta" => {
                                    if let Some(text) = delta["text"].as_str()
                                        && !text.is_empty()
                                    {
                                        yield StreamEvent::Delta(text.to_string());
                                    }
                                },
                                "input_json_delta" => {
                                    if let Some(partial) = delta["partial_json"].as_str() {
                                        let index = evt["index"].as_u64().unwrap_or(0) as usize;
                                        yield StreamEvent::ToolCallArgumentsDelta {
                                            index,
                                            delta: partial.to_string(),
                                        };
                                    }
                                },
                                _ => {},
                            }
                        },
                        "content_block_stop" => {
                            let index = evt["index"].as_u64().unwrap_or(0) as usize;
                            if current_tool_block == Some(index) {
                                yield StreamEvent::ToolCallComplete { index };
                                current_tool_block = None;
                            }
                        },
                        "message_delta" => {
                            if let Some(v) = evt["usage"]["output_tokens"].as_u64() {
                                usage.output_tokens = v as u32;
                            }
                        },
                        "message_stop" => {
                            yield StreamEvent::Done(usage);
                            return;
                        },
                        "error" => {
                            let msg = evt["error"]["message"].as_str().unwrap_or("unknown error");
                            yield StreamEvent::Error(msg.to_string());
                            return;
                        },
                        _ => {},
                    }
                }
            }
        }

        yield StreamEvent::Done(usage);
    }
}
