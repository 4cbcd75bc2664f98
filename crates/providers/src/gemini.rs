//! Google Gemini dialect.
//!
//! The interesting conversions: `system` becomes `systemInstruction`, the
//! `assistant` role becomes `model`, tool calls become `functionCall`
//! parts, tool results become `functionResponse` parts inside a `user`
//! content, and images become `inlineData` parts.

use std::{collections::HashMap, pin::Pin};

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

pub struct GeminiProvider {
    api_key: secrecy::Secret<String>,
    model: String,
    base_url: String,
    client: reqwest::Client,
    stream_client: reqwest::Client,
}

impl GeminiProvider {
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

    fn resolve_model<'a>(&'a self, requested: &'a str) -> &'a str {
        if requested.is_empty() || requested == "auto" {
            &self.model
        } else {
            requested
        }
    }

    fn request_body(&self, req: &ChatRequest) -> serde_json::Value {
        let (system_text, contents) = to_gemini_contents(&req.messages);

        let mut body = serde_json::json!({ "contents": contents });
        if let Some(sys) = system_text {
            body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": sys }] });
        }
        if !req.tools.is_empty() {
            body["tools"] =
                serde_json::json!([{ "functionDeclarations": to_gemini_tools(&req.tools) }]);
        }
        let mut generation = serde_json::Map::new();
        if let Some(t) = req.temperature {
            generation.insert("temperature".into(), serde_json::json!(t));
        }
        if let Some(m) = req.max_tokens {
            generation.insert("maxOutputTokens".into(), serde_json::json!(m));
        }
        if !generation.is_empty() {
            body["generationConfig"] = serde_json::Value::Object(generation);
        }
        body
    }

    pub async fn complete(&self, req: &ChatRequest) -> Result<CompletionResponse, ProviderError> {
        let body = self.request_body(req);
        let model = self.resolve_model(&req.model);
        debug!(model, messages_count = req.messages.len(), "gemini complete request");
        trace!(body = %body, "gemini request body");

        let http_resp = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, model
            ))
            .header("x-goog-api-key", self.api_key.expose_secret())
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|source| ProviderError::Network {
                provider: "gemini",
                source,
            })?;

        let status = http_resp.status();
        if !status.is_success() {
            let body_text = http_resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body_text, "gemini API error");
            return Err(ProviderError::Status {
                provider: "gemini",
                status: status.as_u16(),
                body: body_text,
            });
        }

        let resp: serde_json::Value =
            http_resp
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    provider: "gemini",
                    message: e.to_string(),
                })?;
        trace!(response = %resp, "gemini raw response");

        let parts = resp["candidates"][0]["content"]["parts"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        let text = parts
            .iter()
            .filter_map(|p| p["text"].as_str().map(|s| s.to_string()))
            .reduce(|a, b| a + &b);

        Ok(CompletionResponse {
            text,
            tool_calls: parse_function_calls(&parts),
            usage: Usage {
                input_tokens: resp["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0)
                    as u32,
                output_tokens: resp["usageMetadata"]["candidatesTokenCount"]
                    .as_u64()
                    .unwrap_or(0) as u32,
            },
        })
    }

    pub async fn stream(
        &self,
        req: &ChatRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, ProviderError> {
        let body = self.request_body(req);
        let model = self.resolve_model(&req.model);
        debug!(model, messages_count = req.messages.len(), "gemini stream request");

        let resp = self
            .stream_client
            .post(format!(
                "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                self.base_url, model
            ))
            .header("x-goog-api-key", self.api_key.expose_secret())
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|source| ProviderError::Network {
                provider: "gemini",
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                provider: "gemini",
                status: status.as_u16(),
                body: body_text,
            });
        }

        Ok(Box::pin(decode_stream(resp.bytes_stream())))
    }
}

/// Convert canonical tool schemas to Gemini function declarations.
fn to_gemini_tools(tools: &[serde_json::Value]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|t| {
            serde_json::json!({
                "name": t["name"],
                "description": t["description"],
                "parameters": t["parameters"],
            })
        })
        .collect()
}

/// Synthesized tool-call id for Gemini, which has no ids on the wire.
fn synthetic_call_id(name: &str, ordinal: usize) -> String {
    format!("gemini_{name}_{ordinal}")
}

/// Parse `functionCall` parts from a Gemini parts array.
fn parse_function_calls(parts: &[serde_json::Value]) -> Vec<ToolCall> {
    parts
        .iter()
        .filter_map(|p| p.get("functionCall"))
        .enumerate()
        .map(|(i, fc)| {
            let name = fc["name"].as_str().unwrap_or("").to_string();
            ToolCall {
                id: synthetic_call_id(&name, i),
                name,
                arguments: fc["args"].clone(),
            }
        })
        .collect()
}

/// Convert internal messages to Gemini contents.
///
/// Returns `(system_text, contents)`. Tool results need the function name,
/// which Gemini keys responses by; it is recovered from the assistant tool
/// call with the matching id.
fn to_gemini_contents(messages: &[ChatMessage]) -> (Option<String>, Vec<serde_json::Value>) {
    let mut system_text: Option<String> = None;
    let mut out = Vec::new();

    // tool_call_id → function name, for functionResponse parts.
    let mut call_names: HashMap<&str, &str> = HashMap::new();
    for msg in messages {
        if let ChatMessage::Assistant { tool_calls, .. } = msg {
            for tc in tool_calls {
                call_names.insert(tc.id.as_str(), tc.name.as_str());
            }
        }
    }

    for msg in messages {
        match msg {
            ChatMessage::System { content } => {
                system_text = Some(match system_text {
                    Some(existing) => format!("{existing}\n\n{content}"),
                    None => content.clone(),
                });
            },
            ChatMessage::User { content } => {
                let parts: Vec<serde_json::Value> = match content {
                    UserContent::Text(text) => vec![serde_json::json!({"text": text})],
                    UserContent::Blocks(blocks) => blocks
                        .iter()
                        .map(|b| match b {
                            ContentBlock::Text { text } => serde_json::json!({"text": text}),
                            ContentBlock::ImageUrl { url } => inline_data_part(url),
                        })
                        .collect(),
                };
                out.push(serde_json::json!({"role": "user", "parts": parts}));
            },
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                let mut parts = Vec::new();
                if let Some(text) = content
                    && !text.is_empty()
                {
                    parts.push(serde_json::json!({"text": text}));
                }
                for tc in tool_calls {
                    parts.push(serde_json::json!({
                        "functionCall": { "name": tc.name, "args": tc.arguments }
                    }));
                }
                if parts.is_empty() {
                    parts.push(serde_json::json!({"text": ""}));
                }
                out.push(serde_json::json!({"role": "model", "parts": parts}));
            },
            ChatMessage::Tool {
                tool_call_id,
                content,
            } => {
                let name = call_names
                    .get(tool_call_id.as_str())
                    .copied()
                    .unwrap_or("tool");
                out.push(serde_json::json!({
                    "role": "user",
                    "parts": [{
                        "functionResponse": {
                            "name": name,
                            "response": { "content": content },
                        }
                    }]
                }));
            },
        }
    }

    (system_text, out)
}

/// Convert an image URL to an `inlineData` part. Only `data:` URIs carry
/// bytes inline; plain URLs are referenced as file data.
fn inline_data_part(url: &str) -> serde_json::Value {
    if let Some(rest) = url.strip_prefix("data:")
        && let Some((mime_type, data)) = rest.split_once(";base64,")
    {
        return serde_json::json!({
            "inlineData": { "mimeType": mime_type, "data": data }
        });
    }
    serde_json::json!({
        "fileData": { "fileUri": url }
    })
}

/// Decode a Gemini SSE byte stream into canonical events. Function calls
/// arrive whole in a single chunk, so each one yields a start/arguments/
/// complete triple immediately.
fn decode_stream(
    byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = StreamEvent> + Send {
    async_stream::stream! {
        let mut byte_stream = std::pin::pin!(byte_stream);
        let mut buf = String::new();
        let mut usage = Usage::default();
        let mut next_call_index: usize = 0;

        while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield StreamEvent::Error(e.to_string());
                    return;
                }
            };
            buf.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buf.find('\n') {
                let line = buf[..pos].trim().to_string();
                buf = buf[pos + 1..].to_string();

                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                let Ok(evt) = serde_json::from_str::<serde_json::Value>(data) else {
                    continue;
                };

                if let Some(meta) = evt.get("usageMetadata") {
                    if let Some(v) = meta["promptTokenCount"].as_u64() {
                        usage.input_tokens = v as u32;
                    }
                    if let Some(v) = meta["candidatesTokenCount"].as_u64() {
                        usage.output_tokens = v as u32;
                    }
                }

                if let Some(parts) = evt["candidates"][0]["content"]["parts"].as_array() {
                    for part in parts {
                        if let Some(text) = part["text"].as_str()
                            && !text.is_empty()
                        {
                            yield StreamEvent::Delta(text.to_string());
                        }
                        if let Some(fc) = part.get("functionCall") {
                            let name = fc["name"].as_str().unwrap_or("").to_string();
                            let index = next_call_index;
                            next_call_index += 1;
                            yield StreamEvent::ToolCallStart {
                                id: synthetic_call_id(&name, index),
                                name,
                                index,
                            };
                            yield StreamEvent::ToolCallArgumentsDelta {
                                index,
                                delta: fc["args"].to_string(),
                            };
                            yield StreamEvent::ToolCallComplete { index };
                        }
                    }
                }
            }
        }

        yield StreamEvent::Done(usage);
    }
}
