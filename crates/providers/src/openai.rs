//! OpenAI chat-completions dialect. Also serves the local daemon, which
//! speaks the same wire format without authentication.

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

/// Upstream call timeout for buffered completions.
const CALL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

pub struct OpenAiProvider {
    api_key: Option<secrecy::Secret<String>>,
    model: String,
    base_url: String,
    provider_name: &'static str,
    client: reqwest::Client,
    stream_client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(api_key: secrecy::Secret<String>, model: String, base_url: String) -> Self {
        Self::build(Some(api_key), model, base_url, "openai")
    }

    /// The local inference daemon: same dialect, no key.
    pub fn local(model: String, base_url: String) -> Self {
        Self::build(None, model, base_url, "local")
    }

    fn build(
        api_key: Option<secrecy::Secret<String>>,
        model: String,
        base_url: String,
        provider_name: &'static str,
    ) -> Self {
        Self {
            api_key,
            model,
            base_url,
            provider_name,
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

    pub fn name(&self) -> &'static str {
        self.provider_name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, req: &ChatRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": resolve_model(&req.model, &self.model),
            "messages": to_wire_messages(&req.messages),
        });
        if !req.tools.is_empty() {
            body["tools"] = serde_json::Value::Array(to_openai_tools(&req.tools));
        }
        if let Some(t) = req.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(m) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(m);
        }
        if let Some(ref choice) = req.tool_choice {
            body["tool_choice"] = choice.clone();
        }
        if stream {
            body["stream"] = serde_json::json!(true);
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        body
    }

    fn post(&self, client: &reqwest::Client, body: &serde_json::Value) -> reqwest::RequestBuilder {
        let mut builder = client
            .post(format!("{}/chat/completions", self.base_url))
            .header("content-type", "application/json")
            .json(body);
        if let Some(ref key) = self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key.expose_secret()));
        }
        builder
    }

    pub async fn complete(&self, req: &ChatRequest) -> Result<CompletionResponse, ProviderError> {
        let body = self.request_body(req, false);
        debug!(
            provider = self.provider_name,
            model = %self.model,
            messages_count = req.messages.len(),
            tools_count = req.tools.len(),
            "openai-dialect complete request"
        );
        trace!(body = %body, "request body");

        let http_resp = self
            .post(&self.client, &body)
            .send()
            .await
            .map_err(|source| ProviderError::Network {
                provider: self.provider_name,
                source,
            })?;

        let status = http_resp.status();
        if !status.is_success() {
            let body_text = http_resp.text().await.unwrap_or_default();
            warn!(provider = self.provider_name, status = %status, body = %body_text, "upstream error");
            return Err(ProviderError::Status {
                provider: self.provider_name,
                status: status.as_u16(),
                body: body_text,
            });
        }

        let resp: serde_json::Value =
            http_resp
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    provider: self.provider_name,
                    message: e.to_string(),
                })?;
        trace!(response = %resp, "raw response");

        let message = &resp["choices"][0]["message"];
        Ok(CompletionResponse {
            text: message["content"].as_str().map(|s| s.to_string()),
            tool_calls: parse_tool_calls(message),
            usage: Usage {
                input_tokens: resp["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: resp["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
            },
        })
    }

    /// Open a streaming completion. Connection and status errors surface as
    /// `Err` so the chain can fail over before any frame is written.
    pub async fn stream(
        &self,
        req: &ChatRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, ProviderError> {
        let body = self.request_body(req, true);
        debug!(
            provider = self.provider_name,
            model = %self.model,
            messages_count = req.messages.len(),
            "openai-dialect stream request"
        );

        let resp = self
            .post(&self.stream_client, &body)
            .send()
            .await
            .map_err(|source| ProviderError::Network {
                provider: self.provider_name,
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                provider: self.provider_name,
                status: status.as_u16(),
                body: body_text,
            });
        }

        Ok(Box::pin(decode_stream(resp.bytes_stream())))
    }
}

/// Fall back to the provider's configured model when the client asked for
/// auto-routing.
fn resolve_model<'a>(requested: &'a str, configured: &'a str) -> &'a str {
    if requested.is_empty() || requested == "auto" {
        configured
    } else {
        requested
    }
}

/// Convert canonical tool schemas to OpenAI function-calling format.
pub fn to_openai_tools(tools: &[serde_json::Value]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|t| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": t["name"],
                    "description": t["description"],
                    "parameters": t["parameters"],
                }
            })
        })
        .collect()
}

/// Internal messages → OpenAI wire messages.
pub fn to_wire_messages(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|msg| match msg {
            ChatMessage::System { content } => {
                serde_json::json!({"role": "system", "content": content})
            },
            ChatMessage::User { content } => match content {
                UserContent::Text(text) => serde_json::json!({"role": "user", "content": text}),
                UserContent::Blocks(blocks) => {
                    let parts: Vec<serde_json::Value> = blocks
                        .iter()
                        .map(|b| match b {
                            ContentBlock::Text { text } => {
                                serde_json::json!({"type": "text", "text": text})
                            },
                            ContentBlock::ImageUrl { url } => {
                                serde_json::json!({"type": "image_url", "image_url": {"url": url}})
                            },
                        })
                        .collect();
                    serde_json::json!({"role": "user", "content": parts})
                },
            },
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                let mut wire = serde_json::json!({"role": "assistant"});
                if let Some(text) = content {
                    wire["content"] = serde_json::Value::String(text.clone());
                }
                if !tool_calls.is_empty() {
                    let calls: Vec<serde_json::Value> = tool_calls
                        .iter()
                        .map(|tc| {
                            serde_json::json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": tc.arguments.to_string(),
                                }
                            })
                        })
                        .collect();
                    wire["tool_calls"] = serde_json::Value::Array(calls);
                }
                wire
            },
            ChatMessage::Tool {
                tool_call_id,
                content,
            } => serde_json::json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "content": content,
            }),
        })
        .collect()
}

/// OpenAI wire messages → internal messages. Unknown roles are skipped.
pub fn from_wire_messages(values: &[serde_json::Value]) -> Vec<ChatMessage> {
    values
        .iter()
        .filter_map(|m| {
            let role = m["role"].as_str()?;
            match role {
                "system" => Some(ChatMessage::System {
                    content: m["content"].as_str().unwrap_or_default().to_string(),
                }),
                "user" => Some(ChatMessage::User {
                    content: parse_user_content(&m["content"]),
                }),
                "assistant" => Some(ChatMessage::Assistant {
                    content: m["content"].as_str().map(|s| s.to_string()),
                    tool_calls: parse_tool_calls(m),
                }),
                "tool" => Some(ChatMessage::Tool {
                    tool_call_id: m["tool_call_id"].as_str().unwrap_or_default().to_string(),
                    content: m["content"].as_str().unwrap_or_default().to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

fn parse_user_content(content: &serde_json::Value) -> UserContent {
    match content {
        serde_json::Value::Array(parts) => {
            let blocks = parts
                .iter()
                .filter_map(|p| match p["type"].as_str() {
                    Some("text") => Some(ContentBlock::Text {
                        text: p["text"].as_str().unwrap_or_default().to_string(),
                    }),
                    Some("image_url") => Some(ContentBlock::ImageUrl {
                        url: p["image_url"]["url"].as_str().unwrap_or_default().to_string(),
                    }),
                    _ => None,
                })
                .collect();
            UserContent::Blocks(blocks)
        },
        other => UserContent::Text(other.as_str().unwrap_or_default().to_string()),
    }
}

/// Parse `tool_calls` from an OpenAI message object.
pub fn parse_tool_calls(message: &serde_json::Value) -> Vec<ToolCall> {
    message["tool_calls"]
        .as_array()
        .map(|tcs| {
            tcs.iter()
                .filter_map(|tc| {
                    let id = tc["id"].as_str()?.to_string();
                    let name = tc["function"]["name"].as_str()?.to_string();
                    let args_str = tc["function"]["arguments"].as_str().unwrap_or("{}");
                    let arguments =
                        serde_json::from_str(args_str).unwrap_or(serde_json::json!({}));
                    Some(ToolCall {
                        id,
                        name,
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Decode an OpenAI-dialect SSE byte stream into canonical events.
fn decode_stream(
    byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = StreamEvent> + Send {
    async_stream::stream! {
        let mut byte_stream = std::pin::pin!(byte_stream);
        let mut buf = String::new();
        let mut usage = Usage::default();
        // Tool-call indexes that have started but not completed.
        let mut open_calls: Vec<usize> = Vec::new();

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

                if line.is_empty() {
                    continue;
                }
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };

                if data == "[DONE]" {
                    for index in open_calls.drain(..) {
                        yield StreamEvent::ToolCallComplete { index };
                    }
                    yield StreamEvent::Done(usage);
                    return;
                }

                let Ok(evt) = serde_json::from_str::<serde_json::Value>(data) else {
                    continue;
                };

                if let Some(u) = evt.get("usage").filter(|u| !u.is_null()) {
                    usage.input_tokens = u["prompt_tokens"].as_u64().unwrap_or(0) as u32;
                    usage.output_tokens = u["completion_tokens"].as_u64().unwrap_or(0) as u32;
                }

                let choice = &evt["choices"][0];
                let delta = &choice["delta"];

                if let Some(text) = delta["content"].as_str()
                    && !text.is_empty()
                {
                    yield StreamEvent::Delta(text.to_string());
                }

                if let Some(calls) = delta["tool_calls"].as_array() {
                    for tc in calls {
                        let index = tc["index"].as_u64().unwrap_or(0) as usize;
                        let name = tc["function"]["name"].as_str();
                        if let (Some(id), Some(name)) = (tc["id"].as_str(), name) {
                            open_calls.push(index);
                            yield StreamEvent::ToolCallStart {
                                id: id.to_string(),
                                name: name.to_string(),
                                index,
                            };
                        }
                        if let Some(args) = tc["function"]["arguments"].as_str()
                            && !args.is_empty()
                        {
                            yield StreamEvent::ToolCallArgumentsDelta {
                                index,
                                delta: args.to_string(),
                            };
                        }
                    }
                }

                if choice["finish_reason"].as_str().is_some() {
                    for index in open_calls.drain(..) {
                        yield StreamEvent::ToolCallComplete { index };
                    }
                }
            }
        }

        // Upstream closed without a [DONE] marker.
        for index in open_calls.drain(..) {
            yield StreamEvent::ToolCallComplete { index };
        }
        yield StreamEvent::Done(usage);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::model::ToolCallAssembler};

    fn sample_messages() -> Vec<ChatMessage> {
        vec![
            ChatMessage::system("You are a helpful gateway."),
            ChatMessage::user("What's in ~/notes.txt?"),
            ChatMessage::Assistant {
                content: Some("Let me check.".into()),
                tool_calls: vec![ToolCall {
                    id: "call_1".into(),
                    name: "read_file".into(),
                    arguments: serde_json::json!({"path": "~/notes.txt"}),
                }],
            },
            ChatMessage::tool_result("call_1", "milk, eggs"),
            ChatMessage::assistant("Your notes say: milk, eggs."),
        ]
    }

    #[test]
    fn wire_round_trip_preserves_messages() {
        let original = sample_messages();
        let wire = to_wire_messages(&original);
        let back = from_wire_messages(&wire);
        assert_eq!(back, original);
    }

    #[test]
    fn wire_round_trip_preserves_vision_blocks() {
        let original = vec![ChatMessage::User {
            content: UserContent::Blocks(vec![
                ContentBlock::Text {
                    text: "what is this?".into(),
                },
                ContentBlock::ImageUrl {
                    url: "data:image/png;base64,AAAA".into(),
                },
            ]),
        }];
        let wire = to_wire_messages(&original);
        let back = from_wire_messages(&wire);
        assert_eq!(back, original);
    }

    #[test]
    fn tool_schemas_become_function_declarations() {
        let tools = vec![serde_json::json!({
            "name": "web_search",
            "description": "Search the web",
            "parameters": {"type": "object", "properties": {"query": {"type": "string"}}},
        })];
        let wire = to_openai_tools(&tools);
        assert_eq!(wire[0]["type"], "function");
        assert_eq!(wire[0]["function"]["name"], "web_search");
        assert_eq!(
            wire[0]["function"]["parameters"]["properties"]["query"]["type"],
            "string"
        );
    }

    #[tokio::test]
    async fn complete_parses_text_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "choices": [{"message": {"role": "assistant", "content": "Hello!"}}],
                    "usage": {"prompt_tokens": 12, "completion_tokens": 4},
                })
                .to_string(),
            )
            .create_async()
            .await;

        let provider = OpenAiProvider::new(
            secrecy::Secret::new("sk-test".into()),
            "gpt-4o".into(),
            server.url(),
        );
        let req = ChatRequest {
            model: "gpt-4o".into(),
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        };

        let resp = provider.complete(&req).await.unwrap();
        assert_eq!(resp.text.as_deref(), Some("Hello!"));
        assert!(resp.tool_calls.is_empty());
        assert_eq!(resp.usage.input_tokens, 12);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn complete_parses_tool_calls() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "choices": [{"message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_9",
                            "type": "function",
                            "function": {"name": "web_search", "arguments": "{\"query\":\"rust\"}"},
                        }],
                    }}],
                    "usage": {"prompt_tokens": 20, "completion_tokens": 8},
                })
                .to_string(),
            )
            .create_async()
            .await;

        let provider = OpenAiProvider::local("llama3".into(), server.url());
        let req = ChatRequest {
            model: "auto".into(),
            messages: vec![ChatMessage::user("search rust")],
            ..Default::default()
        };

        let resp = provider.complete(&req).await.unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "web_search");
        assert_eq!(resp.tool_calls[0].arguments["query"], "rust");
    }

    #[tokio::test]
    async fn complete_maps_upstream_error_to_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("upstream exploded")
            .create_async()
            .await;

        let provider = OpenAiProvider::local("llama3".into(), server.url());
        let req = ChatRequest {
            model: "auto".into(),
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        };

        let err = provider.complete(&req).await.unwrap_err();
        assert!(matches!(err, ProviderError::Status { status: 500, .. }));
        assert!(err.retryable());
    }

    #[tokio::test]
    async fn stream_decodes_text_and_tool_calls() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Hi\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"read_file\",\"arguments\":\"\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"path\\\":\\\"a\\\"}\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":7}}\n\n",
            "data: [DONE]\n\n",
        );

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let provider = OpenAiProvider::local("llama3".into(), server.url());
        let req = ChatRequest {
            model: "auto".into(),
            messages: vec![ChatMessage::user("hi")],
            stream: true,
            ..Default::default()
        };

        let mut stream = provider.stream(&req).await.unwrap();
        let mut text = String::new();
        let mut assembler = ToolCallAssembler::new();
        let mut usage = Usage::default();
        while let Some(event) = stream.next().await {
            if assembler.observe(&event) {
                continue;
            }
            match event {
                StreamEvent::Delta(d) => text.push_str(&d),
                StreamEvent::Done(u) => usage = u,
                StreamEvent::Error(e) => panic!("unexpected stream error: {e}"),
                _ => {},
            }
        }

        assert_eq!(text, "Hi there");
        let calls = assembler.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].arguments["path"], "a");
        assert_eq!(usage.output_tokens, 7);
    }

    #[tokio::test]
    async fn stream_surfaces_connect_error_before_any_frame() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let provider = OpenAiProvider::local("llama3".into(), server.url());
        let req = ChatRequest {
            model: "auto".into(),
            messages: vec![ChatMessage::user("hi")],
            stream: true,
            ..Default::default()
        };

        let err = match provider.stream(&req).await {
            Ok(_) => panic!("expected error"),
            Err(err) => err,
        };
        assert!(matches!(err, ProviderError::Status { status: 503, .. }));
    }
}
