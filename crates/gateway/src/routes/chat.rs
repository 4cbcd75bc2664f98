//! `POST /v1/chat/completions`: OpenAI-compatible chat with the agentic
//! tool loop, buffered or streamed.
//!
//! The loop calls a provider, intercepts any tool calls, executes them
//! server-side under access enforcement, appends the results, and resumes
//! — bounded at eight tool rounds. The streaming path runs the same loop
//! while writing every round's frames onto one connection.

use std::net::SocketAddr;

use {
    axum::{
        extract::{ConnectInfo, State},
        http::HeaderMap,
        response::{
            IntoResponse, Json, Response,
            sse::{Event, KeepAlive, Sse},
        },
    },
    futures::StreamExt,
    tracing::{debug, info, warn},
};

use {
    torbo_common::AccessLevel,
    torbo_config::AgentConfig,
    torbo_policy::{AuditEntry, effective_level},
    torbo_providers::{
        ChatMessage, ChatRequest, FailoverOutcome, StreamEvent, ToolCall, ToolCallAssembler,
        Usage, openai::from_wire_messages,
    },
    torbo_tools::visible_tools,
};

use crate::{error::ApiError, routes::resolve_agent, state::AppState};

/// Hard bound on provider-call → tool-execute cycles.
const MAX_TOOL_ROUNDS: usize = 8;

/// How long a request may queue for a provider permit before `503`.
const PERMIT_WAIT: std::time::Duration = std::time::Duration::from_secs(5);

/// Provider override header; beats model-name prefix selection.
const PROVIDER_HEADER: &str = "x-torbo-provider";

pub async fn chat_completions(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let cfg = state.config_snapshot().await;
    let agent = resolve_agent(&cfg, &headers);
    let effective = effective_level(cfg.gateway.access_level, agent.access_level);

    let Some(messages_json) = body["messages"].as_array() else {
        return Err(ApiError::BadRequest("messages is required".into()));
    };
    let messages = from_wire_messages(messages_json);
    if messages.is_empty() {
        return Err(ApiError::BadRequest("messages is empty".into()));
    }

    let stream = body["stream"].as_bool().unwrap_or(false);
    let req = ChatRequest {
        model: body["model"].as_str().unwrap_or("auto").to_string(),
        messages,
        tools: visible_tools(effective, &agent, &cfg.tools),
        stream,
        temperature: body["temperature"].as_f64(),
        max_tokens: body["max_tokens"].as_u64().map(|v| v as u32),
        tool_choice: body.get("tool_choice").filter(|v| !v.is_null()).cloned(),
    };
    let override_name = headers
        .get(PROVIDER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    debug!(
        agent = %agent.id,
        effective = %effective,
        model = %req.model,
        stream,
        tools = req.tools.len(),
        "chat completion request"
    );

    // Concurrency cap: queue briefly, then shed load.
    let permit = match tokio::time::timeout(
        PERMIT_WAIT,
        state.provider_permits.clone().acquire_owned(),
    )
    .await
    {
        Ok(Ok(permit)) => permit,
        _ => return Err(ApiError::Overloaded),
    };

    if stream {
        Ok(stream_completion(state, addr, agent, effective, req, override_name, permit).await)
    } else {
        buffered_completion(state, addr, agent, effective, req, override_name, permit).await
    }
}

fn record_failover(state: &AppState, addr: &SocketAddr, outcome: &FailoverOutcome) {
    if let Some(detail) = outcome.detail() {
        info!(%detail, "provider failover");
        state.audit.record(
            AuditEntry::new(
                addr.ip().to_string(),
                "POST",
                "/v1/chat/completions",
                AccessLevel::Chat,
                true,
            )
            .with_detail(detail),
        );
    }
}

// ── Buffered path ───────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
async fn buffered_completion(
    state: AppState,
    addr: SocketAddr,
    agent: AgentConfig,
    effective: AccessLevel,
    mut req: ChatRequest,
    override_name: Option<String>,
    _permit: tokio::sync::OwnedSemaphorePermit,
) -> Result<Response, ApiError> {
    let chain = state.chain_snapshot().await;
    let executor = state.tool_executor().await;
    let model = req.model.clone();

    let mut rounds = 0usize;
    let mut usage = Usage::default();
    let mut last_text: Option<String> = None;

    loop {
        let (resp, outcome) = chain.complete(&req, override_name.as_deref()).await?;
        record_failover(&state, &addr, &outcome);
        usage.input_tokens = usage.input_tokens.saturating_add(resp.usage.input_tokens);
        usage.output_tokens = usage.output_tokens.saturating_add(resp.usage.output_tokens);

        if resp.tool_calls.is_empty() {
            return Ok(Json(completion_body(&model, resp.text, usage, false)).into_response());
        }

        if rounds >= MAX_TOOL_ROUNDS {
            warn!(rounds, "tool loop bound hit, returning last text");
            let text = resp.text.or(last_text);
            return Ok(Json(completion_body(&model, text, usage, true)).into_response());
        }
        rounds += 1;

        if resp.text.is_some() {
            last_text = resp.text.clone();
        }
        append_round(
            &mut req.messages,
            resp.text,
            resp.tool_calls,
            &executor,
            &agent,
            effective,
        )
        .await;
    }
}

/// Append one round: the assistant message carrying its tool calls, then a
/// tool-result message per call.
async fn append_round(
    messages: &mut Vec<ChatMessage>,
    text: Option<String>,
    tool_calls: Vec<ToolCall>,
    executor: &torbo_tools::ToolExecutor,
    agent: &AgentConfig,
    effective: AccessLevel,
) {
    messages.push(ChatMessage::Assistant {
        content: text,
        tool_calls: tool_calls.clone(),
    });
    for call in &tool_calls {
        let result = executor.execute(call, agent, effective).await;
        messages.push(result);
    }
}

fn completion_body(
    model: &str,
    text: Option<String>,
    usage: Usage,
    truncated: bool,
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text.unwrap_or_default() },
            "finish_reason": "stop",
        }],
        "usage": {
            "prompt_tokens": usage.input_tokens,
            "completion_tokens": usage.output_tokens,
            "total_tokens": usage.input_tokens + usage.output_tokens,
        },
    });
    if truncated {
        body["toolLoopTruncated"] = serde_json::json!(true);
    }
    body
}

// ── Streaming path ──────────────────────────────────────────────────────────

fn chunk_body(
    id: &str,
    created: i64,
    model: &str,
    delta: serde_json::Value,
    finish_reason: Option<&str>,
) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    })
}

/// The synthesized final chunk of a round: the completed tool calls, in
/// the OpenAI delta shape, so clients see why the stream pauses.
fn tool_calls_delta(calls: &[ToolCall]) -> serde_json::Value {
    let wire: Vec<serde_json::Value> = calls
        .iter()
        .enumerate()
        .map(|(index, call)| {
            serde_json::json!({
                "index": index,
                "id": call.id,
                "type": "function",
                "function": {
                    "name": call.name,
                    "arguments": call.arguments.to_string(),
                },
            })
        })
        .collect();
    serde_json::json!({ "tool_calls": wire })
}

#[allow(clippy::too_many_arguments)]
async fn stream_completion(
    state: AppState,
    addr: SocketAddr,
    agent: AgentConfig,
    effective: AccessLevel,
    req: ChatRequest,
    override_name: Option<String>,
    permit: tokio::sync::OwnedSemaphorePermit,
) -> Response {
    let chain = state.chain_snapshot().await;
    let executor = state.tool_executor().await;

    let id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
    let created = chrono::Utc::now().timestamp();
    let model = req.model.clone();

    let events = async_stream::stream! {
        // Held for the lifetime of the whole logical stream.
        let _permit = permit;
        let mut req = req;
        let mut rounds = 0usize;

        yield Event::default().data(
            chunk_body(&id, created, &model, serde_json::json!({"role": "assistant"}), None)
                .to_string(),
        );

        loop {
            let (mut upstream, outcome) =
                match chain.open_stream(&req, override_name.as_deref()).await {
                    Ok(opened) => opened,
                    Err(e) => {
                        warn!(error = %e, "stream open failed after failover");
                        yield Event::default().data(
                            serde_json::json!({
                                "error": e.to_string(),
                                "provider": e.provider(),
                                "retryable": e.retryable(),
                            })
                            .to_string(),
                        );
                        break;
                    },
                };
            record_failover(&state, &addr, &outcome);

            let mut assembler = ToolCallAssembler::new();
            let mut round_text = String::new();

            while let Some(event) = upstream.next().await {
                if assembler.observe(&event) {
                    continue;
                }
                match event {
                    StreamEvent::Delta(delta) => {
                        round_text.push_str(&delta);
                        yield Event::default().data(
                            chunk_body(
                                &id,
                                created,
                                &model,
                                serde_json::json!({"content": delta}),
                                None,
                            )
                            .to_string(),
                        );
                    },
                    StreamEvent::Done(_) => break,
                    StreamEvent::Error(e) => {
                        warn!(error = %e, "upstream errored mid-stream");
                        yield Event::default()
                            .data(serde_json::json!({ "error": e }).to_string());
                        break;
                    },
                    _ => {},
                }
            }

            if !assembler.has_calls() {
                yield Event::default().data(
                    chunk_body(&id, created, &model, serde_json::json!({}), Some("stop"))
                        .to_string(),
                );
                break;
            }

            let calls = assembler.finish();
            yield Event::default().data(
                chunk_body(
                    &id,
                    created,
                    &model,
                    tool_calls_delta(&calls),
                    Some("tool_calls"),
                )
                .to_string(),
            );

            if rounds >= MAX_TOOL_ROUNDS {
                warn!(rounds, "tool loop bound hit mid-stream");
                let mut last = chunk_body(&id, created, &model, serde_json::json!({}), Some("stop"));
                last["toolLoopTruncated"] = serde_json::json!(true);
                yield Event::default().data(last.to_string());
                break;
            }
            rounds += 1;

            append_round(
                &mut req.messages,
                (!round_text.is_empty()).then_some(round_text),
                calls,
                &executor,
                &agent,
                effective,
            )
            .await;
        }

        yield Event::default().data("[DONE]");
    };

    Sse::new(events.map(Ok::<Event, std::convert::Infallible>))
        .keep_alive(KeepAlive::default())
        .into_response()
}
