//! Classification of raw SSE frames into [`AgentEvent`]s.
//!
//! Decoding never fails past this boundary: a frame that cannot be decoded
//! becomes [`AgentEvent::Unrecognized`] and is logged.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{trace, warn};

use crate::message::{ToolResults, ToolUse};
use crate::sse::SseFrame;
use crate::stream::{AgentEvent, AgentStatus, ServerError};

pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Deserialize)]
struct TextDeltaPayload {
    text: String,
}

#[derive(Deserialize)]
struct ToolUsePayload {
    #[serde(default)]
    tool_use_id: Option<String>,
    name: String,
    #[serde(default)]
    input: Value,
}

/// Tool payloads arrive either flat or wrapped in their content-item key.
#[derive(Deserialize)]
#[serde(untagged)]
enum ToolUseEnvelope {
    Nested { tool_use: ToolUsePayload },
    Flat(ToolUsePayload),
}

#[derive(Deserialize)]
struct ToolResultPayload {
    #[serde(default)]
    tool_use_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    content: OneOrMany,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ToolResultEnvelope {
    Nested { tool_results: ToolResultPayload },
    Flat(ToolResultPayload),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Value>),
    One(Value),
}

#[derive(Deserialize)]
struct ChartPayload {
    chart_spec: Value,
}

#[derive(Deserialize)]
struct StatusPayload {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Interpret one SSE frame. Most frames yield exactly one event; a bare
/// `message.delta` frame yields one event per content item.
pub fn interpret(frame: &SseFrame) -> Vec<AgentEvent> {
    let event = frame.event.as_deref().filter(|e| !e.is_empty());
    let data = frame.data.as_deref().unwrap_or("");

    if data.trim() == DONE_SENTINEL {
        return vec![AgentEvent::Done];
    }

    trace!(event = event.unwrap_or("(none)"), len = data.len(), "interpreting SSE frame");

    match event {
        Some("response.text.delta") => {
            one(decode::<TextDeltaPayload>("response.text.delta", data).map(|p| {
                AgentEvent::TextDelta { text: p.text }
            }))
        }
        Some("response.tool_use") => one(
            decode::<ToolUseEnvelope>("response.tool_use", data).map(tool_use_event),
        ),
        Some("response.tool_result") => one(
            decode::<ToolResultEnvelope>("response.tool_result", data).map(tool_result_event),
        ),
        Some("response.chart") => {
            one(decode::<ChartPayload>("response.chart", data).and_then(|p| chart_event(p.chart_spec)))
        }
        Some("response.status") => {
            one(decode::<StatusPayload>("response.status", data).map(|p| {
                AgentEvent::StatusChanged {
                    status: AgentStatus::from_wire(&p.status),
                    message: p.message,
                }
            }))
        }
        Some("response") => vec![AgentEvent::ResponseCompleted],
        Some("error") | Some("response.error") => {
            vec![AgentEvent::ServerError(server_error_from_data(data))]
        }
        // "message" is the implicit SSE event type.
        None | Some("message") => interpret_bare(data),
        Some(other) => {
            warn!(event = other, "ignoring unknown SSE event");
            vec![AgentEvent::Unrecognized {
                event: Some(other.to_string()),
                reason: "unknown event name".to_string(),
            }]
        }
    }
}

fn one(result: Result<AgentEvent, AgentEvent>) -> Vec<AgentEvent> {
    vec![result.unwrap_or_else(|fallback| fallback)]
}

/// Decode a named content event's payload. On failure the error side carries
/// an `Unrecognized` replacement; only the `error` event names end a turn.
fn decode<T: DeserializeOwned>(event: &str, data: &str) -> Result<T, AgentEvent> {
    serde_json::from_str::<T>(data).map_err(|e| {
        warn!(event, error = %e, "failed to parse event payload");
        AgentEvent::Unrecognized {
            event: Some(event.to_string()),
            reason: e.to_string(),
        }
    })
}

fn tool_use_event(envelope: ToolUseEnvelope) -> AgentEvent {
    let payload = match envelope {
        ToolUseEnvelope::Nested { tool_use } => tool_use,
        ToolUseEnvelope::Flat(payload) => payload,
    };
    AgentEvent::ToolUseAnnounced(ToolUse {
        tool_use_id: payload.tool_use_id,
        name: payload.name,
        input: payload.input,
    })
}

fn tool_result_event(envelope: ToolResultEnvelope) -> AgentEvent {
    let payload = match envelope {
        ToolResultEnvelope::Nested { tool_results } => tool_results,
        ToolResultEnvelope::Flat(payload) => payload,
    };
    let content = match payload.content {
        OneOrMany::Many(items) => items,
        OneOrMany::One(Value::Null) => Vec::new(),
        OneOrMany::One(item) => vec![item],
    };
    // Older payloads name the tool on the content items only.
    let name = payload
        .name
        .or_else(|| {
            content
                .iter()
                .find_map(|item| item.get("name").and_then(Value::as_str).map(String::from))
        })
        .unwrap_or_default();
    AgentEvent::ToolResult(ToolResults {
        tool_use_id: payload.tool_use_id,
        name,
        content,
        correlated_use: None,
    })
}

fn chart_event(spec: Value) -> Result<AgentEvent, AgentEvent> {
    let chart_spec = match spec {
        Value::String(s) => s,
        obj @ Value::Object(_) => obj.to_string(),
        other => {
            warn!(kind = ?other, "chart_spec is neither a string nor an object");
            return Err(AgentEvent::Unrecognized {
                event: Some("response.chart".to_string()),
                reason: "chart_spec has unexpected type".to_string(),
            });
        }
    };
    Ok(AgentEvent::ChartAnnounced { chart_spec })
}

/// Frames without an event name: the `message.delta` protocol variant, or a
/// bare error object.
fn interpret_bare(data: &str) -> Vec<AgentEvent> {
    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "failed to parse bare SSE data frame");
            return vec![AgentEvent::Unrecognized {
                event: None,
                reason: e.to_string(),
            }];
        }
    };

    if let Some(items) = value.pointer("/delta/content").and_then(Value::as_array) {
        return items.iter().map(interpret_content_item).collect();
    }

    if let Some(err) = error_from_value(&value) {
        return vec![AgentEvent::ServerError(err)];
    }

    warn!("bare data frame has no recognizable shape");
    vec![AgentEvent::Unrecognized {
        event: None,
        reason: "bare data frame without known shape".to_string(),
    }]
}

fn interpret_content_item(item: &Value) -> AgentEvent {
    let result = match item.get("type").and_then(Value::as_str) {
        Some("text") => match item.get("text").and_then(Value::as_str) {
            Some(text) => Ok(AgentEvent::TextDelta {
                text: text.to_string(),
            }),
            None => Err("text item without text".to_string()),
        },
        Some("tool_use") => ToolUseEnvelope::deserialize(item)
            .map(tool_use_event)
            .map_err(|e| e.to_string()),
        Some("tool_results") => ToolResultEnvelope::deserialize(item)
            .map(tool_result_event)
            .map_err(|e| e.to_string()),
        Some("chart") => match item.pointer("/chart/chart_spec") {
            Some(spec) => chart_event(spec.clone()).map_err(|_| "invalid chart item".to_string()),
            None => Err("chart item without chart_spec".to_string()),
        },
        Some(other) => Err(format!("unknown content item type '{}'", other)),
        None => Err("content item without type".to_string()),
    };

    result.unwrap_or_else(|reason| {
        warn!(reason = %reason, "skipping message.delta content item");
        AgentEvent::Unrecognized {
            event: None,
            reason,
        }
    })
}

/// Extract `code`/`message` from an error object, top level or under `error`.
fn error_from_value(value: &Value) -> Option<ServerError> {
    let obj = value.as_object()?;
    let source = match obj.get("error") {
        Some(inner @ Value::Object(_)) => inner,
        _ => value,
    };

    let code = source.get("code").and_then(|c| match c {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    let message = source.get("message").and_then(Value::as_str).map(String::from);

    match (code, message) {
        (None, None) => None,
        (code, Some(message)) => Some(ServerError { code, message }),
        (Some(code), None) => Some(ServerError {
            message: format!("error code {}", code),
            code: Some(code),
        }),
    }
}

fn server_error_from_data(data: &str) -> ServerError {
    serde_json::from_str::<Value>(data)
        .ok()
        .and_then(|v| error_from_value(&v))
        .unwrap_or_else(|| ServerError {
            code: None,
            message: if data.is_empty() {
                "unknown error".to_string()
            } else {
                data.to_string()
            },
        })
}
