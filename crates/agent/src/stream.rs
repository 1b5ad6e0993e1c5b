use std::fmt;

use crate::message::{ToolResults, ToolUse};

/// Typed events decoded from the agent's SSE stream.
/// Protocol-agnostic: both the named-event and the `message.delta` variants
/// of the wire format are translated into these in [`crate::interpret`].
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// `[DONE]` sentinel; ends the turn.
    Done,
    /// The server reported an error; ends the turn.
    ServerError(ServerError),
    /// A chunk of answer text
    TextDelta { text: String },
    /// The agent invoked a tool
    ToolUseAnnounced(ToolUse),
    /// Outcome of a tool invocation
    ToolResult(ToolResults),
    /// Dedicated chart event (not nested in a tool result)
    ChartAnnounced { chart_spec: String },
    /// Progress hint for the activity indicator
    StatusChanged {
        status: AgentStatus,
        message: Option<String>,
    },
    /// Final aggregated `response` event. Everything in it has already
    /// arrived incrementally, so it is informational only.
    ResponseCompleted,
    /// Unknown event name or a payload that failed to decode.
    Unrecognized {
        event: Option<String>,
        reason: String,
    },
}

impl AgentEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Done | AgentEvent::ServerError(_))
    }
}

/// Error code and message carried by an `error` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: Option<String>,
    pub message: String,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentStatus {
    ExecutingTools,
    StreamingAnalystResults,
    ProceedingToAnswer,
    /// Any status string the client has no mapping for.
    Other(String),
}

impl AgentStatus {
    pub fn from_wire(status: &str) -> Self {
        match status {
            "executing_tools" => AgentStatus::ExecutingTools,
            "streaming_analyst_results" => AgentStatus::StreamingAnalystResults,
            "proceeding_to_answer" => AgentStatus::ProceedingToAnswer,
            other => AgentStatus::Other(other.to_string()),
        }
    }
}
