//! Streaming response assembly for Cortex agent chats.
//!
//! Bytes from the agent's `text/event-stream` response flow through
//! [`sse`] (framing), [`interpret`] (typed events) and [`builder`] (the
//! in-progress assistant message) into the published [`Conversation`]
//! and [`ActivityState`], driven turn by turn by [`ChatSession`].

pub mod activity;
pub mod builder;
pub mod conversation;
pub mod correlate;
pub mod error;
pub mod interpret;
pub mod message;
pub mod orchestrator;
pub mod payload;
pub mod request;
pub mod sse;
pub mod stream;
pub mod table;
pub mod transport;

pub use activity::ActivityState;
pub use builder::{ApplyOutcome, Derived, MessageBuilder};
pub use conversation::Conversation;
pub use correlate::{IdThenNameCorrelator, ToolCorrelator};
pub use error::{TransportError, TurnError};
pub use message::{ChartSpec, Citation, ContentBlock, Message, MessageId, Role, ToolResults, ToolUse};
pub use orchestrator::{ChatSession, TurnReport, TurnStatus, TurnSummary};
pub use request::{AgentRequest, RequestTemplate};
pub use sse::{SseDecoder, SseFrame};
pub use stream::{AgentEvent, AgentStatus, ServerError};
pub use transport::{AgentTransport, HttpAgentTransport};
