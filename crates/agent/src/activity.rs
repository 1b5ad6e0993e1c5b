//! The "what is the agent doing right now" indicator.

use std::fmt;

use crate::builder::{ApplyOutcome, Derived};
use crate::stream::{AgentEvent, AgentStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ActivityState {
    #[default]
    Idle,
    Loading,
    Streaming,
    ExecutingSql,
    RunningAnalytics,
}

impl ActivityState {
    pub fn is_idle(self) -> bool {
        self == ActivityState::Idle
    }

    /// Human-readable label for status lines.
    pub fn label(self) -> &'static str {
        match self {
            ActivityState::Idle => "idle",
            ActivityState::Loading => "thinking",
            ActivityState::Streaming => "answering",
            ActivityState::ExecutingSql => "executing SQL",
            ActivityState::RunningAnalytics => "running analytics",
        }
    }

    /// State after `event` was applied with the given builder outcome.
    /// Events that carry no activity signal keep the current state.
    pub fn next(self, event: &AgentEvent, outcome: &ApplyOutcome) -> Self {
        match event {
            AgentEvent::Done | AgentEvent::ServerError(_) => ActivityState::Idle,
            AgentEvent::TextDelta { .. } if outcome.changed => ActivityState::Streaming,
            AgentEvent::ToolResult(_) | AgentEvent::ChartAnnounced { .. } => {
                outcome.derived.iter().fold(self, |state, derived| match derived {
                    Derived::FetchedTable => ActivityState::ExecutingSql,
                    Derived::Chart => ActivityState::RunningAnalytics,
                    Derived::AnswerText | Derived::Citations(_) => state,
                })
            }
            AgentEvent::StatusChanged { status, .. } => match status {
                AgentStatus::ExecutingTools => ActivityState::ExecutingSql,
                AgentStatus::StreamingAnalystResults => ActivityState::RunningAnalytics,
                AgentStatus::ProceedingToAnswer => ActivityState::Streaming,
                AgentStatus::Other(_) => self,
            },
            AgentEvent::TextDelta { .. }
            | AgentEvent::ToolUseAnnounced(_)
            | AgentEvent::ResponseCompleted
            | AgentEvent::Unrecognized { .. } => self,
        }
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
