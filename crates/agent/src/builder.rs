//! Folding interpreted events into the in-progress assistant message.

use tracing::{debug, warn};

use crate::correlate::{IdThenNameCorrelator, ToolCorrelator};
use crate::message::{ChartSpec, ContentBlock, Message, MessageId, ToolResults, ToolUse};
use crate::payload::{self, PayloadShape};
use crate::stream::AgentEvent;
use crate::table;

/// Something derived from a tool result or chart event, in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derived {
    FetchedTable,
    Chart,
    AnswerText,
    /// Number of citations added.
    Citations(usize),
}

/// What a single apply call did to the message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub changed: bool,
    pub derived: Vec<Derived>,
}

impl ApplyOutcome {
    fn unchanged() -> Self {
        Self::default()
    }

    fn changed() -> Self {
        Self {
            changed: true,
            derived: Vec::new(),
        }
    }

    pub fn derived_table(&self) -> bool {
        self.derived.contains(&Derived::FetchedTable)
    }

    pub fn derived_chart(&self) -> bool {
        self.derived.contains(&Derived::Chart)
    }
}

/// Owns the assistant message for the duration of one turn.
///
/// Every operation is total: missing or empty input is logged and ignored.
/// [`MessageBuilder::finish`] consumes the builder, so a completed message
/// cannot be mutated further.
pub struct MessageBuilder {
    message: Message,
    correlator: Box<dyn ToolCorrelator>,
}

impl MessageBuilder {
    pub fn new(id: MessageId) -> Self {
        Self::with_correlator(id, Box::new(IdThenNameCorrelator))
    }

    pub fn with_correlator(id: MessageId, correlator: Box<dyn ToolCorrelator>) -> Self {
        Self {
            message: Message::assistant(id),
            correlator,
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn is_empty(&self) -> bool {
        self.message.is_empty()
    }

    pub fn finish(self) -> Message {
        self.message
    }

    /// Dispatch a content-bearing event. Control events leave the message
    /// untouched.
    pub fn apply(&mut self, event: &AgentEvent) -> ApplyOutcome {
        match event {
            AgentEvent::TextDelta { text } => self.apply_text_delta(text),
            AgentEvent::ToolUseAnnounced(tool_use) => self.apply_tool_use(tool_use.clone()),
            AgentEvent::ToolResult(results) => self.apply_tool_result(results.clone()),
            AgentEvent::ChartAnnounced { chart_spec } => self.apply_chart_announced(chart_spec),
            AgentEvent::Done
            | AgentEvent::ServerError(_)
            | AgentEvent::StatusChanged { .. }
            | AgentEvent::ResponseCompleted
            | AgentEvent::Unrecognized { .. } => ApplyOutcome::unchanged(),
        }
    }

    pub fn apply_text_delta(&mut self, text: &str) -> ApplyOutcome {
        if text.is_empty() {
            warn!(message_id = %self.message.id, "ignoring empty text delta");
            return ApplyOutcome::unchanged();
        }
        self.push_text(text);
        ApplyOutcome::changed()
    }

    pub fn apply_tool_use(&mut self, tool_use: ToolUse) -> ApplyOutcome {
        if tool_use.name.is_empty() {
            warn!(message_id = %self.message.id, "ignoring tool use without a name");
            return ApplyOutcome::unchanged();
        }
        debug!(tool = %tool_use.name, tool_use_id = ?tool_use.tool_use_id, "tool use announced");
        self.message.content.push(ContentBlock::ToolUse { tool_use });
        ApplyOutcome::changed()
    }

    /// Append the `ToolResults` block, then one derived block per payload
    /// whose nested `json` object has a known shape.
    pub fn apply_tool_result(&mut self, mut results: ToolResults) -> ApplyOutcome {
        if results.content.is_empty() {
            warn!(
                message_id = %self.message.id,
                tool = %results.name,
                "ignoring tool result without content"
            );
            return ApplyOutcome::unchanged();
        }

        results.correlated_use = self.correlator.correlate(
            &self.message.content,
            results.tool_use_id.as_deref(),
            &results.name,
        );
        if results.correlated_use.is_none() {
            debug!(tool = %results.name, "tool result has no matching tool use");
        }

        let shapes: Vec<PayloadShape> = results.content.iter().map(payload::classify).collect();
        self.message.content.push(ContentBlock::ToolResults {
            tool_results: results,
        });

        let mut outcome = ApplyOutcome::changed();
        for shape in shapes {
            match shape {
                PayloadShape::ResultSet(result_set) => {
                    let table_markdown = table::result_set_to_markdown(&result_set);
                    self.message.content.push(ContentBlock::FetchedTable {
                        table_markdown,
                        result_set,
                    });
                    outcome.derived.push(Derived::FetchedTable);
                }
                PayloadShape::ChartSpec(chart_spec) => {
                    self.message.content.push(ContentBlock::Chart {
                        chart: ChartSpec { chart_spec },
                    });
                    outcome.derived.push(Derived::Chart);
                }
                PayloadShape::SearchResults(hits) => {
                    let before = self.message.citations.len();
                    for hit in &hits {
                        match hit.to_citation() {
                            Some(citation) => self.message.citations.push(citation),
                            None => warn!(source_id = %hit.source_id, "search result without numeric source id"),
                        }
                    }
                    let added = self.message.citations.len() - before;
                    if added > 0 {
                        outcome.derived.push(Derived::Citations(added));
                    }
                }
                PayloadShape::AnswerText(text) => {
                    self.push_text(&text);
                    outcome.derived.push(Derived::AnswerText);
                }
                PayloadShape::Sql(_) | PayloadShape::Unrecognized => {}
            }
        }
        outcome
    }

    pub fn apply_chart_announced(&mut self, chart_spec: &str) -> ApplyOutcome {
        if chart_spec.is_empty() {
            warn!(message_id = %self.message.id, "ignoring empty chart spec");
            return ApplyOutcome::unchanged();
        }
        self.message.content.push(ContentBlock::Chart {
            chart: ChartSpec {
                chart_spec: chart_spec.to_string(),
            },
        });
        ApplyOutcome {
            changed: true,
            derived: vec![Derived::Chart],
        }
    }

    /// Merge into a trailing `Text` block or start a new one.
    fn push_text(&mut self, text: &str) {
        if let Some(ContentBlock::Text { text: last }) = self.message.content.last_mut() {
            last.push_str(text);
        } else {
            self.message.content.push(ContentBlock::Text {
                text: text.to_string(),
            });
        }
    }
}
