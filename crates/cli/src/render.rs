//! Incremental rendering of published conversation snapshots.
//!
//! The session publishes whole snapshots; [`TurnView`] remembers how much of
//! the turn's assistant messages was already shown and yields only the new
//! parts.

use serde_json::Value;

use cortex_agent::{ChartSpec, ContentBlock, Conversation, Role};

/// One printable piece of assistant output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Text(String),
    ToolUse(String),
    ToolResult(String),
    Table(String),
    Chart(String),
}

pub struct TurnView {
    /// Messages before this index belong to earlier turns.
    first_message: usize,
    /// Assistant message currently being followed.
    message: usize,
    /// Blocks of that message fully shown.
    blocks_shown: usize,
    /// Bytes of the trailing text block already shown.
    text_shown: usize,
}

impl TurnView {
    pub fn new(first_message: usize) -> Self {
        Self {
            first_message,
            message: first_message,
            blocks_shown: 0,
            text_shown: 0,
        }
    }

    /// Pieces not yet shown, in content order.
    pub fn update(&mut self, conversation: &Conversation) -> Vec<Piece> {
        let mut pieces = Vec::new();
        let messages = conversation.messages();

        while self.message < messages.len() {
            let message = &messages[self.message];
            if message.role == Role::Assistant {
                let blocks = &message.content;
                for (idx, block) in blocks.iter().enumerate().skip(self.blocks_shown) {
                    match block {
                        ContentBlock::Text { text } => {
                            if text.len() > self.text_shown {
                                pieces.push(Piece::Text(text[self.text_shown..].to_string()));
                            }
                            if idx + 1 < blocks.len() {
                                self.blocks_shown = idx + 1;
                                self.text_shown = 0;
                            } else {
                                self.text_shown = text.len();
                            }
                        }
                        other => {
                            pieces.extend(piece_for(other));
                            self.blocks_shown = idx + 1;
                        }
                    }
                }
            }
            if self.message + 1 == messages.len() {
                break;
            }
            self.message += 1;
            self.blocks_shown = 0;
            self.text_shown = 0;
        }
        pieces
    }

    /// Numbered citations of the turn's assistant messages.
    pub fn citations(&self, conversation: &Conversation) -> Vec<String> {
        conversation
            .messages()
            .iter()
            .skip(self.first_message)
            .flat_map(|m| m.citations.iter())
            .map(|c| format!("[{}] {}", c.number, c.text))
            .collect()
    }
}

fn piece_for(block: &ContentBlock) -> Option<Piece> {
    match block {
        ContentBlock::Text { text } => Some(Piece::Text(text.clone())),
        ContentBlock::ToolUse { tool_use } => Some(Piece::ToolUse(tool_use.name.clone())),
        ContentBlock::ToolResults { tool_results } => {
            Some(Piece::ToolResult(tool_results.name.clone()))
        }
        ContentBlock::FetchedTable { table_markdown, .. } => {
            Some(Piece::Table(table_markdown.clone()))
        }
        ContentBlock::Chart { chart } => Some(Piece::Chart(chart_summary(chart))),
    }
}

/// One-line description of a Vega-Lite spec: mark and title when present.
pub fn chart_summary(chart: &ChartSpec) -> String {
    let Some(spec) = chart.parse() else {
        return "chart (unparseable spec)".to_string();
    };
    let mark = match spec.get("mark") {
        Some(Value::String(mark)) => Some(mark.as_str()),
        Some(Value::Object(mark)) => mark.get("type").and_then(Value::as_str),
        _ => None,
    };
    let title = match spec.get("title") {
        Some(Value::String(title)) => Some(title.as_str()),
        Some(Value::Object(title)) => title.get("text").and_then(Value::as_str),
        _ => None,
    };
    match (mark, title) {
        (Some(mark), Some(title)) => format!("{} chart: {}", mark, title),
        (Some(mark), None) => format!("{} chart", mark),
        (None, Some(title)) => format!("chart: {}", title),
        (None, None) => "chart".to_string(),
    }
}
