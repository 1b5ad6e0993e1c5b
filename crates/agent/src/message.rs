use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One conversational turn's worth of content from one side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: Vec<ContentBlock>,
    /// Sources cited by search tool results, in arrival order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
            citations: Vec::new(),
        }
    }

    pub fn assistant(id: MessageId) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: Vec::new(),
            citations: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// All `Text` blocks joined, in order.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// The `ToolUse` a `ToolResults` block at `index` was correlated with.
    pub fn tool_use_for(&self, index: usize) -> Option<&ToolUse> {
        let ContentBlock::ToolResults { tool_results } = self.content.get(index)? else {
            return None;
        };
        match self.content.get(tool_results.correlated_use?)? {
            ContentBlock::ToolUse { tool_use } => Some(tool_use),
            _ => None,
        }
    }

    /// Copy of this message without client-side derived blocks, as sent back
    /// to the agent as conversation history.
    pub fn without_derived_blocks(&self) -> Message {
        Message {
            id: self.id.clone(),
            role: self.role,
            content: self
                .content
                .iter()
                .filter(|block| !block.is_derived())
                .cloned()
                .collect(),
            citations: Vec::new(),
        }
    }
}

/// A typed unit of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        tool_use: ToolUse,
    },
    ToolResults {
        tool_results: ToolResults,
    },
    /// SQL result set pulled out of a tool result, with its markdown rendering.
    FetchedTable {
        table_markdown: String,
        result_set: Value,
    },
    Chart {
        chart: ChartSpec,
    },
}

impl ContentBlock {
    /// Blocks synthesized by the client rather than sent by the agent.
    pub fn is_derived(&self) -> bool {
        matches!(self, ContentBlock::FetchedTable { .. } | ContentBlock::Chart { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ContentBlock::Text { .. } => "text",
            ContentBlock::ToolUse { .. } => "tool_use",
            ContentBlock::ToolResults { .. } => "tool_results",
            ContentBlock::FetchedTable { .. } => "fetched_table",
            ContentBlock::Chart { .. } => "chart",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub name: String,
    /// Opaque payloads; each may carry a nested `json` object.
    pub content: Vec<Value>,
    /// Index of the correlated `ToolUse` block in the same message.
    #[serde(skip)]
    pub correlated_use: Option<usize>,
}

/// Chart specification string (Vega-Lite JSON) as sent by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub chart_spec: String,
}

impl ChartSpec {
    pub fn parse(&self) -> Option<Value> {
        serde_json::from_str(&self.chart_spec).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub number: u32,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_block_wire_shape() {
        let block = ContentBlock::ToolUse {
            tool_use: ToolUse {
                tool_use_id: Some("toolu_1".into()),
                name: "analyst1".into(),
                input: json!({"query": "revenue"}),
            },
        };
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "tool_use");
        assert_eq!(value["tool_use"]["name"], "analyst1");
        assert_eq!(value["tool_use"]["tool_use_id"], "toolu_1");

        let text = serde_json::to_value(ContentBlock::Text { text: "hi".into() }).unwrap();
        assert_eq!(text, json!({"type": "text", "text": "hi"}));
    }

    #[test]
    fn test_correlation_index_not_serialized() {
        let block = ContentBlock::ToolResults {
            tool_results: ToolResults {
                tool_use_id: None,
                name: "sql_exec".into(),
                content: vec![json!({"json": {"sql": "select 1"}})],
                correlated_use: Some(0),
            },
        };
        let value = serde_json::to_value(&block).unwrap();
        assert!(value["tool_results"].get("correlated_use").is_none());
        assert!(value["tool_results"].get("tool_use_id").is_none());
    }

    #[test]
    fn test_text_joins_text_blocks_only() {
        let mut msg = Message::assistant(MessageId::from("m1"));
        msg.content.push(ContentBlock::Text { text: "Hello ".into() });
        msg.content.push(ContentBlock::Chart {
            chart: ChartSpec { chart_spec: "{}".into() },
        });
        msg.content.push(ContentBlock::Text { text: "world".into() });
        assert_eq!(msg.text(), "Hello world");
    }

    #[test]
    fn test_without_derived_blocks() {
        let mut msg = Message::assistant(MessageId::from("m1"));
        msg.content.push(ContentBlock::ToolResults {
            tool_results: ToolResults {
                tool_use_id: None,
                name: "sql_exec".into(),
                content: vec![],
                correlated_use: None,
            },
        });
        msg.content.push(ContentBlock::FetchedTable {
            table_markdown: "| A |\n| --- |\n".into(),
            result_set: json!({}),
        });
        msg.content.push(ContentBlock::Chart {
            chart: ChartSpec { chart_spec: "{}".into() },
        });
        msg.citations.push(Citation { number: 1, text: "src".into() });

        let stripped = msg.without_derived_blocks();
        assert_eq!(stripped.content.len(), 1);
        assert_eq!(stripped.content[0].kind(), "tool_results");
        assert!(stripped.citations.is_empty());
        assert_eq!(stripped.id, msg.id);
    }

    #[test]
    fn test_tool_use_for() {
        let mut msg = Message::assistant(MessageId::from("m1"));
        msg.content.push(ContentBlock::ToolUse {
            tool_use: ToolUse {
                tool_use_id: None,
                name: "analyst1".into(),
                input: json!({}),
            },
        });
        msg.content.push(ContentBlock::ToolResults {
            tool_results: ToolResults {
                tool_use_id: None,
                name: "analyst1".into(),
                content: vec![],
                correlated_use: Some(0),
            },
        });
        assert_eq!(msg.tool_use_for(1).map(|t| t.name.as_str()), Some("analyst1"));
        assert!(msg.tool_use_for(0).is_none());
        assert!(msg.tool_use_for(5).is_none());
    }

    #[test]
    fn test_chart_spec_parse() {
        let ok = ChartSpec { chart_spec: r#"{"mark":"bar"}"#.into() };
        assert_eq!(ok.parse().unwrap()["mark"], "bar");
        let bad = ChartSpec { chart_spec: "{...}".into() };
        assert!(bad.parse().is_none());
    }
}
