//! Request body for the agent `:run` endpoint.

use serde::Serialize;
use serde_json::{json, Map, Value};

use cortex_core::config::{AgentConfig, ToolsConfig};

use crate::message::{ContentBlock, Message, Role};

pub const SEARCH_TOOL: &str = "search1";
pub const ANALYST_TOOL: &str = "analyst1";
pub const DATA_TO_CHART_TOOL: &str = "data_to_chart";
pub const SQL_EXEC_TOOL: &str = "sql_exec";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub tool_spec: ToolSpecInner,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpecInner {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
}

impl ToolSpec {
    pub fn new(kind: &str, name: &str) -> Self {
        Self {
            tool_spec: ToolSpecInner {
                kind: kind.to_string(),
                name: name.to_string(),
            },
        }
    }
}

/// A history entry as the agent expects it: role and content only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl From<Message> for WireMessage {
    fn from(message: Message) -> Self {
        Self {
            role: message.role,
            content: message.content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<WireMessage>,
    pub tools: Vec<ToolSpec>,
    pub tool_resources: Map<String, Value>,
    pub experimental: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_instruction: Option<String>,
}

/// Everything in a request except the conversation, fixed for a session.
#[derive(Debug, Clone, Default)]
pub struct RequestTemplate {
    pub model: Option<String>,
    pub tools: Vec<ToolSpec>,
    pub tool_resources: Map<String, Value>,
    pub experimental: Map<String, Value>,
    pub response_instruction: Option<String>,
}

impl RequestTemplate {
    /// Default tool set: search and text-to-SQL when their backing services
    /// are configured, plus chart generation and SQL execution.
    pub fn from_config(agent: &AgentConfig, tools: &ToolsConfig) -> Self {
        let mut specs = Vec::new();
        let mut resources = Map::new();

        if let Some(service) = &tools.search_service_path {
            specs.push(ToolSpec::new("cortex_search", SEARCH_TOOL));
            resources.insert(
                SEARCH_TOOL.to_string(),
                json!({ "name": service, "max_results": tools.search_max_results }),
            );
        }
        if let Some(model_file) = &tools.semantic_model_path {
            specs.push(ToolSpec::new("cortex_analyst_text_to_sql", ANALYST_TOOL));
            resources.insert(
                ANALYST_TOOL.to_string(),
                json!({ "semantic_model_file": model_file }),
            );
        }
        specs.push(ToolSpec::new("cortex_analyst_data_to_chart", DATA_TO_CHART_TOOL));
        specs.push(ToolSpec::new("cortex_analyst_sql_exec", SQL_EXEC_TOOL));

        let mut experimental = Map::new();
        if tools.related_queries {
            experimental.insert("EnableRelatedQueries".to_string(), Value::Bool(true));
        }

        Self {
            model: agent.model.clone(),
            tools: specs,
            tool_resources: resources,
            experimental,
            response_instruction: agent.response_instruction.clone(),
        }
    }

    pub fn build(&self, history: Vec<Message>) -> AgentRequest {
        AgentRequest {
            model: self.model.clone(),
            messages: history.into_iter().map(WireMessage::from).collect(),
            tools: self.tools.clone(),
            tool_resources: self.tool_resources.clone(),
            experimental: self.experimental.clone(),
            response_instruction: self.response_instruction.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools_config() -> ToolsConfig {
        ToolsConfig {
            semantic_model_path: Some("@SALES.PUBLIC.MODELS/revenue.yaml".into()),
            search_service_path: Some("SALES.PUBLIC.DOCS_SEARCH".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_tool_set() {
        let template = RequestTemplate::from_config(&AgentConfig::default(), &tools_config());
        let names: Vec<_> = template.tools.iter().map(|t| t.tool_spec.name.as_str()).collect();
        assert_eq!(names, vec![SEARCH_TOOL, ANALYST_TOOL, DATA_TO_CHART_TOOL, SQL_EXEC_TOOL]);
        assert_eq!(
            template.tool_resources[ANALYST_TOOL]["semantic_model_file"],
            "@SALES.PUBLIC.MODELS/revenue.yaml"
        );
        assert_eq!(template.tool_resources[SEARCH_TOOL]["max_results"], 10);
        assert_eq!(template.experimental["EnableRelatedQueries"], true);
    }

    #[test]
    fn test_unconfigured_services_are_left_out() {
        let tools = ToolsConfig {
            related_queries: false,
            ..Default::default()
        };
        let template = RequestTemplate::from_config(&AgentConfig::default(), &tools);
        assert_eq!(template.tools.len(), 2);
        assert!(template.tool_resources.is_empty());
        assert!(template.experimental.is_empty());
    }

    #[test]
    fn test_request_body_shape() {
        let agent = AgentConfig {
            model: Some("claude-3-5-sonnet".into()),
            ..Default::default()
        };
        let template = RequestTemplate::from_config(&agent, &tools_config());
        let body = serde_json::to_value(template.build(vec![Message::user("revenue by region")]))
            .unwrap();

        assert_eq!(body["model"], "claude-3-5-sonnet");
        assert_eq!(
            body["messages"],
            json!([{"role": "user", "content": [{"type": "text", "text": "revenue by region"}]}])
        );
        assert_eq!(body["tools"][0], json!({"tool_spec": {"type": "cortex_search", "name": "search1"}}));
        assert!(body.get("response_instruction").is_none());
    }
}
