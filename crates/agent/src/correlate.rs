//! Pairing tool results with the tool use that produced them.

use std::collections::HashSet;

use crate::message::ContentBlock;

/// Finds the `ToolUse` block a new tool result belongs to.
///
/// Returns the index of that block within `blocks`, or `None` when no
/// candidate exists. Kept behind a trait so the heuristic can be swapped
/// without touching the builder.
pub trait ToolCorrelator: Send + Sync {
    fn correlate(&self, blocks: &[ContentBlock], tool_use_id: Option<&str>, name: &str)
        -> Option<usize>;
}

/// Matches on `tool_use_id` when the protocol supplies one; otherwise picks
/// the most recent `ToolUse` with the same name that no earlier result has
/// claimed.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdThenNameCorrelator;

impl ToolCorrelator for IdThenNameCorrelator {
    fn correlate(
        &self,
        blocks: &[ContentBlock],
        tool_use_id: Option<&str>,
        name: &str,
    ) -> Option<usize> {
        if let Some(id) = tool_use_id {
            let by_id = blocks.iter().position(|block| {
                matches!(block, ContentBlock::ToolUse { tool_use } if tool_use.tool_use_id.as_deref() == Some(id))
            });
            if by_id.is_some() {
                return by_id;
            }
            tracing::debug!(tool_use_id = id, "no tool use with matching id, falling back to name");
        }

        if name.is_empty() {
            return None;
        }

        let claimed: HashSet<usize> = blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResults { tool_results } => tool_results.correlated_use,
                _ => None,
            })
            .collect();

        blocks
            .iter()
            .enumerate()
            .rev()
            .find(|(idx, block)| {
                matches!(block, ContentBlock::ToolUse { tool_use } if tool_use.name == name)
                    && !claimed.contains(idx)
            })
            .map(|(idx, _)| idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ToolResults, ToolUse};
    use serde_json::json;

    fn tool_use(id: Option<&str>, name: &str) -> ContentBlock {
        ContentBlock::ToolUse {
            tool_use: ToolUse {
                tool_use_id: id.map(String::from),
                name: name.to_string(),
                input: json!({}),
            },
        }
    }

    fn claimed_result(name: &str, correlated: usize) -> ContentBlock {
        ContentBlock::ToolResults {
            tool_results: ToolResults {
                tool_use_id: None,
                name: name.to_string(),
                content: vec![],
                correlated_use: Some(correlated),
            },
        }
    }

    #[test]
    fn test_explicit_id_wins() {
        let blocks = vec![tool_use(Some("a"), "sql_exec"), tool_use(Some("b"), "sql_exec")];
        let idx = IdThenNameCorrelator.correlate(&blocks, Some("a"), "sql_exec");
        assert_eq!(idx, Some(0));
    }

    #[test]
    fn test_name_fallback_picks_latest_unclaimed() {
        let blocks = vec![
            tool_use(None, "analyst1"),
            tool_use(None, "analyst1"),
            claimed_result("analyst1", 1),
        ];
        let idx = IdThenNameCorrelator.correlate(&blocks, None, "analyst1");
        assert_eq!(idx, Some(0));
    }

    #[test]
    fn test_unknown_id_falls_back_to_name() {
        let blocks = vec![tool_use(None, "search1")];
        let idx = IdThenNameCorrelator.correlate(&blocks, Some("missing"), "search1");
        assert_eq!(idx, Some(0));
    }

    #[test]
    fn test_no_candidate() {
        let blocks = vec![tool_use(None, "search1"), claimed_result("search1", 0)];
        assert_eq!(IdThenNameCorrelator.correlate(&blocks, None, "search1"), None);
        assert_eq!(IdThenNameCorrelator.correlate(&blocks, None, ""), None);
        assert_eq!(IdThenNameCorrelator.correlate(&[], None, "x"), None);
    }
}
