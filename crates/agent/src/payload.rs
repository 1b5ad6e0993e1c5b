//! Shape detection for the nested `json` object inside tool-result payloads.
//!
//! Tool results are loosely typed; the kind of content they carry is only
//! visible from which keys are present. [`classify`] tries each known shape
//! in a fixed priority order and reports [`PayloadShape::Unrecognized`] when
//! none fits.

use serde::Deserialize;
use serde_json::Value;

use crate::message::Citation;

#[derive(Debug, Clone, PartialEq)]
pub enum PayloadShape {
    /// SQL execution output (`result_set`).
    ResultSet(Value),
    /// Chart specification (`chart_spec`), always in string form.
    ChartSpec(String),
    /// Search hits (`searchResults`), feeding the citations list.
    SearchResults(Vec<SearchResult>),
    /// Plain answer text (`text`).
    AnswerText(String),
    /// Generated SQL without results; nothing is derived from it.
    Sql(String),
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub source_id: Value,
}

impl SearchResult {
    /// Citation numbered by `source_id` (number or numeric string).
    pub fn to_citation(&self) -> Option<Citation> {
        let number = match &self.source_id {
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(s) => leading_integer(s),
            _ => None,
        }?;
        Some(Citation {
            number,
            text: self.text.clone(),
        })
    }
}

/// Parse the leading decimal digits of `s` (after whitespace).
fn leading_integer(s: &str) -> Option<u32> {
    let trimmed = s.trim_start();
    let end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    trimmed[..end].parse().ok()
}

/// Classify one tool-result payload (`{"json": {...}, ...}`).
pub fn classify(payload: &Value) -> PayloadShape {
    let Some(json) = payload.get("json").and_then(Value::as_object) else {
        return PayloadShape::Unrecognized;
    };

    if let Some(result_set) = json.get("result_set").filter(|v| v.is_object()) {
        return PayloadShape::ResultSet(result_set.clone());
    }

    match json.get("chart_spec") {
        Some(Value::String(spec)) if !spec.is_empty() => {
            return PayloadShape::ChartSpec(spec.clone());
        }
        Some(spec @ Value::Object(_)) => return PayloadShape::ChartSpec(spec.to_string()),
        _ => {}
    }

    if let Some(results) = json.get("searchResults").and_then(Value::as_array) {
        let hits = results
            .iter()
            .filter_map(|r| match SearchResult::deserialize(r) {
                Ok(hit) => Some(hit),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed search result");
                    None
                }
            })
            .collect();
        return PayloadShape::SearchResults(hits);
    }

    if let Some(text) = json.get("text").and_then(Value::as_str).filter(|t| !t.is_empty()) {
        return PayloadShape::AnswerText(text.to_string());
    }

    if let Some(sql) = json.get("sql").and_then(Value::as_str) {
        return PayloadShape::Sql(sql.to_string());
    }

    PayloadShape::Unrecognized
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_set_wins_over_sql() {
        let payload = json!({"json": {"sql": "select 1", "result_set": {"data": [[1]]}}});
        assert_eq!(
            classify(&payload),
            PayloadShape::ResultSet(json!({"data": [[1]]}))
        );
    }

    #[test]
    fn test_chart_spec_string_and_object() {
        let payload = json!({"json": {"chart_spec": "{\"mark\":\"bar\"}"}});
        assert_eq!(
            classify(&payload),
            PayloadShape::ChartSpec("{\"mark\":\"bar\"}".into())
        );

        let payload = json!({"json": {"chart_spec": {"mark": "line"}}});
        assert_eq!(
            classify(&payload),
            PayloadShape::ChartSpec("{\"mark\":\"line\"}".into())
        );
    }

    #[test]
    fn test_search_results() {
        let payload = json!({"json": {"searchResults": [
            {"text": "Q3 report", "source_id": 1},
            {"text": "Annual summary", "source_id": "2"},
            "garbage"
        ]}});
        let PayloadShape::SearchResults(hits) = classify(&payload) else {
            panic!("expected search results");
        };
        assert_eq!(hits.len(), 2);
        let citations: Vec<_> = hits.iter().filter_map(SearchResult::to_citation).collect();
        assert_eq!(citations[0], Citation { number: 1, text: "Q3 report".into() });
        assert_eq!(citations[1].number, 2);
    }

    #[test]
    fn test_analyst_text_preferred_over_sql() {
        let payload = json!({"json": {"text": "Revenue by region:", "sql": "select ..."}});
        assert_eq!(
            classify(&payload),
            PayloadShape::AnswerText("Revenue by region:".into())
        );
    }

    #[test]
    fn test_sql_only() {
        let payload = json!({"json": {"sql": "select 1"}});
        assert_eq!(classify(&payload), PayloadShape::Sql("select 1".into()));
    }

    #[test]
    fn test_unrecognized_shapes() {
        assert_eq!(classify(&json!({"json": {"other": 1}})), PayloadShape::Unrecognized);
        assert_eq!(classify(&json!({"text": "no json key"})), PayloadShape::Unrecognized);
        assert_eq!(classify(&json!("string payload")), PayloadShape::Unrecognized);
        assert_eq!(classify(&json!({"json": {"text": ""}})), PayloadShape::Unrecognized);
    }

    #[test]
    fn test_citation_source_id_parsing() {
        let hit = |id: Value| SearchResult { text: "t".into(), source_id: id };
        assert_eq!(hit(json!(" 12abc")).to_citation().map(|c| c.number), Some(12));
        assert!(hit(json!("abc")).to_citation().is_none());
        assert!(hit(json!(-3)).to_citation().is_none());
        assert!(hit(Value::Null).to_citation().is_none());
    }
}
