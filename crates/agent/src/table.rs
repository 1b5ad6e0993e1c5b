//! Markdown rendering of SQL result sets carried in tool results.

use serde::Deserialize;
use serde_json::Value;

/// Rendered in place of a result set whose structure is unusable.
pub const INVALID_TABLE_MARKDOWN: &str = "| Error |\n| --- |\n| Invalid table data |\n";

#[derive(Debug, Deserialize)]
struct ResultSetMetaData {
    #[serde(rename = "rowType")]
    row_type: Vec<Column>,
}

#[derive(Debug, Deserialize)]
struct Column {
    name: String,
}

/// Look `key` up at the top level, then under a nested `result_set`.
/// Both layouts occur depending on the API version.
fn locate<'a>(table: &'a Value, key: &str) -> Option<&'a Value> {
    table
        .get(key)
        .or_else(|| table.get("result_set").and_then(|rs| rs.get(key)))
}

/// Render a result set as a markdown table.
///
/// Output is a pure function of the input, so re-rendering the same result
/// set is byte-identical.
pub fn result_set_to_markdown(table: &Value) -> String {
    let meta = locate(table, "resultSetMetaData")
        .and_then(|m| ResultSetMetaData::deserialize(m).ok());
    let rows = locate(table, "data").and_then(Value::as_array);

    let (Some(meta), Some(rows)) = (meta, rows) else {
        tracing::warn!("invalid table data structure");
        return INVALID_TABLE_MARKDOWN.to_string();
    };

    let columns: Vec<String> = meta.row_type.iter().map(|c| escape_cell(&c.name)).collect();

    let mut markdown = format!("| {} |\n", columns.join(" | "));
    markdown.push_str(&format!(
        "| {} |\n",
        columns.iter().map(|_| "---").collect::<Vec<_>>().join(" | ")
    ));

    for row in rows {
        let cells: Vec<String> = match row {
            Value::Array(values) => values.iter().map(render_cell).collect(),
            other => vec![render_cell(other)],
        };
        markdown.push_str(&format!("| {} |\n", cells.join(" | ")));
    }

    markdown
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => escape_cell(s),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        nested => escape_cell(&nested.to_string()),
    }
}

fn escape_cell(raw: &str) -> String {
    raw.replace('|', "\\|").replace("\r\n", " ").replace('\n', " ")
}
