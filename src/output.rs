use std::fmt::Write;

use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;

use crate::views::View;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(cell).collect::<Vec<_>>().join("; "),
        other => other.to_string(),
    }
}

fn rows_as_objects<R: Serialize>(view: &View<R>) -> anyhow::Result<Vec<serde_json::Map<String, Value>>> {
    view.rows
        .iter()
        .map(|row| match serde_json::to_value(row)? {
            Value::Object(map) => Ok(map),
            other => anyhow::bail!("view row is not a record: {other}"),
        })
        .collect()
}

pub fn render<R: Serialize>(view: &View<R>, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(view)?),
        OutputFormat::Csv => render_csv(view),
        OutputFormat::Text => render_text(view),
    }
}

fn render_csv<R: Serialize>(view: &View<R>) -> anyhow::Result<String> {
    let rows = rows_as_objects(view)?;
    let mut writer = csv::Writer::from_writer(Vec::new());
    if let Some(first) = rows.first() {
        writer.write_record(first.keys())?;
        for row in &rows {
            writer.write_record(row.values().map(cell))?;
        }
    }
    Ok(String::from_utf8(writer.into_inner()?)?)
}

fn render_text<R: Serialize>(view: &View<R>) -> anyhow::Result<String> {
    let rows = rows_as_objects(view)?;
    let mut output = String::new();

    let _ = writeln!(output, "{}", view.title);
    for stat in &view.summary {
        let value = stat
            .value
            .map_or_else(|| "N/A".to_string(), |v| format!("{v:.2}"));
        let _ = writeln!(output, "  {}: {}", stat.name, value);
    }

    if rows.is_empty() {
        let _ = writeln!(output, "No data for this selection.");
        return Ok(output);
    }

    for row in &rows {
        let fields: Vec<String> = row
            .iter()
            .map(|(key, value)| {
                let shown = match value {
                    Value::Null => "N/A".to_string(),
                    other => cell(other),
                };
                format!("{key}: {shown}")
            })
            .collect();
        let _ = writeln!(output, "- {}", fields.join(", "));
    }
    Ok(output)
}
