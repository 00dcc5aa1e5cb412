//! Output extraction from an executed nbformat document.

use assay_common::types::OutputItem;
use serde_json::Value;
use std::collections::BTreeMap;

use super::document::multiline_text;

/// Everything the criteria can look at, in cell-execution order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedOutputs {
    pub outputs: Vec<OutputItem>,
    pub stdout: String,
    pub stderr: String,
    /// Non-empty stdout lines, trimmed
    pub prints: Vec<String>,
    /// `text/plain` of the last execution result
    pub final_result: Option<String>,
    pub errors: Vec<String>,
}

impl ExtractedOutputs {
    pub fn from_outputs(outputs: Vec<OutputItem>) -> Self {
        let mut extracted = ExtractedOutputs::default();

        for item in &outputs {
            match item {
                OutputItem::Stream { text, .. } if item.is_stdout() => {
                    extracted.stdout.push_str(text)
                }
                OutputItem::Stream { text, .. } => extracted.stderr.push_str(text),
                OutputItem::Result { .. } => {
                    if let Some(text) = item.plain_text() {
                        extracted.final_result = Some(text.to_string());
                    }
                }
                OutputItem::Display { .. } => {}
                OutputItem::Error { name, message, .. } => {
                    extracted.errors.push(format!("{}: {}", name, message))
                }
            }
        }

        extracted.prints = extracted
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();
        extracted.outputs = outputs;
        extracted
    }

    /// Concatenated stream text for one stream name
    pub fn stream_text(&self, stream: &str) -> String {
        self.outputs
            .iter()
            .filter_map(|item| match item {
                OutputItem::Stream { name, text } if name == stream => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

fn mime_bundle(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|data| {
            data.iter()
                .map(|(mime, content)| {
                    let text = multiline_text(content).unwrap_or_else(|| content.to_string());
                    (mime.clone(), text)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Classify one raw nbformat output. Unknown output types are skipped.
pub fn classify(output: &Value) -> Option<OutputItem> {
    let kind = output.get("output_type")?.as_str()?;
    let text_field = |key: &str| {
        output
            .get(key)
            .and_then(multiline_text)
            .unwrap_or_default()
    };

    match kind {
        "stream" => Some(OutputItem::Stream {
            name: output
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("stdout")
                .to_string(),
            text: text_field("text"),
        }),
        "execute_result" => Some(OutputItem::Result {
            data: mime_bundle(output.get("data")),
        }),
        "display_data" | "update_display_data" => Some(OutputItem::Display {
            data: mime_bundle(output.get("data")),
        }),
        "error" => Some(OutputItem::Error {
            name: text_field("ename"),
            message: text_field("evalue"),
            trace: output
                .get("traceback")
                .and_then(Value::as_array)
                .map(|lines| {
                    lines
                        .iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        }),
        _ => None,
    }
}

/// Walk every code cell's outputs in order
pub fn extract(executed: &Value) -> ExtractedOutputs {
    let outputs = executed
        .get("cells")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|cell| cell.get("outputs").and_then(Value::as_array))
        .flatten()
        .filter_map(classify)
        .collect();

    ExtractedOutputs::from_outputs(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn executed() -> Value {
        json!({
            "cells": [
                {"cell_type": "markdown", "source": "# intro"},
                {"cell_type": "code", "outputs": [
                    {"output_type": "stream", "name": "stdout", "text": ["hello\n", "  \n"]},
                    {"output_type": "execute_result", "execution_count": 1,
                     "data": {"text/plain": "7"}, "metadata": {}}
                ]},
                {"cell_type": "code", "outputs": [
                    {"output_type": "stream", "name": "stderr", "text": "warning\n"},
                    {"output_type": "display_data",
                     "data": {"text/plain": ["<Figure>"], "image/png": "iVBOR"}},
                    {"output_type": "stream", "name": "stdout", "text": "done\n"},
                    {"output_type": "execute_result", "data": {"text/plain": "42"}},
                    {"output_type": "error", "ename": "ValueError", "evalue": "bad",
                     "traceback": ["line 1", "line 2"]},
                    {"output_type": "mystery"}
                ]}
            ]
        })
    }

    #[test]
    fn test_extract_in_order() {
        let extracted = extract(&executed());

        assert_eq!(extracted.outputs.len(), 6);
        assert_eq!(extracted.stdout, "hello\n  \ndone\n");
        assert_eq!(extracted.stderr, "warning\n");
        assert_eq!(extracted.prints, vec!["hello", "done"]);
        assert_eq!(extracted.final_result.as_deref(), Some("42"));
        assert_eq!(extracted.errors, vec!["ValueError: bad"]);
    }

    #[test]
    fn test_classify_display_bundle() {
        let item = classify(&json!({
            "output_type": "display_data",
            "data": {"text/plain": ["a", "b"], "application/json": {"k": 1}}
        }))
        .unwrap();
        match item {
            OutputItem::Display { data } => {
                assert_eq!(data["text/plain"], "ab");
                assert_eq!(data["application/json"], r#"{"k":1}"#);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_empty_notebook() {
        let extracted = extract(&json!({"cells": []}));
        assert!(extracted.outputs.is_empty());
        assert!(extracted.final_result.is_none());
        assert!(extract(&json!("garbage")).outputs.is_empty());
    }
}
