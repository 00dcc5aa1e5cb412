/// Notebook Document - Best-Effort Construction From Loose Submissions
///
/// **Accepted Shapes (tried in order, first success wins):**
/// 1. Structured nbformat document: `{"cells": [{cell_type, source}]}`
/// 2. Loose collection: array of cells (or bare source strings), or an
///    object whose values are cells
/// 3. JSON text of either of the above
/// 4. Raw source text, wrapped as a single code cell
///
/// `source` may be a string or a list of lines (nbformat style).

use assay_common::types::SubmissionContent;
use serde_json::{json, Value};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Code,
    Prose,
    Raw,
}

impl CellKind {
    fn from_tag(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "code" => CellKind::Code,
            "markdown" | "prose" | "text" => CellKind::Prose,
            _ => CellKind::Raw,
        }
    }

    fn nbformat_tag(&self) -> &'static str {
        match self {
            CellKind::Code => "code",
            CellKind::Prose => "markdown",
            CellKind::Raw => "raw",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub kind: CellKind,
    pub source: String,
}

impl Cell {
    pub fn code(source: impl Into<String>) -> Self {
        Self {
            kind: CellKind::Code,
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotebookDocument {
    pub cells: Vec<Cell>,
}

type Strategy = fn(&Value) -> Option<NotebookDocument>;

const STRUCTURED_STRATEGIES: [Strategy; 2] = [from_nbformat, from_loose];

/// nbformat multiline text: string or list of line fragments
pub(crate) fn multiline_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => parts
            .iter()
            .map(|p| p.as_str())
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.concat()),
        _ => None,
    }
}

fn cell_from_value(value: &Value, default_kind: CellKind) -> Option<Cell> {
    match value {
        Value::String(source) => Some(Cell {
            kind: default_kind,
            source: source.clone(),
        }),
        Value::Object(map) => {
            let source = multiline_text(map.get("source")?)?;
            let kind = map
                .get("cell_type")
                .and_then(Value::as_str)
                .map(CellKind::from_tag)
                .unwrap_or(default_kind);
            Some(Cell { kind, source })
        }
        _ => None,
    }
}

fn from_nbformat(value: &Value) -> Option<NotebookDocument> {
    let cells = value.get("cells")?.as_array()?;
    let cells = cells
        .iter()
        .map(|c| match c {
            Value::Object(_) => cell_from_value(c, CellKind::Code),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    Some(NotebookDocument { cells })
}

fn from_loose(value: &Value) -> Option<NotebookDocument> {
    let entries: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) if !map.contains_key("cells") => map.values().collect(),
        _ => return None,
    };
    if entries.is_empty() {
        return None;
    }

    let cells = entries
        .into_iter()
        .map(|entry| cell_from_value(entry, CellKind::Code))
        .collect::<Option<Vec<_>>>()?;
    Some(NotebookDocument { cells })
}

impl NotebookDocument {
    pub fn parse(content: &SubmissionContent) -> Result<Self, EngineError> {
        let document = match content {
            SubmissionContent::Structured(Value::String(text)) | SubmissionContent::Text(text) => {
                Self::from_text(text)?
            }
            SubmissionContent::Structured(value) => Self::from_structured(value).ok_or_else(|| {
                EngineError::InvalidContent("unrecognized notebook structure".to_string())
            })?,
        };

        if document.cells.is_empty() {
            return Err(EngineError::InvalidContent("notebook has no cells".to_string()));
        }
        Ok(document)
    }

    fn from_structured(value: &Value) -> Option<Self> {
        STRUCTURED_STRATEGIES.iter().find_map(|strategy| strategy(value))
    }

    fn from_text(text: &str) -> Result<Self, EngineError> {
        if text.trim().is_empty() {
            return Err(EngineError::InvalidContent("notebook is empty".to_string()));
        }

        let parsed = serde_json::from_str::<Value>(text)
            .ok()
            .filter(|v| v.is_object() || v.is_array())
            .and_then(|v| Self::from_structured(&v));

        Ok(parsed.unwrap_or_else(|| NotebookDocument {
            cells: vec![Cell::code(text)],
        }))
    }

    pub fn code_cell_count(&self) -> usize {
        self.cells.iter().filter(|c| c.kind == CellKind::Code).count()
    }

    /// nbformat 4.5 document ready for execution under `kernel`
    pub fn to_nbformat(&self, kernel: &str) -> Value {
        let cells: Vec<Value> = self
            .cells
            .iter()
            .enumerate()
            .map(|(idx, cell)| {
                let mut value = json!({
                    "id": format!("cell-{}", idx),
                    "cell_type": cell.kind.nbformat_tag(),
                    "metadata": {},
                    "source": cell.source,
                });
                if cell.kind == CellKind::Code {
                    value["execution_count"] = Value::Null;
                    value["outputs"] = json!([]);
                }
                value
            })
            .collect();

        json!({
            "nbformat": 4,
            "nbformat_minor": 5,
            "metadata": {
                "kernelspec": {"name": kernel, "display_name": kernel}
            },
            "cells": cells,
        })
    }
}
