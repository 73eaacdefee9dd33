use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use thiserror::Error;

/// Depth bound applied to content trees before they are rendered.
pub const DEFAULT_MAX_TREE_DEPTH: usize = 64;

const SINGLE_SHEET_LABEL: &str = "Revision Sheet";
const MULTI_SHEET_LABEL: &str = "Revision Sheets";
const SHEET_MARKER_KEYS: [&str; 3] = ["title", "key_concepts", "detailed_explanation"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("unknown data format: expected revision sheets or a content tree")]
    UnrecognizedFormat,

    #[error("invalid revision sheets: {0}")]
    InvalidInput(String),

    #[error("content tree is deeper than {limit} levels (cyclic or runaway input)")]
    CyclicInput { limit: usize },
}

impl NormalizeError {
    pub fn code(&self) -> &'static str {
        match self {
            NormalizeError::UnrecognizedFormat => "unrecognized_format",
            NormalizeError::InvalidInput(_) => "invalid_input",
            NormalizeError::CyclicInput { .. } => "cyclic_input",
        }
    }
}

/// One revision sheet as produced by the RAG service. Every field is optional
/// on the wire; `from_value` never fails.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RevisionSheet {
    pub title: Option<String>,
    pub explanation: Option<String>,
    pub detailed_explanation: Option<String>,
    pub key_concepts: Vec<String>,
}

impl RevisionSheet {
    pub fn from_value(v: &Value) -> Self {
        let key_concepts = match v.get("key_concepts") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| scalar_text(item).unwrap_or_default())
                .collect(),
            _ => Vec::new(),
        };
        RevisionSheet {
            title: truthy_text(v.get("title")),
            explanation: truthy_text(v.get("explanation")),
            detailed_explanation: truthy_text(v.get("detailed_explanation")),
            key_concepts,
        }
    }

    /// `detailed_explanation` wins over `explanation`; empty when neither is set.
    pub fn body(&self) -> &str {
        self.detailed_explanation
            .as_deref()
            .or(self.explanation.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentNode {
    pub id: String,
    pub label: String,
    pub content: String,
    #[serde(default)]
    pub children: Vec<ContentNode>,
}

impl ContentNode {
    fn new(id: String, label: String, content: String) -> Self {
        ContentNode {
            id,
            label,
            content,
            children: Vec::new(),
        }
    }
}

/// Input classification, checked in precedence order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ContentShape<'a> {
    /// Already a `{ id, label, ... }` tree.
    ContentTree(&'a Value),
    SheetList(&'a [Value]),
    /// An object carrying a sheet list under `key`.
    WrappedSheetList { key: &'a str, sheets: &'a [Value] },
}

impl ContentShape<'_> {
    pub fn tag(&self) -> &'static str {
        match self {
            ContentShape::ContentTree(_) => "contentTree",
            ContentShape::SheetList(_) => "sheetList",
            ContentShape::WrappedSheetList { .. } => "wrappedSheetList",
        }
    }
}

/// Result of `normalize`: either the caller's tree handed back untouched, or a
/// tree built from revision sheets.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ContentTree<'a> {
    Passthrough(Cow<'a, Value>),
    Built(ContentNode),
}

impl ContentTree<'_> {
    pub fn into_owned(self) -> ContentTree<'static> {
        match self {
            ContentTree::Passthrough(v) => ContentTree::Passthrough(Cow::Owned(v.into_owned())),
            ContentTree::Built(node) => ContentTree::Built(node),
        }
    }

    pub fn passthrough_value(&self) -> Option<&Value> {
        match self {
            ContentTree::Passthrough(v) => Some(v.as_ref()),
            ContentTree::Built(_) => None,
        }
    }
}

pub fn classify(input: &Value) -> Result<ContentShape<'_>, NormalizeError> {
    match input {
        Value::Object(map) => {
            let has_id = map.get("id").is_some_and(is_truthy);
            let has_label = map.get("label").is_some_and(is_truthy);
            if has_id && has_label {
                return Ok(ContentShape::ContentTree(input));
            }
            if has_id || has_label {
                return Err(NormalizeError::UnrecognizedFormat);
            }
            map.iter()
                .find_map(|(key, value)| match value {
                    Value::Array(items) if looks_like_sheet_list(items) => {
                        Some(ContentShape::WrappedSheetList {
                            key: key.as_str(),
                            sheets: items.as_slice(),
                        })
                    }
                    _ => None,
                })
                .ok_or(NormalizeError::UnrecognizedFormat)
        }
        Value::Array(items) if items.is_empty() => Err(NormalizeError::InvalidInput(
            "expected a non-empty array".into(),
        )),
        Value::Array(items) if looks_like_sheet_list(items) => {
            Ok(ContentShape::SheetList(items.as_slice()))
        }
        _ => Err(NormalizeError::UnrecognizedFormat),
    }
}

/// Turn any accepted input shape into a single content tree.
pub fn normalize(input: &Value) -> Result<ContentTree<'_>, NormalizeError> {
    match classify(input)? {
        ContentShape::ContentTree(tree) => Ok(ContentTree::Passthrough(Cow::Borrowed(tree))),
        ContentShape::SheetList(sheets) | ContentShape::WrappedSheetList { sheets, .. } => {
            build_sheet_tree(sheets).map(ContentTree::Built)
        }
    }
}

/// Convert a JSON array of revision sheets into a content tree.
pub fn sheets_to_tree(input: &Value) -> Result<ContentNode, NormalizeError> {
    match input {
        Value::Array(items) => build_sheet_tree(items),
        _ => Err(NormalizeError::InvalidInput(
            "expected an array of revision sheets".into(),
        )),
    }
}

fn build_sheet_tree(items: &[Value]) -> Result<ContentNode, NormalizeError> {
    if items.is_empty() {
        return Err(NormalizeError::InvalidInput(
            "expected a non-empty array".into(),
        ));
    }
    let sheets: Vec<RevisionSheet> = items.iter().map(RevisionSheet::from_value).collect();

    if let [sheet] = sheets.as_slice() {
        let mut root = ContentNode::new(
            "root".into(),
            sheet
                .title
                .clone()
                .unwrap_or_else(|| SINGLE_SHEET_LABEL.to_string()),
            sheet.body().to_string(),
        );
        root.children = concept_leaves(sheet, |j| format!("concept-{j}"));
        return Ok(root);
    }

    let mut root = ContentNode::new(
        "root".into(),
        MULTI_SHEET_LABEL.to_string(),
        format!(
            "{} revision sheets generated. Click on each topic to explore.",
            sheets.len()
        ),
    );
    for (idx, sheet) in sheets.iter().enumerate() {
        let i = idx + 1;
        let mut node = ContentNode::new(
            format!("sheet-{i}"),
            sheet.title.clone().unwrap_or_else(|| format!("Sheet {i}")),
            sheet.body().to_string(),
        );
        node.children = concept_leaves(sheet, |j| format!("sheet-{i}-concept-{j}"));
        root.children.push(node);
    }
    Ok(root)
}

fn concept_leaves(sheet: &RevisionSheet, id_for: impl Fn(usize) -> String) -> Vec<ContentNode> {
    let body = sheet.body();
    sheet
        .key_concepts
        .iter()
        .enumerate()
        .map(|(idx, concept)| {
            let j = idx + 1;
            let label = if concept.is_empty() {
                format!("Concept {j}")
            } else {
                concept.clone()
            };
            // A concept without a sheet-level explanation shows itself.
            let content = if body.is_empty() {
                label.clone()
            } else {
                body.to_string()
            };
            ContentNode::new(id_for(j), label, content)
        })
        .collect()
}

fn looks_like_sheet_list(items: &[Value]) -> bool {
    match items.first() {
        Some(Value::Object(first)) => SHEET_MARKER_KEYS
            .iter()
            .any(|k| first.get(*k).is_some_and(is_truthy)),
        _ => false,
    }
}

/// Presence test used for every optional field: null, false, 0 and "" count
/// as absent.
pub fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Text for a scalar value; `None` for null, arrays and objects.
pub fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn truthy_text(v: Option<&Value>) -> Option<String> {
    v.filter(|v| is_truthy(v)).and_then(scalar_text)
}
