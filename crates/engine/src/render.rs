//! Template materialization.
//!
//! A template is one or more YAML (or JSON) documents separated by `---` lines. String
//! scalars may reference bindings with `${{ name }}` or `${{ bindings.name.path }}`:
//!
//! - an expression that makes up the whole scalar is replaced by the bound JSON value, so
//!   `replicas: ${{ replicas }}` renders a number when `replicas` is bound to one;
//! - an expression embedded in a longer string is formatted as text.
//!
//! Unlike workflow interpolation, a reference to an unbound name is an error rather than an
//! empty string: a rendered resource must never silently lose a field.

use std::fmt;

use serde_json::{Map, Value};
use settle_types::{Bindings, IdentityError, ObjectKey};
use thiserror::Error;

const EXPRESSION_OPEN: &str = "${{";
const EXPRESSION_CLOSE: &str = "}}";

/// How many documents a rendering must produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentCount {
    Exactly(usize),
    AtLeastOne,
}

impl DocumentCount {
    pub fn admits(&self, actual: usize) -> bool {
        match self {
            DocumentCount::Exactly(expected) => actual == *expected,
            DocumentCount::AtLeastOne => actual > 0,
        }
    }
}

impl fmt::Display for DocumentCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentCount::Exactly(expected) => write!(f, "exactly {expected}"),
            DocumentCount::AtLeastOne => f.write_str("at least one"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RenderError {
    /// A document is not valid YAML/JSON, is not a mapping, or contains a malformed expression.
    #[error("template syntax error in document {document}: {message}")]
    Syntax { document: usize, message: String },
    /// An expression names a binding (or a path inside one) that does not exist.
    #[error("undefined variable '{name}' in document {document} at {location}")]
    UndefinedVariable { name: String, document: usize, location: String },
    #[error("template rendered {actual} document(s), expected {expected}")]
    WrongDocumentCount { expected: DocumentCount, actual: usize },
    #[error("document {document} cannot be addressed: {source}")]
    MissingIdentity {
        document: usize,
        #[source]
        source: IdentityError,
    },
}

/// Turns template text plus bindings into generic resource documents.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, text: &str, bindings: &Bindings) -> Result<Vec<Value>, RenderError>;
}

/// The default renderer: YAML documents with `${{ }}` interpolation.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterpolatingRenderer;

impl TemplateRenderer for InterpolatingRenderer {
    fn render(&self, text: &str, bindings: &Bindings) -> Result<Vec<Value>, RenderError> {
        let mut documents = Vec::new();
        for (index, source) in split_documents(text).into_iter().enumerate() {
            let number = index + 1;
            if is_blank_document(source) {
                continue;
            }
            let parsed: Value = serde_yaml::from_str(source).map_err(|error| RenderError::Syntax {
                document: number,
                message: error.to_string(),
            })?;
            let parsed = match parsed {
                Value::Null => continue,
                // A JSON array at the top level lists several documents.
                Value::Array(items) => items,
                other => vec![other],
            };
            for document in parsed {
                if !document.is_object() {
                    return Err(RenderError::Syntax {
                        document: number,
                        message: "document must be a mapping".into(),
                    });
                }
                let mut location = Vec::new();
                documents.push(interpolate_value(&document, bindings, number, &mut location)?);
            }
        }
        Ok(documents)
    }
}

/// Split on `---` separator lines. Leading blank or comment-only segments are kept so that
/// document numbers in errors match what the author sees.
fn split_documents(text: &str) -> Vec<&str> {
    let mut documents = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let content = line.trim_end();
        if content == "---" || content.starts_with("--- ") {
            documents.push(&text[start..offset]);
            start = offset + line.len();
        }
        offset += line.len();
    }
    documents.push(&text[start..]);
    // A leading separator produces an empty first segment that is not a document.
    if documents.first().is_some_and(|first| first.trim().is_empty()) && documents.len() > 1 {
        documents.remove(0);
    }
    documents
}

fn is_blank_document(source: &str) -> bool {
    source.lines().map(str::trim).all(|line| line.is_empty() || line.starts_with('#'))
}

fn interpolate_value(value: &Value, bindings: &Bindings, document: usize, location: &mut Vec<String>) -> Result<Value, RenderError> {
    match value {
        Value::String(text) => interpolate_string(text, bindings, document, location),
        Value::Array(items) => {
            let mut rendered = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                location.push(index.to_string());
                rendered.push(interpolate_value(item, bindings, document, location)?);
                location.pop();
            }
            Ok(Value::Array(rendered))
        }
        Value::Object(members) => {
            let mut rendered = Map::new();
            for (name, member) in members {
                location.push(name.clone());
                let key = match interpolate_string(name, bindings, document, location)? {
                    Value::String(key) => key,
                    other => format_json_value(&other),
                };
                let member = interpolate_value(member, bindings, document, location)?;
                location.pop();
                rendered.insert(key, member);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

fn interpolate_string(text: &str, bindings: &Bindings, document: usize, location: &[String]) -> Result<Value, RenderError> {
    if !text.contains(EXPRESSION_OPEN) {
        return Ok(Value::String(text.to_string()));
    }

    // Whole-scalar expression keeps the bound value's JSON type.
    let trimmed = text.trim();
    if let Some(inner) = trimmed.strip_prefix(EXPRESSION_OPEN).and_then(|rest| rest.strip_suffix(EXPRESSION_CLOSE))
        && !inner.contains(EXPRESSION_OPEN)
        && !inner.contains(EXPRESSION_CLOSE)
    {
        return resolve_expression(inner.trim(), bindings, document, location);
    }

    let mut output = String::new();
    let mut remaining = text;
    while let Some(start) = remaining.find(EXPRESSION_OPEN) {
        let (before, after) = remaining.split_at(start);
        output.push_str(before);
        let Some(end) = after.find(EXPRESSION_CLOSE) else {
            return Err(RenderError::Syntax {
                document,
                message: format!("unterminated expression at {}", join_location(location)),
            });
        };
        let expression = after[EXPRESSION_OPEN.len()..end].trim();
        let value = resolve_expression(expression, bindings, document, location)?;
        output.push_str(&format_json_value(&value));
        remaining = &after[end + EXPRESSION_CLOSE.len()..];
    }
    output.push_str(remaining);
    Ok(Value::String(output))
}

fn resolve_expression(expression: &str, bindings: &Bindings, document: usize, location: &[String]) -> Result<Value, RenderError> {
    let path = expression.strip_prefix("bindings.").unwrap_or(expression);
    if path.is_empty() || path.split('.').any(|segment| segment.trim().is_empty()) {
        return Err(RenderError::Syntax {
            document,
            message: format!("malformed expression '{expression}' at {}", join_location(location)),
        });
    }

    let undefined = || RenderError::UndefinedVariable {
        name: path.to_string(),
        document,
        location: join_location(location),
    };
    let mut segments = path.split('.');
    let name = segments.next().unwrap_or_default();
    let mut current = bindings.get(name).ok_or_else(undefined)?;
    for segment in segments {
        current = match current {
            Value::Object(members) => members.get(segment).ok_or_else(undefined)?,
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index))
                .ok_or_else(undefined)?,
            _ => return Err(undefined()),
        };
    }
    Ok(current.clone())
}

fn format_json_value(value: &Value) -> String {
    match value {
        Value::String(string_value) => string_value.clone(),
        Value::Number(number_value) => number_value.to_string(),
        Value::Bool(boolean_value) => boolean_value.to_string(),
        Value::Null => String::new(),
        other_value => other_value.to_string(),
    }
}

fn join_location(location: &[String]) -> String {
    if location.is_empty() { "<root>".to_string() } else { location.join(".") }
}

/// Identity of every rendered document, in order.
pub fn document_keys(documents: &[Value]) -> Result<Vec<ObjectKey>, RenderError> {
    documents
        .iter()
        .enumerate()
        .map(|(index, document)| {
            ObjectKey::from_document(document).map_err(|source| RenderError::MissingIdentity { document: index + 1, source })
        })
        .collect()
}
