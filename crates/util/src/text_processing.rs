//! # Text Processing Utilities
//!
//! Helpers for normalizing inline documents and for keeping diagnostic messages short.

/// Remove the common leading indentation from every non-blank line and trim surrounding
/// blank lines.
///
/// Inline templates are usually written as indented raw strings inside test code; YAML is
/// indentation-sensitive, so the shared margin has to go before the text is parsed.
///
/// # Example
/// ```rust
/// use settle_util::dedent;
///
/// let text = "
///     apiVersion: v1
///     kind: ConfigMap
///     metadata:
///       name: demo
/// ";
/// assert_eq!(dedent(text), "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: demo");
/// ```
pub fn dedent(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let margin = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start_matches([' ', '\t']).len())
        .min()
        .unwrap_or(0);

    let stripped: Vec<&str> = lines
        .iter()
        .map(|line| if line.trim().is_empty() { "" } else { &line[margin..] })
        .collect();

    let first = stripped.iter().position(|line| !line.is_empty()).unwrap_or(stripped.len());
    let last = stripped.iter().rposition(|line| !line.is_empty()).map(|index| index + 1).unwrap_or(first);
    stripped[first..last]
        .iter()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Single-line preview of `text`, at most `limit` bytes before an ellipsis.
pub fn preview(text: &str, limit: usize) -> String {
    let mut preview = String::new();
    for character in text.chars() {
        if preview.len() >= limit {
            preview.push_str("...");
            break;
        }
        match character {
            '\n' | '\r' | '\t' => {
                if !preview.ends_with(' ') {
                    preview.push(' ');
                }
            }
            _ => preview.push(character),
        }
    }

    preview.trim().to_string()
}

/// True when `text` reads as a path to a YAML or JSON document rather than a document body.
pub fn looks_like_document_path(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.contains('\n') || trimmed.contains(": ") {
        return false;
    }
    let lowercase = trimmed.to_ascii_lowercase();
    [".yaml", ".yml", ".json"].iter().any(|extension| lowercase.ends_with(extension))
}
