//! Parsing the handful of manifest attributes the scan engine consumes.
//!
//! The manifest format itself (`META-INF/MANIFEST.MF`) is a simple
//! `Key: Value` text format with continuation lines that begin with a
//! single space. This module only unfolds that much of it and extracts
//! the three attributes named in §6: `Class-Path` (cross-reference),
//! `Add-Exports`, `Add-Opens`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    /// Cross-reference entries, named relative to the archive's parent
    /// directory (§4.3 step 5).
    pub class_path: Vec<String>,
    pub add_exports: Vec<String>,
    pub add_opens: Vec<String>,
}

/// Un-folds manifest continuation lines (a line starting with a single
/// space continues the previous line, with the leading space dropped) and
/// returns one logical line per attribute.
fn unfold_lines(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw_line in text.lines() {
        if let Some(continuation) = raw_line.strip_prefix(' ') {
            if let Some(last) = lines.last_mut() {
                last.push_str(continuation);
                continue;
            }
        }
        lines.push(raw_line.to_string());
    }
    lines
}

fn attribute_value<'a>(lines: &'a [String], key: &str) -> Option<&'a str> {
    let prefix = format!("{key}: ");
    lines
        .iter()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
}

fn split_tokens(value: &str) -> Vec<String> {
    value
        .split_whitespace()
        .map(|token| token.to_string())
        .collect()
}

/// Parses the main-section attributes of a manifest's raw bytes.
pub fn parse_manifest(bytes: &[u8]) -> Manifest {
    let text = String::from_utf8_lossy(bytes);
    let lines = unfold_lines(&text);

    Manifest {
        class_path: attribute_value(&lines, "Class-Path")
            .map(split_tokens)
            .unwrap_or_default(),
        add_exports: attribute_value(&lines, "Add-Exports")
            .map(split_tokens)
            .unwrap_or_default(),
        add_opens: attribute_value(&lines, "Add-Opens")
            .map(split_tokens)
            .unwrap_or_default(),
    }
}

/// Appends the `=ALL-UNNAMED` sentinel used when forwarding `Add-Exports`/
/// `Add-Opens` tokens to the scan spec's module-path info (§4.3 step 5,
/// §6).
pub fn with_all_unnamed_sentinel(token: &str) -> String {
    format!("{token}=ALL-UNNAMED")
}
