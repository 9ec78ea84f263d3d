//! Recovers a well-formed JSON object from a raw, possibly malformed
//! generator response.
//!
//! The generator is not contractually reliable about output purity: responses
//! arrive wrapped in markdown fences, prefixed with narrative text, truncated
//! mid-object, or with `NULL` casing and missing commas. The repair chain is
//! an ordered list of pure `text -> text` fixes, cheapest and most common
//! first, with an explicit terminal parse attempt. It never guesses numeric
//! values.

use crate::error::{ExtractError, Result};
use log::debug;
use serde_json::{Map, Value};

/// Boilerplate prefixes the generator tends to prepend. Checked in order,
/// exact match, at most one removal.
pub const DEFAULT_PREFIXES: &[&str] = &[
    "Here's the JSON:",
    "Here is the JSON:",
    "JSON:",
    "Output:",
    "Result:",
];

#[derive(Debug, Clone)]
pub struct RepairOptions {
    pub prefixes: Vec<String>,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            prefixes: DEFAULT_PREFIXES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Parses a raw generator response into a key-ordered JSON object, applying
/// the default repair chain.
pub fn parse_response(raw: &str) -> Result<Map<String, Value>> {
    parse_response_with(raw, &RepairOptions::default())
}

pub fn parse_response_with(raw: &str, options: &RepairOptions) -> Result<Map<String, Value>> {
    let cleaned = strip_fenced_block(raw.trim());
    let cleaned = strip_known_prefix(cleaned, &options.prefixes).trim();

    if let Ok(obj) = parse_object(cleaned) {
        return Ok(obj);
    }

    if let Some(block) = extract_object_block(cleaned) {
        if let Ok(obj) = parse_object(block) {
            debug!("recovered object by brace extraction ({} bytes)", block.len());
            return Ok(obj);
        }
    }

    // Forgiving textual repairs, then one more round of parse attempts.
    let repaired = insert_missing_commas(&lowercase_null_tokens(cleaned));
    if let Ok(obj) = parse_object(&repaired) {
        debug!("recovered object after textual repair");
        return Ok(obj);
    }
    if let Some(block) = extract_object_block(&repaired) {
        if let Ok(obj) = parse_object(block) {
            debug!("recovered object after textual repair and brace extraction");
            return Ok(obj);
        }
    }

    Err(ExtractError::MalformedResponse { residual: repaired })
}

fn parse_object(text: &str) -> std::result::Result<Map<String, Value>, serde_json::Error> {
    use serde::de::Error;
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        _ => Err(serde_json::Error::custom("top-level value is not an object")),
    }
}

/// Strips an enclosing fenced block. A lone opening fence (truncated output)
/// or a lone trailing fence is stripped as well.
fn strip_fenced_block(text: &str) -> &str {
    let mut t = text.trim();
    if let Some(rest) = t.strip_prefix("```json") {
        t = rest.trim_start();
    } else if let Some(rest) = t.strip_prefix("```") {
        t = rest.trim_start();
    }
    if let Some(rest) = t.trim_end().strip_suffix("```") {
        t = rest;
    }
    t.trim()
}

fn strip_known_prefix<'a>(text: &'a str, prefixes: &[String]) -> &'a str {
    for prefix in prefixes {
        if let Some(rest) = text.strip_prefix(prefix.as_str()) {
            return rest.trim_start();
        }
    }
    text
}

/// Finds the first balanced `{...}` block, counting depth while skipping
/// braces inside quoted strings.
fn extract_object_block(text: &str) -> Option<&str> {
    let mut start = None;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' if start.is_some() => in_string = true,
            '{' => {
                if start.is_none() {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        return start.map(|s| &text[s..idx + 1]);
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// Rewrites any standalone `NULL`/`Null` token outside quoted strings to the
/// lowercase JSON literal.
fn lowercase_null_tokens(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut word = String::new();
    let mut in_string = false;
    let mut escaped = false;

    let flush = |out: &mut String, word: &mut String| {
        if !word.is_empty() {
            if word.eq_ignore_ascii_case("null") {
                out.push_str("null");
            } else {
                out.push_str(word);
            }
            word.clear();
        }
    };

    for ch in text.chars() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        if ch.is_ascii_alphabetic() {
            word.push(ch);
            continue;
        }
        flush(&mut out, &mut word);
        if ch == '"' {
            in_string = true;
        }
        out.push(ch);
    }
    flush(&mut out, &mut word);
    out
}

/// Inserts a missing comma between a value token at the end of one line and a
/// quoted key opening the next.
fn insert_missing_commas(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());

    for (i, line) in lines.iter().enumerate() {
        let next_starts_key = lines[i + 1..]
            .iter()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim_start().starts_with('"'))
            .unwrap_or(false);

        if next_starts_key && ends_with_value_token(line) {
            out.push(format!("{},", line.trim_end()));
        } else {
            out.push((*line).to_string());
        }
    }
    out.join("\n")
}

fn ends_with_value_token(line: &str) -> bool {
    let t = line.trim_end();
    if t.ends_with(',') || t.ends_with('{') || t.ends_with('[') || t.ends_with(':') {
        return false;
    }
    t.ends_with(|c: char| c.is_ascii_digit())
        || t.ends_with('"')
        || t.ends_with('}')
        || t.ends_with(']')
        || t.ends_with("null")
        || t.ends_with("true")
        || t.ends_with("false")
}
