//! SQL template validation.
//!
//! A template names its bind parameters with `:identifier` placeholders.
//! The placeholders found in the template are the parameters a caller must
//! supply; anything else the caller sends is dropped before binding.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Map;

use crate::error::{ExecutionError, Result};
use crate::value::JsonValue;

/// Raw request parameters (the `params` object of an execute request).
pub type RawParams = Map<String, JsonValue>;

/// A colon that is not part of `::`, not glued to a preceding word and not
/// escaped, followed by a word.
static PLACEHOLDER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^:\w\\]):(\w+)").expect("placeholder pattern is valid"));

/// One placeholder occurrence in a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Occurrence<'a> {
    name: &'a str,
    /// Byte offset of the leading colon
    start: usize,
    /// Byte offset just past the name
    end: usize,
}

fn occurrences(template: &str) -> impl Iterator<Item = Occurrence<'_>> {
    PLACEHOLDER_REGEX
        .captures_iter(template)
        .filter_map(move |caps| {
            let name = caps.get(1)?;
            // `:a:` is a token, not a placeholder; `:a::int` is a cast one
            let rest = &template[name.end()..];
            if rest.starts_with(':') && !rest.starts_with("::") {
                return None;
            }
            Some(Occurrence {
                name: name.as_str(),
                start: name.start() - 1,
                end: name.end(),
            })
        })
}

/// Distinct placeholder names in order of first appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for occurrence in occurrences(template) {
        if seen.insert(occurrence.name) {
            names.push(occurrence.name.to_string());
        }
    }
    names
}

/// A validated template with the parameters it actually references.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedQuery {
    /// The template, unchanged
    pub sql: String,
    /// Supplied parameters restricted to the template's placeholders
    pub params: RawParams,
    /// Placeholder names in order of first appearance
    pub placeholders: Vec<String>,
}

/// Check that every placeholder has a value and drop unreferenced params.
///
/// Fails with `MissingParameter` naming every missing placeholder.
pub fn prepare(template: &str, raw_params: &RawParams) -> Result<PreparedQuery> {
    let names = placeholders(template);

    let mut missing: Vec<String> = names
        .iter()
        .filter(|name| !raw_params.contains_key(name.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        missing.sort();
        return Err(ExecutionError::MissingParameter { names: missing });
    }

    let params: RawParams = raw_params
        .iter()
        .filter(|(key, _)| names.iter().any(|name| name == *key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(PreparedQuery {
        sql: template.to_string(),
        params,
        placeholders: names,
    })
}

/// Rewrite `:name` placeholders to `$1, $2, ...` for positional protocols.
///
/// Returns the rewritten SQL and the parameter name for each position.
/// Repeated names reuse their first position.
pub fn rewrite_positional(template: &str) -> (String, Vec<String>) {
    let mut sql = String::with_capacity(template.len());
    let mut order: Vec<String> = Vec::new();
    let mut cursor = 0;

    for occurrence in occurrences(template) {
        let position = match order.iter().position(|name| name == occurrence.name) {
            Some(index) => index + 1,
            None => {
                order.push(occurrence.name.to_string());
                order.len()
            }
        };
        sql.push_str(&template[cursor..occurrence.start]);
        sql.push('$');
        sql.push_str(&position.to_string());
        cursor = occurrence.end;
    }
    sql.push_str(&template[cursor..]);

    (sql, order)
}

/// Rewrite `:name` placeholders to anonymous `?` markers.
///
/// Returns the parameter name for every marker, so repeated names appear
/// once per occurrence.
pub fn rewrite_anonymous(template: &str) -> (String, Vec<String>) {
    let mut sql = String::with_capacity(template.len());
    let mut order = Vec::new();
    let mut cursor = 0;

    for occurrence in occurrences(template) {
        sql.push_str(&template[cursor..occurrence.start]);
        sql.push('?');
        order.push(occurrence.name.to_string());
        cursor = occurrence.end;
    }
    sql.push_str(&template[cursor..]);

    (sql, order)
}
