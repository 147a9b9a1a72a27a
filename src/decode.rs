//! Line decoder: JSON text -> [`Post`], with `extended_entities` folded into
//! `entities` and helpers for normalizing source timestamps.

use crate::model::Post;
use serde_json::{Map, Value};
use std::collections::HashSet;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("record does not match the post shape: {0}")]
    Invalid(#[source] serde_json::Error),
    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),
}

/// Decode one non-blank JSONL line.
pub fn decode_post(line: &str) -> Result<Post, DecodeError> {
    let mut value: Value = serde_json::from_str(line).map_err(DecodeError::Malformed)?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject(json_kind(&value)));
    }
    merge_extended_entities(&mut value);
    serde_json::from_value(value).map_err(DecodeError::Invalid)
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Fold `extended_entities` into `entities` on the record and on every embedded
/// quoted/retweeted record.
pub fn merge_extended_entities(root: &mut Value) {
    let mut pending: Vec<&mut Value> = vec![root];
    while let Some(node) = pending.pop() {
        let Some(obj) = node.as_object_mut() else { continue };
        if let Some(extended) = obj.remove("extended_entities") {
            let base = obj.remove("entities").unwrap_or(Value::Null);
            obj.insert("entities".to_string(), merge_entity_maps(base, extended));
        }
        for (key, child) in obj.iter_mut() {
            if key == "quoted_status" || key == "retweeted_status" {
                pending.push(child);
            }
        }
    }
}

/// List values are concatenated (base first) and de-duplicated by `id` where items
/// carry one; any other value from `extended` replaces the base value.
fn merge_entity_maps(base: Value, extended: Value) -> Value {
    let extended = match extended {
        Value::Object(m) if !m.is_empty() => m,
        _ => return if base.is_null() { Value::Object(Map::new()) } else { base },
    };
    let mut merged = match base {
        Value::Object(m) if !m.is_empty() => m,
        _ => return Value::Object(extended),
    };

    for (key, ext_val) in extended {
        match ext_val {
            Value::Array(ext_items) => {
                let base_items = match merged.remove(&key) {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                let mut seen: HashSet<String> = HashSet::new();
                let mut out = Vec::with_capacity(base_items.len() + ext_items.len());
                for item in base_items.into_iter().chain(ext_items) {
                    match item.get("id").map(|id| id.to_string()) {
                        Some(id) => {
                            if seen.insert(id) {
                                out.push(item);
                            }
                        }
                        None => out.push(item),
                    }
                }
                merged.insert(key, Value::Array(out));
            }
            other => {
                merged.insert(key, other);
            }
        }
    }
    Value::Object(merged)
}

/// Convert a source timestamp (`Mon Aug 10 05:11:31 +0000 2020`) to RFC3339.
/// Values already in RFC3339 are passed through normalized. Returns `None`
/// for empty or unparseable input.
pub fn to_rfc3339(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = OffsetDateTime::parse(raw, &Rfc3339) {
        return dt.format(&Rfc3339).ok();
    }
    let fmt = format_description!(
        "[weekday repr:short] [month repr:short] [day] [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute] [year]"
    );
    OffsetDateTime::parse(raw, fmt)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
}
