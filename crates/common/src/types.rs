use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// What sort of atom a state entry was captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtomKind {
    #[default]
    Primitive,
    Computed,
    Writable,
}

/// One atom's captured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub value: Value,
    pub kind: AtomKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atom_id: Option<String>,
}

impl StateEntry {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            value,
            kind: AtomKind::Primitive,
            name: name.into(),
            atom_id: None,
        }
    }

    pub fn with_kind(mut self, kind: AtomKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_atom_id(mut self, atom_id: impl Into<String>) -> Self {
        self.atom_id = Some(atom_id.into());
        self
    }
}

/// Atom name to captured entry. BTreeMap for deterministic iteration.
pub type StateMap = BTreeMap<String, StateEntry>;

/// Rough in-memory cost of a value, in bytes.
///
/// This is an estimate for compression thresholds, not an exact measure:
/// strings and arrays scale with their length, objects with their serialized
/// length, everything else is a fixed cost.
pub fn estimate_value_size(value: &Value) -> usize {
    const FIXED: usize = 8;
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => FIXED,
        Value::String(s) => s.len() * 2,
        Value::Array(items) => items.len() * FIXED,
        Value::Object(_) => serde_json::to_string(value)
            .map(|s| s.len())
            .unwrap_or(FIXED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entry_builder_sets_fields() {
        let e = StateEntry::new("count", json!(1))
            .with_kind(AtomKind::Writable)
            .with_atom_id("atom-1");
        assert_eq!(e.name, "count");
        assert_eq!(e.kind, AtomKind::Writable);
        assert_eq!(e.atom_id.as_deref(), Some("atom-1"));
    }

    #[test]
    fn size_estimate_scales_with_content() {
        assert_eq!(estimate_value_size(&json!(42)), 8);
        assert_eq!(estimate_value_size(&json!("abcd")), 8);
        assert_eq!(estimate_value_size(&json!([1, 2, 3])), 24);
        assert_eq!(estimate_value_size(&json!({"a": 1})), r#"{"a":1}"#.len());
    }

    #[test]
    fn kind_serializes_lowercase() {
        let s = serde_json::to_string(&AtomKind::Computed).unwrap();
        assert_eq!(s, "\"computed\"");
    }
}
