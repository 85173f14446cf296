//! Change Detection
//!
//! Field-level comparison between a desired partial settings mapping and the
//! live state of a repository, branch protection or label.
//!
//! Every reconciler builds a [`Fields`] mapping of what it wants and asks
//! [`has_changes`] whether the live state already matches, so repeated runs
//! against an up-to-date repository issue no writes at all.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// A single settings value as sent to or read from the repository store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
    Null,
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(value) => write!(f, "{}", value),
            FieldValue::Int(value) => write!(f, "{}", value),
            FieldValue::Str(value) => write!(f, "{:?}", value),
            FieldValue::List(values) => write!(f, "[{}]", values.join(", ")),
            FieldValue::Null => write!(f, "null"),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(values: Vec<String>) -> Self {
        FieldValue::List(values)
    }
}

impl From<Option<String>> for FieldValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(FieldValue::Null, FieldValue::Str)
    }
}

/// Flat field name to value mapping, ordered by field name
pub type Fields = BTreeMap<String, FieldValue>;

/// Uniform read access to a named field of some live state
///
/// `None` means the field cannot be read, which always counts as a change.
pub trait FieldSource {
    fn field(&self, name: &str) -> Option<FieldValue>;
}

impl FieldSource for Fields {
    fn field(&self, name: &str) -> Option<FieldValue> {
        self.get(name).cloned()
    }
}

impl<T: FieldSource> FieldSource for Option<T> {
    fn field(&self, name: &str) -> Option<FieldValue> {
        self.as_ref().and_then(|source| source.field(name))
    }
}

impl<T: FieldSource + ?Sized> FieldSource for &T {
    fn field(&self, name: &str) -> Option<FieldValue> {
        (**self).field(name)
    }
}

/// Report whether any desired field differs from the current state
///
/// An empty `desired` mapping never reports a change, whatever `current` is.
pub fn has_changes<S: FieldSource + ?Sized>(desired: &Fields, current: &S) -> bool {
    desired
        .iter()
        .any(|(name, value)| current.field(name).as_ref() != Some(value))
}

/// Names of the desired fields that differ from the current state
///
/// Used for progress output; [`has_changes`] is the authoritative predicate.
pub fn changed_fields<S: FieldSource + ?Sized>(desired: &Fields, current: &S) -> Vec<String> {
    desired
        .iter()
        .filter(|(name, value)| current.field(name).as_ref() != Some(*value))
        .map(|(name, _)| name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(entries: &[(&str, FieldValue)]) -> Fields {
        entries
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_empty_desired_is_never_a_change() {
        assert!(!has_changes(&Fields::new(), &fields(&[("old", "old".into())])));
        assert!(!has_changes(&Fields::new(), &Fields::new()));
        assert!(!has_changes(&Fields::new(), &None::<Fields>));
    }

    #[test]
    fn test_missing_key_is_a_change() {
        let desired = fields(&[("missing", "new".into())]);
        assert!(has_changes(&desired, &fields(&[("old", "old".into())])));
        assert!(has_changes(&desired, &None::<Fields>));
    }

    #[test]
    fn test_different_value_is_a_change() {
        let desired = fields(&[("same", "new".into())]);
        assert!(has_changes(&desired, &fields(&[("same", "old".into())])));
    }

    #[test]
    fn test_equal_values_are_unchanged() {
        let desired = fields(&[("old", "old".into()), ("count", 2i64.into())]);
        let current = fields(&[
            ("old", "old".into()),
            ("count", 2i64.into()),
            ("extra", true.into()),
        ]);
        assert!(!has_changes(&desired, &current));
    }

    #[test]
    fn test_comparison_is_strict() {
        // 1 and true are different values
        let desired = fields(&[("flag", true.into())]);
        assert!(has_changes(&desired, &fields(&[("flag", 1i64.into())])));

        // list order matters
        let desired = fields(&[("users", vec!["a".to_string(), "b".to_string()].into())]);
        let current = fields(&[("users", vec!["b".to_string(), "a".to_string()].into())]);
        assert!(has_changes(&desired, &current));
    }

    #[test]
    fn test_changed_fields_lists_only_differences() {
        let desired = fields(&[("a", true.into()), ("b", false.into()), ("c", 3i64.into())]);
        let current = fields(&[("a", true.into()), ("b", true.into())]);
        assert_eq!(changed_fields(&desired, &current), vec!["b", "c"]);
    }

    #[test]
    fn test_field_value_display() {
        assert_eq!(FieldValue::from(true).to_string(), "true");
        assert_eq!(FieldValue::from("x").to_string(), "\"x\"");
        assert_eq!(
            FieldValue::from(vec!["a".to_string(), "b".to_string()]).to_string(),
            "[a, b]"
        );
        assert_eq!(FieldValue::from(None::<String>).to_string(), "null");
    }
}
