//! Ruleset variable values.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Ruleset variable values keyed by variable id.
///
/// Used both for the live variables of a request and for the snapshot of
/// variable values a data source was computed with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RulesetVariables(BTreeMap<String, Value>);

impl RulesetVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(id, value);
        self
    }

    pub fn set(&mut self, id: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(id.into(), value.into());
    }

    pub fn get(&self, id: &str) -> Option<&Value> {
        self.0.get(id)
    }

    /// Value of `id`, with absent variables reading as null
    pub fn value_or_null(&self, id: &str) -> Value {
        self.0.get(id).cloned().unwrap_or(Value::Null)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Add all entries of `other`, overwriting existing ones
    pub fn merge(&mut self, other: &RulesetVariables) {
        for (id, value) in &other.0 {
            self.0.insert(id.clone(), value.clone());
        }
    }

    /// Whether every entry of `other` is present here with an equal value
    pub fn contains(&self, other: &RulesetVariables) -> bool {
        other
            .0
            .iter()
            .all(|(id, value)| self.value_or_null(id) == *value)
    }

    /// Snapshot of the given variable ids as currently set here
    pub fn snapshot<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> RulesetVariables {
        let mut snapshot = RulesetVariables::new();
        for id in ids {
            snapshot.set(id, self.value_or_null(id));
        }
        snapshot
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json_str(value: &str) -> serde_json::Result<Self> {
        serde_json::from_str(value)
    }
}

impl FromIterator<(String, Value)> for RulesetVariables {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
