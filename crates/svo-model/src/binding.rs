//! Data binding between steps
//!
//! Step payloads may contain `${key.segment...}` references that are resolved
//! against the run's execution state right before dispatch. A string that is
//! exactly one reference is replaced by the referenced JSON value; references
//! embedded in longer strings are rendered as text.

use crate::error::BindingError;
use crate::ids::StepId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Key prefix under which plan variables are seeded
pub const VARIABLES_PREFIX: &str = "vars";

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("reference pattern is valid"))
}

/// Shared key→value state visible to later steps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    values: BTreeMap<String, Value>,
}

impl ExecutionState {
    /// Create empty state
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Get a value by exact key
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Whether a reference resolves
    #[inline]
    #[must_use]
    pub fn contains(&self, reference: &str) -> bool {
        self.lookup(reference).is_some()
    }

    /// Number of top-level keys
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no keys are present
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate keys in order
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Seed plan variables under `vars.<name>`
    pub fn seed_variables(&mut self, variables: &BTreeMap<String, Value>) {
        for (name, value) in variables {
            self.insert(format!("{VARIABLES_PREFIX}.{name}"), value.clone());
        }
    }

    /// Store a completed step's captured output
    pub fn record_step_output(&mut self, step: &StepId, output: Value, status_code: Option<u16>) {
        self.insert(format!("{step}.output"), output);
        if let Some(code) = status_code {
            self.insert(format!("{step}.status"), Value::from(code));
        }
    }

    /// Resolve a dotted reference
    ///
    /// The longest dotted prefix present as a key wins; the remaining
    /// segments walk object fields and array indices.
    #[must_use]
    pub fn lookup(&self, reference: &str) -> Option<&Value> {
        let segments: Vec<&str> = reference.trim().split('.').collect();
        for split in (1..=segments.len()).rev() {
            let key = segments[..split].join(".");
            if let Some(root) = self.values.get(&key) {
                return walk(root, segments[split..].iter().copied());
            }
        }
        None
    }

    /// Resolve every reference inside `value`
    ///
    /// # Errors
    /// `BindingError::Unresolved` listing all references with no value.
    pub fn bind(&self, value: &Value) -> Result<Value, BindingError> {
        let mut missing = Vec::new();
        let bound = self.bind_value(value, &mut missing);
        if missing.is_empty() {
            Ok(bound)
        } else {
            Err(BindingError::Unresolved { references: missing })
        }
    }

    fn bind_value(&self, value: &Value, missing: &mut Vec<String>) -> Value {
        match value {
            Value::String(text) => self.bind_str(text, missing),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.bind_value(v, missing)).collect())
            }
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), self.bind_value(v, missing)))
                    .collect::<Map<_, _>>(),
            ),
            other => other.clone(),
        }
    }

    fn bind_str(&self, text: &str, missing: &mut Vec<String>) -> Value {
        let pattern = reference_pattern();

        if let Some(whole) = pattern.find(text) {
            if whole.start() == 0 && whole.end() == text.len() {
                let reference = &text[2..text.len() - 1];
                return match self.lookup(reference) {
                    Some(found) => found.clone(),
                    None => {
                        push_unique(missing, reference);
                        Value::String(text.to_string())
                    }
                };
            }
        }

        let mut rendered = String::with_capacity(text.len());
        let mut last = 0;
        for caps in pattern.captures_iter(text) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            rendered.push_str(&text[last..whole.start()]);
            match self.lookup(inner.as_str()) {
                Some(Value::String(s)) => rendered.push_str(s),
                Some(other) => rendered.push_str(&other.to_string()),
                None => {
                    push_unique(missing, inner.as_str());
                    rendered.push_str(whole.as_str());
                }
            }
            last = whole.end();
        }
        rendered.push_str(&text[last..]);
        Value::String(rendered)
    }
}

fn push_unique(missing: &mut Vec<String>, reference: &str) {
    if !missing.iter().any(|m| m == reference) {
        missing.push(reference.to_string());
    }
}

/// Walk object fields / array indices from `root`
pub fn walk<'a, 'b>(root: &'a Value, segments: impl IntoIterator<Item = &'b str>) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        if segment.is_empty() {
            continue;
        }
        current = match current {
            Value::Object(fields) => fields.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Look up a dotted path inside a value (empty path is the root)
#[inline]
#[must_use]
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    walk(root, path.split('.'))
}

/// Collect every `${...}` reference inside `value`, deduplicated, in order
#[must_use]
pub fn references(value: &Value) -> Vec<String> {
    let mut found = Vec::new();
    collect_references(value, &mut found);
    found
}

fn collect_references(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            for caps in reference_pattern().captures_iter(text) {
                if let Some(inner) = caps.get(1) {
                    push_unique(found, inner.as_str().trim());
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_references(v, found)),
        Value::Object(fields) => fields.values().for_each(|v| collect_references(v, found)),
        _ => {}
    }
}
