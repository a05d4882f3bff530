//! Hypothesis tree state
//!
//! Keeps the latest merged hypothesis tree per user. The tree is an opaque
//! JSON object produced by the model; this module only enforces the merge
//! rule: replace wholesale on a valid object candidate, keep the prior tree
//! untouched on anything else. A malformed model response must never erase
//! accumulated diagnostic state, only fail to advance it.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// Opaque hypothesis tree payload
pub type Tree = Map<String, Value>;

/// Storage seam for per-user trees. In-memory in production today; the trait
/// exists so the state can move to a shared cache without touching callers.
pub trait TreeStore: Send + Sync {
    fn load(&self, user_id: i64) -> Option<Tree>;
    fn store(&self, user_id: i64, tree: Tree);
    fn remove(&self, user_id: i64);
}

/// Process-local tree store
#[derive(Default)]
pub struct InMemoryTreeStore {
    trees: Mutex<HashMap<i64, Tree>>,
}

impl TreeStore for InMemoryTreeStore {
    fn load(&self, user_id: i64) -> Option<Tree> {
        self.trees.lock().unwrap().get(&user_id).cloned()
    }

    fn store(&self, user_id: i64, tree: Tree) {
        self.trees.lock().unwrap().insert(user_id, tree);
    }

    fn remove(&self, user_id: i64) {
        self.trees.lock().unwrap().remove(&user_id);
    }
}

/// Per-user hypothesis tree state with the merge-or-discard rule
#[derive(Clone)]
pub struct HypothesisTrees {
    store: Arc<dyn TreeStore>,
}

impl HypothesisTrees {
    pub fn new(store: Arc<dyn TreeStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryTreeStore::default()))
    }

    /// Current tree for the user; empty object when absent
    pub fn get(&self, user_id: i64) -> Tree {
        self.store.load(user_id).unwrap_or_default()
    }

    /// Unconditional wholesale replace
    pub fn set(&self, user_id: i64, tree: Tree) {
        self.store.store(user_id, tree);
    }

    /// Reset to the empty tree
    pub fn clear(&self, user_id: i64) {
        self.store.remove(user_id);
    }

    /// Merge a candidate tree out of raw model text.
    ///
    /// Extracts a ```json fenced payload (falling back to the whole text),
    /// parses it, and replaces the stored tree only when the result is a JSON
    /// object. Otherwise the previous tree is kept and returned unchanged;
    /// the discard is logged but never surfaced as an error.
    pub fn merge_from_model_output(&self, user_id: i64, raw: &str) -> Tree {
        let candidate = extract_json_payload(raw);

        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(tree)) => {
                self.set(user_id, tree.clone());
                tree
            }
            Ok(other) => {
                tracing::warn!(
                    user_id,
                    kind = value_kind(&other),
                    "hypothesis candidate is not an object, keeping previous tree"
                );
                self.get(user_id)
            }
            Err(e) => {
                tracing::warn!(
                    user_id,
                    error = %e,
                    "hypothesis candidate is not valid JSON, keeping previous tree"
                );
                self.get(user_id)
            }
        }
    }
}

/// Pull the payload out of a ```json fenced block; the whole text is the
/// candidate when no fence is present.
fn extract_json_payload(raw: &str) -> &str {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)```json\s*(.*?)\s*```").unwrap()
    });

    match fence.captures(raw) {
        Some(caps) => caps.get(1).map_or(raw, |m| m.as_str()).trim(),
        None => raw.trim(),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree_of(value: Value) -> Tree {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_get_returns_empty_tree_when_absent() {
        let trees = HypothesisTrees::in_memory();
        assert!(trees.get(1).is_empty());
    }

    #[test]
    fn test_merge_fenced_json_replaces_tree() {
        let trees = HypothesisTrees::in_memory();
        let raw = "Вот обновлённое дерево:\n```json\n{\"title\":\"x\"}\n```\nГотово.";

        let merged = trees.merge_from_model_output(7, raw);
        assert_eq!(merged, tree_of(json!({"title": "x"})));
        assert_eq!(trees.get(7), tree_of(json!({"title": "x"})));
    }

    #[test]
    fn test_merge_bare_json_without_fence() {
        let trees = HypothesisTrees::in_memory();
        let merged = trees.merge_from_model_output(7, r#"{"status":"в работе"}"#);
        assert_eq!(merged, tree_of(json!({"status": "в работе"})));
    }

    #[test]
    fn test_invalid_json_keeps_previous_tree() {
        let trees = HypothesisTrees::in_memory();
        trees.set(7, tree_of(json!({"title": "prior"})));

        let before = trees.get(7);
        let merged = trees.merge_from_model_output(7, "sorry, I can't do that");
        assert_eq!(merged, before);
        assert_eq!(trees.get(7), before);
    }

    #[test]
    fn test_array_candidate_keeps_previous_tree() {
        let trees = HypothesisTrees::in_memory();
        trees.set(7, tree_of(json!({"title": "prior"})));

        let merged = trees.merge_from_model_output(7, "```json\n[1, 2, 3]\n```");
        assert_eq!(merged, tree_of(json!({"title": "prior"})));
    }

    #[test]
    fn test_clear_resets_to_empty() {
        let trees = HypothesisTrees::in_memory();
        trees.set(7, tree_of(json!({"title": "x"})));
        trees.clear(7);
        assert!(trees.get(7).is_empty());
    }

    #[test]
    fn test_trees_are_isolated_per_user() {
        let trees = HypothesisTrees::in_memory();
        trees.set(1, tree_of(json!({"a": 1})));
        trees.set(2, tree_of(json!({"b": 2})));

        trees.clear(1);
        assert!(trees.get(1).is_empty());
        assert_eq!(trees.get(2), tree_of(json!({"b": 2})));
    }

    #[test]
    fn test_extract_json_payload() {
        assert_eq!(extract_json_payload("```json\n{}\n```"), "{}");
        assert_eq!(extract_json_payload("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(
            extract_json_payload("prefix ```json {\"a\":1} ``` suffix"),
            "{\"a\":1}"
        );
    }
}
