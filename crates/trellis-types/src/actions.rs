//! Delegated action allowlist.

use serde::{Deserialize, Serialize};

/// Insertion-ordered set of remote-call names a peer may invoke.
///
/// Every mutator reports whether the set changed so that callers can skip
/// no-op writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct ActionSet(Vec<String>);

impl ActionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, action: &str) -> bool {
        self.0.iter().any(|a| a == action)
    }

    /// Adds every action not already present. Returns `true` if anything was added.
    pub fn union<S: AsRef<str>>(&mut self, actions: &[S]) -> bool {
        let mut changed = false;
        for action in actions {
            let action = action.as_ref();
            if !action.is_empty() && !self.contains(action) {
                self.0.push(action.to_string());
                changed = true;
            }
        }
        changed
    }

    /// Removes an action. Returns `true` if it was present.
    pub fn remove(&mut self, action: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|a| a != action);
        self.0.len() != before
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl From<Vec<String>> for ActionSet {
    fn from(actions: Vec<String>) -> Self {
        let mut set = Self::default();
        set.union(&actions);
        set
    }
}

impl From<ActionSet> for Vec<String> {
    fn from(set: ActionSet) -> Self {
        set.0
    }
}
