//! The flat name -> index binding shared by the parser, expression
//! compiler, and pipeline builder (spec.md 3: "a single flat mapping
//! from every known identifier ... to a stable index into a shared
//! scalar workspace").

use std::collections::HashMap;
use serde::{Deserialize, Serialize};

/// Reserved identifiers whose semantics are fixed by spec.md 6.
pub const RESERVED: [&str; 4] = ["_t0", "_t1", "_h", "_count"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    indices: HashMap<String, usize>,
    order: Vec<String>,
}

impl Binding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to the next free index, or returns its existing
    /// index if it's already bound (states, the argument, and reserved
    /// names are bound once up front; re-binding the same name is a
    /// no-op so callers don't need to pre-check).
    pub fn bind(&mut self, name: &str) -> usize {
        if let Some(&i) = self.indices.get(name) {
            return i;
        }
        let i = self.order.len();
        self.indices.insert(name.to_string(), i);
        self.order.push(name.to_string());
        i
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.indices.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.order.get(index).map(String::as_str)
    }
}
