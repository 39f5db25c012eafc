//! Alias allocation.
//!
//! Every relation instance (table reference, select block, set operation)
//! and every lambda parameter gets an identity token minted from one
//! process-wide monotonic counter. Tokens are compared by value, so two
//! structurally identical subtrees stay distinguishable as long as their
//! aliases differ.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a fresh id. Safe to call from concurrent compilations.
pub fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Identity of one relation instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableAlias(u64);

impl TableAlias {
    pub fn new() -> Self {
        TableAlias(next_id())
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for TableAlias {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TableAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Identity of one lambda parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParamId(u64);

impl ParamId {
    pub fn new() -> Self {
        ParamId(next_id())
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for ParamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_aliases_are_unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| thread::spawn(|| (0..500).map(|_| TableAlias::new()).collect::<Vec<_>>()))
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for alias in handle.join().unwrap() {
                assert!(seen.insert(alias), "alias {} minted twice", alias);
            }
        }
        assert_eq!(seen.len(), 2000);
    }

    #[test]
    fn test_alias_display() {
        let alias = TableAlias::new();
        assert_eq!(alias.to_string(), format!("t{}", alias.id()));
    }
}
