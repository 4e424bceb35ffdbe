//! Tracks the outstanding requests of one fan-out cycle so the "all
//! finished" notification fires exactly once, after the last of them.

use std::collections::HashSet;
use std::hash::Hash;

/// Result of marking a request finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Other requests are still outstanding
    Pending(usize),
    /// This was the last outstanding request of the cycle
    AllFinished,
    /// The key was not outstanding (duplicate or stray completion)
    Unknown,
}

#[derive(Debug)]
pub struct CompletionTracker<K> {
    outstanding: HashSet<K>,
}

impl<K: Eq + Hash> Default for CompletionTracker<K> {
    fn default() -> Self {
        Self { outstanding: HashSet::new() }
    }
}

impl<K: Eq + Hash> CompletionTracker<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request. Returns `false` if it was already outstanding.
    pub fn begin(&mut self, key: K) -> bool {
        self.outstanding.insert(key)
    }

    pub fn finish(&mut self, key: &K) -> Completion {
        if !self.outstanding.remove(key) {
            return Completion::Unknown;
        }
        match self.outstanding.len() {
            0 => Completion::AllFinished,
            n => Completion::Pending(n),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_idle(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// Forget every outstanding request; later completions report `Unknown`.
    pub fn reset(&mut self) {
        self.outstanding.clear();
    }
}
