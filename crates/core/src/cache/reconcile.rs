//! Reconciliation planning
//!
//! Given what is cached and what the server says exists, decide which local
//! entries go away and which bodies must be fetched. The only comparator is
//! `saved_at`; nothing else about a diagram influences the plan.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use diagsync_domain::{DiagramId, IndexEntry};

/// Outcome of comparing the cache against a fresh server index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Cached ids absent from the index, ascending
    pub evict: Vec<DiagramId>,
    /// Ids that are missing locally or strictly newer on the server, ascending
    pub fetch: Vec<DiagramId>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.evict.is_empty() && self.fetch.is_empty()
    }
}

/// One outstanding request in a reconcile cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleRequest {
    Index,
    Body(DiagramId),
}

/// True when an incoming copy stamped `incoming` should overwrite what is
/// cached. Equal timestamps keep the cached copy.
pub fn should_replace(existing: Option<DateTime<Utc>>, incoming: DateTime<Utc>) -> bool {
    existing.map_or(true, |cached| incoming > cached)
}

/// Build the eviction and fetch lists for one cycle.
///
/// Duplicate index rows collapse to their newest `saved_at`.
pub fn plan_reconciliation(
    cached: &HashMap<DiagramId, DateTime<Utc>>,
    index: &[IndexEntry],
) -> ReconcilePlan {
    let mut authoritative: BTreeMap<DiagramId, DateTime<Utc>> = BTreeMap::new();
    for entry in index {
        authoritative
            .entry(entry.id)
            .and_modify(|saved_at| *saved_at = (*saved_at).max(entry.saved_at))
            .or_insert(entry.saved_at);
    }

    let mut evict: Vec<DiagramId> =
        cached.keys().filter(|id| !authoritative.contains_key(id)).copied().collect();
    evict.sort_unstable();

    let fetch = authoritative
        .iter()
        .filter(|(id, saved_at)| should_replace(cached.get(id).copied(), **saved_at))
        .map(|(id, _)| *id)
        .collect();

    ReconcilePlan { evict, fetch }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    fn entry(id: DiagramId, day: u32) -> IndexEntry {
        IndexEntry { id, saved_at: at(day) }
    }

    #[test]
    fn fetches_only_newer_or_missing() {
        let cached = HashMap::from([(3, at(1)), (7, at(1))]);
        let index = [entry(3, 1), entry(7, 2), entry(9, 1)];

        let plan = plan_reconciliation(&cached, &index);

        assert_eq!(plan.fetch, vec![7, 9]);
        assert!(plan.evict.is_empty());
    }

    #[test]
    fn evicts_ids_missing_from_index() {
        let cached = HashMap::from([(1, at(1)), (2, at(1)), (3, at(1))]);
        let plan = plan_reconciliation(&cached, &[entry(2, 1)]);

        assert_eq!(plan.evict, vec![1, 3]);
        assert!(plan.fetch.is_empty());
    }

    #[test]
    fn older_server_copy_is_not_fetched() {
        let cached = HashMap::from([(4, at(5))]);
        let plan = plan_reconciliation(&cached, &[entry(4, 2)]);
        assert!(plan.is_empty());
    }

    #[test]
    fn empty_index_evicts_everything() {
        let cached = HashMap::from([(1, at(1)), (2, at(2))]);
        let plan = plan_reconciliation(&cached, &[]);
        assert_eq!(plan.evict, vec![1, 2]);
    }

    #[test]
    fn duplicate_rows_use_newest_timestamp() {
        let cached = HashMap::from([(8, at(3))]);
        let plan = plan_reconciliation(&cached, &[entry(8, 2), entry(8, 4)]);
        assert_eq!(plan.fetch, vec![8]);
    }

    #[test]
    fn equal_timestamps_keep_cached_copy() {
        assert!(!should_replace(Some(at(1)), at(1)));
        assert!(should_replace(Some(at(1)), at(2)));
        assert!(should_replace(None, at(1)));
    }
}
