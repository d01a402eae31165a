//! Event Deduplication
//!
//! Incremental refreshes deliberately overlap the previous refresh window, so
//! the same provider event routinely arrives more than once. This module
//! folds newly fetched events into the cached log without double-counting.
//!
//! ## Merge Rules
//!
//! - **Identity**: two records are the same event when their `id` matches
//! - **Collision**: the record with the more settled status wins
//!   ([`EventStatus::rank`]); on equal rank the cached record is kept
//! - **Order**: each resource's log is stored newest first, ties broken by id
//!
//! Merging is idempotent: folding the same batch in twice leaves the log
//! exactly as folding it once.
//!
//! [`EventStatus::rank`]: crate::models::EventStatus::rank

use crate::models::LifecycleEvent;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

pub type EventsByResource = BTreeMap<u64, Vec<LifecycleEvent>>;

/// Outcome of one merge, for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub added: usize,
    pub upgraded: usize,
    pub duplicates: usize,
}

/// Fold `incoming` into `existing` in place.
pub fn merge_events(existing: &mut EventsByResource, incoming: EventsByResource) -> MergeStats {
    let mut stats = MergeStats::default();

    for (resource_id, new_events) in incoming {
        let log = existing.entry(resource_id).or_default();
        let mut index: HashMap<u64, usize> =
            log.iter().enumerate().map(|(i, e)| (e.id, i)).collect();
        let before = stats;

        for event in new_events {
            match index.get(&event.id) {
                Some(&pos) => {
                    if event.status.rank() > log[pos].status.rank() {
                        log[pos] = event;
                        stats.upgraded += 1;
                    } else {
                        stats.duplicates += 1;
                    }
                }
                None => {
                    index.insert(event.id, log.len());
                    log.push(event);
                    stats.added += 1;
                }
            }
        }

        sort_newest_first(log);
        if stats.added > before.added || stats.upgraded > before.upgraded {
            debug!(
                resource_id,
                added = stats.added - before.added,
                upgraded = stats.upgraded - before.upgraded,
                "Merged new events for resource"
            );
        }
    }

    existing.retain(|_, events| !events.is_empty());
    stats
}

/// Deduplicate a freshly fetched batch on its own, as a full refresh does.
pub fn dedupe(events: EventsByResource) -> EventsByResource {
    let mut merged = EventsByResource::new();
    merge_events(&mut merged, events);
    merged
}

pub fn sort_newest_first(events: &mut [LifecycleEvent]) {
    events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

pub fn total_events(events: &EventsByResource) -> usize {
    events.values().map(Vec::len).sum()
}
