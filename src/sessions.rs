//! Session Builder
//!
//! Turns a resource's lifecycle events into the ordered list of intervals
//! during which it was billable. The builder is a pure function of its input:
//! sessions are rebuilt from the full event list on every computation and
//! never mutated incrementally.
//!
//! ## State Machine
//!
//! Only `finished` events count, replayed in ascending `(created_at, id)`
//! order, with at most one open accumulator:
//!
//! | action                | open accumulator            | none open     |
//! |-----------------------|-----------------------------|---------------|
//! | `create`, `boot`      | force-close, emit, reopen   | open          |
//! | `shutdown`, `delete`  | close, emit                 | ignored       |
//! | `resize`              | close, emit, reopen         | ignored       |
//! | `reboot`              | no-op                       | no-op         |
//!
//! A trailing accumulator becomes an open session (`end_time == None`).
//!
//! The event log carries no historical plan, so every session is priced at
//! the resource's *current* rate class, including sessions before a resize.

use crate::models::{EventAction, LifecycleEvent, Session};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

struct Accumulator {
    start_time: DateTime<Utc>,
}

struct SessionBuilder<'a> {
    resource_id: u64,
    label: String,
    rate_class: &'a str,
    sessions: Vec<Session>,
    open: Option<Accumulator>,
}

impl<'a> SessionBuilder<'a> {
    fn new(resource_id: u64, label: String, rate_class: &'a str) -> Self {
        Self {
            resource_id,
            label,
            rate_class,
            sessions: Vec::new(),
            open: None,
        }
    }

    fn open_at(&mut self, at: DateTime<Utc>) {
        self.open = Some(Accumulator { start_time: at });
    }

    fn close_at(&mut self, at: DateTime<Utc>) {
        if let Some(acc) = self.open.take() {
            // Zero-length intervals bill nothing and would only add noise.
            if at > acc.start_time {
                self.sessions.push(Session {
                    resource_id: self.resource_id,
                    resource_label: self.label.clone(),
                    rate_class_at_start: self.rate_class.to_string(),
                    start_time: acc.start_time,
                    end_time: Some(at),
                    is_open: false,
                });
            }
        }
    }

    fn apply(&mut self, event: &LifecycleEvent) {
        let at = event.created_at;
        match event.action {
            EventAction::Create | EventAction::Boot => {
                // A second start without a close means the close event is
                // missing; end the previous run here.
                self.close_at(at);
                self.open_at(at);
            }
            EventAction::Shutdown | EventAction::Delete => self.close_at(at),
            EventAction::Resize => {
                if self.open.is_some() {
                    self.close_at(at);
                    self.open_at(at);
                }
            }
            EventAction::Reboot => {}
        }
    }

    fn finish(mut self) -> Vec<Session> {
        if let Some(acc) = self.open.take() {
            self.sessions.push(Session {
                resource_id: self.resource_id,
                resource_label: self.label,
                rate_class_at_start: self.rate_class.to_string(),
                start_time: acc.start_time,
                end_time: None,
                is_open: true,
            });
        }
        self.sessions
    }
}

/// Build the sessions of one resource. `events` may be in any order.
pub fn build_sessions(
    resource_id: u64,
    events: &[LifecycleEvent],
    current_rate_class: &str,
) -> Vec<Session> {
    let mut finished: Vec<&LifecycleEvent> = events.iter().filter(|e| e.is_finished()).collect();
    if finished.is_empty() {
        return Vec::new();
    }
    finished.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let label = resource_label(resource_id, events);
    let mut builder = SessionBuilder::new(resource_id, label, current_rate_class);
    for event in finished {
        builder.apply(event);
    }
    builder.finish()
}

/// Most recent non-empty label among the events.
pub fn resource_label(resource_id: u64, events: &[LifecycleEvent]) -> String {
    events
        .iter()
        .filter(|e| e.resource_label.is_some())
        .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
        .and_then(|e| e.resource_label.clone())
        .unwrap_or_else(|| format!("Instance-{}", resource_id))
}

/// Build sessions for every resource. `rate_classes` must hold an entry per
/// resource in `events`; resources without one are skipped.
pub fn build_all_sessions(
    events: &BTreeMap<u64, Vec<LifecycleEvent>>,
    rate_classes: &BTreeMap<u64, String>,
) -> BTreeMap<u64, Vec<Session>> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        events
            .par_iter()
            .filter_map(|(id, evs)| {
                let class = rate_classes.get(id)?;
                let sessions = build_sessions(*id, evs, class);
                (!sessions.is_empty()).then_some((*id, sessions))
            })
            .collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        events
            .iter()
            .filter_map(|(id, evs)| {
                let class = rate_classes.get(id)?;
                let sessions = build_sessions(*id, evs, class);
                (!sessions.is_empty()).then_some((*id, sessions))
            })
            .collect()
    }
}
