//! Pairing raw span records into events
//!
//! Start records are queued per span name in stream order; each end record closes the oldest
//! open start with the same name (FIFO). Starts left open when the stream ends become events
//! with an inferred end.

use crate::event::{Completeness, Event};
use crate::trajectory::GpsTrajectory;
use chrono::{DateTime, TimeDelta, Utc};
use rayon::prelude::*;
use std::collections::{HashMap, VecDeque};

/// Default inferred duration of an orphan span
pub const DEFAULT_ORPHAN_FALLBACK_SECS: i64 = 10;

/// A raw span record as handed over by an external parser
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpanRecord {
    pub timestamp: DateTime<Utc>,
    pub chainage_m: f64,
    pub span_name: String,
    pub is_start: bool,
    pub is_end: bool,
}

impl SpanRecord {
    pub fn start(timestamp: DateTime<Utc>, chainage_m: f64, span_name: impl Into<String>) -> Self {
        Self {
            timestamp,
            chainage_m,
            span_name: span_name.into(),
            is_start: true,
            is_end: false,
        }
    }

    pub fn end(timestamp: DateTime<Utc>, chainage_m: f64, span_name: impl Into<String>) -> Self {
        Self {
            is_start: false,
            is_end: true,
            ..Self::start(timestamp, chainage_m, span_name)
        }
    }

    /// Exactly one of start/end, with a name
    fn is_span(&self) -> bool {
        self.is_start != self.is_end && !self.span_name.is_empty()
    }
}

/// Span record matcher
#[derive(Clone, Debug)]
pub struct EventMatcher {
    file_id: String,
    orphan_fallback: TimeDelta,
}

impl Default for EventMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl EventMatcher {
    pub fn new() -> Self {
        Self {
            file_id: String::new(),
            orphan_fallback: TimeDelta::seconds(DEFAULT_ORPHAN_FALLBACK_SECS),
        }
    }

    /// File id stamped on every produced event
    pub fn with_file_id(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = file_id.into();
        self
    }

    /// Duration given to an orphan start with no later start to end at
    pub fn with_orphan_fallback(mut self, fallback: TimeDelta) -> Self {
        self.orphan_fallback = fallback.max(TimeDelta::zero());
        self
    }

    /// Match span records into events sorted by start time.
    ///
    /// Never fails: non-span records are ignored, unmatched ends are dropped, orphan starts
    /// get an inferred end. With a trajectory, event positions are interpolated in parallel.
    pub fn match_spans(
        &self,
        records: &[SpanRecord],
        trajectory: Option<&GpsTrajectory>,
    ) -> Vec<Event> {
        let mut open_starts: HashMap<&str, VecDeque<usize>> = HashMap::new();
        let mut events = Vec::new();
        let mut ignored = 0usize;

        for (idx, record) in records.iter().enumerate() {
            if !record.is_span() {
                ignored += 1;
                continue;
            }

            if record.is_start {
                open_starts
                    .entry(record.span_name.as_str())
                    .or_default()
                    .push_back(idx);
                continue;
            }

            let Some(start_idx) = open_starts
                .get_mut(record.span_name.as_str())
                .and_then(VecDeque::pop_front)
            else {
                tracing::warn!(
                    "Dropping unmatched end for {:?} at {}",
                    record.span_name,
                    record.timestamp
                );
                continue;
            };

            let start = &records[start_idx];
            if record.timestamp < start.timestamp {
                tracing::warn!(
                    "Span {:?} ends at {} before its start at {}",
                    record.span_name,
                    record.timestamp,
                    start.timestamp
                );
            }
            events.push(Event::from_match(
                start.span_name.clone(),
                start.timestamp,
                record.timestamp,
                finite_chainage(start, start.timestamp, trajectory),
                finite_chainage(record, record.timestamp, trajectory),
                Completeness::Complete,
            ));
        }

        if ignored > 0 {
            tracing::debug!("Ignored {} non-span records", ignored);
        }

        let mut orphans: Vec<usize> = open_starts.into_values().flatten().collect();
        orphans.sort_unstable();
        for start_idx in orphans {
            events.push(self.infer_orphan(records, start_idx, trajectory));
        }

        for event in &mut events {
            event.file_id.clone_from(&self.file_id);
        }
        if let Some(trajectory) = trajectory {
            events
                .par_iter_mut()
                .for_each(|event| event.enrich(trajectory));
        }

        events.sort_by_key(|e| e.start_time());
        tracing::debug!("Matched {} span events", events.len());
        events
    }

    /// End an orphan start at the next later start of a different span, else after the
    /// fallback duration
    fn infer_orphan(
        &self,
        records: &[SpanRecord],
        start_idx: usize,
        trajectory: Option<&GpsTrajectory>,
    ) -> Event {
        let start = &records[start_idx];
        let next_start = records[start_idx + 1..].iter().find(|r| {
            r.is_span()
                && r.is_start
                && r.span_name != start.span_name
                && r.timestamp >= start.timestamp
        });

        let start_chainage = finite_chainage(start, start.timestamp, trajectory);
        let (end_time, end_chainage) = match next_start {
            Some(next) => (
                next.timestamp,
                finite_chainage(next, next.timestamp, trajectory),
            ),
            None => {
                let end_time = start
                    .timestamp
                    .checked_add_signed(self.orphan_fallback)
                    .unwrap_or(start.timestamp);
                let end_chainage = trajectory
                    .and_then(|t| t.interpolate_chainage(end_time))
                    .unwrap_or(start_chainage);
                (end_time, end_chainage)
            }
        };

        tracing::info!(
            "Orphan span {:?} at {}: inferred end {}",
            start.span_name,
            start.timestamp,
            end_time
        );
        Event::from_match(
            start.span_name.clone(),
            start.timestamp,
            end_time,
            start_chainage,
            end_chainage,
            Completeness::InferredEnd,
        )
    }
}

/// Record chainage if usable, else the trajectory chainage at `t`, else 0
fn finite_chainage(
    record: &SpanRecord,
    t: DateTime<Utc>,
    trajectory: Option<&GpsTrajectory>,
) -> f64 {
    if record.chainage_m.is_finite() {
        return record.chainage_m;
    }
    trajectory
        .and_then(|traj| traj.interpolate_chainage(t))
        .unwrap_or(0.0)
}
