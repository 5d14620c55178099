//! Survey - Owner of one loaded survey scope
//!
//! This module ties the trajectory, matched events, lane history and viewport of a single
//! `(plate, file_id)` load together, and produces immutable snapshots for external writers.

use crate::event::{Event, assign_layers};
use crate::lane_periods::{LanePeriodManager, LaneSnapshot};
use crate::matcher::{EventMatcher, SpanRecord};
use crate::trajectory::GpsTrajectory;
use crate::viewport::ViewportMapper;
use crate::{Result, SurveyError, utils};
use chrono::{DateTime, TimeDelta, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration for a survey load
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Duration given to an orphan span with no later start to end at.
    /// Default: 10
    pub orphan_end_fallback_secs: i64,
    /// Narrowest zoom window in seconds.
    /// Default: 1.0
    pub min_view_span_secs: f64,
    /// Visible event count above which the timeline should draw bucketed counts.
    /// Default: 500
    pub aggregation_threshold: usize,
    /// Number of instants sampled for the visible chainage scale
    pub chainage_samples: usize,
    /// Maximum number of event render layers
    pub max_event_layers: usize,
    /// Initial timeline width in pixels
    pub pixel_width: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            orphan_end_fallback_secs: 10,
            min_view_span_secs: 1.0,
            aggregation_threshold: 500,
            chainage_samples: 16,
            max_event_layers: 8,
            pixel_width: 1024.0,
        }
    }
}

/// Summary of a loaded survey
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SurveyInfo {
    /// Number of trajectory points kept
    pub point_count: usize,
    /// Number of trajectory records skipped as malformed
    pub rejected_points: usize,
    pub event_count: usize,
    pub period_count: usize,
    /// Total trajectory distance in meters
    pub total_distance_m: f64,
}

/// Immutable view of a survey's editable state
#[derive(Debug, Clone)]
pub struct SurveySnapshot {
    pub events: Arc<[Event]>,
    pub lanes: LaneSnapshot,
}

/// One loaded survey scope
#[derive(Debug, Clone)]
pub struct Survey {
    config: Config,
    trajectory: GpsTrajectory,
    events: Vec<Event>,
    lanes: LanePeriodManager,
    viewport: ViewportMapper,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Survey {
    /// Load a survey from batch data.
    ///
    /// The viewport base extent is `extent` if given, else the trajectory's time extent,
    /// else the span of the matched events. A zero-length extent is widened to the minimum
    /// view span.
    pub fn load(
        config: Config,
        plate: impl Into<String>,
        file_id: impl Into<String>,
        mut trajectory: GpsTrajectory,
        spans: &[SpanRecord],
        extent: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Self> {
        #[cfg(feature = "profiling")]
        profiling::scope!("survey::load");

        let file_id = file_id.into();
        trajectory.build_index();

        let matcher = EventMatcher::new()
            .with_file_id(file_id.as_str())
            .with_orphan_fallback(TimeDelta::seconds(config.orphan_end_fallback_secs));
        let enrich_from = (!trajectory.is_empty()).then_some(&trajectory);
        let mut events = matcher.match_spans(spans, enrich_from);
        assign_layers(&mut events, config.max_event_layers);

        let (base_start, base_end) = extent
            .or_else(|| trajectory.time_extent())
            .or_else(|| event_extent(&events))
            .ok_or(SurveyError::EmptySurvey)?;
        let base_end = if base_end <= base_start {
            utils::offset_by_secs(base_start, config.min_view_span_secs.max(1.0))
        } else {
            base_end
        };

        let viewport = ViewportMapper::new(
            base_start,
            base_end,
            config.pixel_width,
            config.min_view_span_secs,
        )?
        .with_aggregation_threshold(config.aggregation_threshold);

        let mut lanes = LanePeriodManager::new(plate, file_id);
        lanes.set_scope_end(base_end);

        tracing::info!(
            "Loaded survey {}/{}: {} points, {} events, extent {} -> {}",
            lanes.plate(),
            lanes.file_scope_id(),
            trajectory.len(),
            events.len(),
            base_start,
            base_end
        );

        Ok(Self {
            config,
            trajectory,
            events,
            lanes,
            viewport,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn trajectory(&self) -> &GpsTrajectory {
        &self.trajectory
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn event(&self, id: &str) -> Option<&Event> {
        self.events.iter().find(|e| e.id() == id)
    }

    pub fn lanes(&self) -> &LanePeriodManager {
        &self.lanes
    }

    pub fn lanes_mut(&mut self) -> &mut LanePeriodManager {
        &mut self.lanes
    }

    pub fn viewport(&self) -> &ViewportMapper {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut ViewportMapper {
        &mut self.viewport
    }

    /// Edit an event's times and refresh its chainage and positions.
    ///
    /// Returns `Ok(None)` if no event has `id`; if several share it, the first in start order
    /// is edited. Event order and layers are recomputed.
    pub fn update_event_times(
        &mut self,
        id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<&Event>> {
        let Some(idx) = self.events.iter().position(|e| e.id() == id) else {
            return Ok(None);
        };
        let event = &mut self.events[idx];
        event.set_times(start, end)?;
        event.refresh_from_trajectory(&self.trajectory);
        let new_id = event.id().to_string();

        self.events.sort_by_key(|e| e.start_time());
        assign_layers(&mut self.events, self.config.max_event_layers);
        Ok(self.events.iter().find(|e| e.id() == new_id))
    }

    /// Visible chainage range for the current viewport window
    pub fn chainage_scale(&self) -> Option<(f64, f64)> {
        self.viewport
            .chainage_scale(&self.trajectory, self.config.chainage_samples)
    }

    pub fn info(&self) -> SurveyInfo {
        SurveyInfo {
            point_count: self.trajectory.len(),
            rejected_points: self.trajectory.rejected_records(),
            event_count: self.events.len(),
            period_count: self.lanes.periods().len(),
            total_distance_m: self.trajectory.total_distance_m(),
        }
    }

    pub fn snapshot(&self) -> SurveySnapshot {
        SurveySnapshot {
            events: Arc::from(self.events.as_slice()),
            lanes: self.lanes.snapshot(),
        }
    }
}

fn event_extent(events: &[Event]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = events.iter().map(|e| e.start_time()).min()?;
    let end = events
        .iter()
        .map(|e| e.end_time().max(e.start_time()))
        .max()?;
    Some((start, end))
}
