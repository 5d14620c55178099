//! Survey Core - Interval and Trajectory Engine for Road Surveys
//!
//! This library turns batch-loaded road-survey telemetry into a consistent, queryable and
//! editable timeline model: where the vehicle was at any instant, which span events happened
//! over which time/chainage ranges, and which lane the vehicle occupied over non-overlapping
//! periods, including user corrections.
//!
//! # Architecture
//!
//! - **[`GpsTrajectory`]**: Time-indexed GPS positions with binary-search interpolation
//! - **[`EventMatcher`]**: Pairs raw start/end span records into complete [`Event`]s
//! - **[`LanePeriodManager`]**: Non-overlapping lane periods with turns and windowed overrides
//! - **[`ViewportMapper`]**: Time/pixel mapping, zoom/pan and viewport culling
//! - **[`Survey`]**: High-level owner of one loaded survey scope and its snapshots
//!
//! # Performance Characteristics
//!
//! - **Index Build**: O(N log N) once per trajectory change
//! - **Interpolation**: O(log N) per query
//! - **Lane Edits**: O(log P) lookups, O(P) for windowed overrides (P=periods)
//!
//! All structures are synchronous and single-writer. Use [`Survey::snapshot`] or
//! [`LanePeriodManager::snapshot`] to hand a consistent view to another thread.

mod event;
mod lane_code;
mod lane_periods;
mod matcher;
mod survey;
mod trajectory;
pub mod utils;
mod viewport;

// Public API exports
pub use event::{Completeness, Event, assign_layers, max_length_for_event};
pub use lane_code::{LaneCode, LaneNumber, TurnKind};
pub use lane_periods::{LanePeriod, LanePeriodManager, LaneSnapshot, PendingOverride, TurnContext};
pub use matcher::{EventMatcher, SpanRecord};
pub use survey::{Config, Survey, SurveyInfo, SurveySnapshot};
pub use trajectory::{GpsPoint, GpsTrajectory, TrajectoryRecord};
pub use viewport::{TimeBucket, ViewportMapper};

use chrono::{DateTime, Utc};

/// Error types for the survey engine
#[derive(Debug, thiserror::Error)]
pub enum SurveyError {
    #[error("GPX parsing error: {0}")]
    GpxParse(#[from] gpx::errors::GpxError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid lane code: {0:?}")]
    InvalidLaneCode(String),

    #[error("Lane conflict with period {} -> {} ({})", .period.from_time, .period.to_time, .period.lane_code)]
    LaneConflict { period: LanePeriod },

    #[error("Invalid time range: {start} -> {end}")]
    InvalidTimeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("No lane available to turn from")]
    TurnWithoutLane,

    #[error("No pending lane override")]
    NoPendingOverride,

    #[error("Overlapping lane history: {} overlaps {}", .first.from_time, .second.from_time)]
    OverlappingHistory {
        first: LanePeriod,
        second: LanePeriod,
    },

    #[error("Empty trajectory")]
    EmptyTrajectory,

    #[error("Empty survey: no time extent could be derived")]
    EmptySurvey,
}

pub type Result<T> = std::result::Result<T, SurveyError>;
