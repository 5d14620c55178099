//! Survey bundle input and JSON report output

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Read;
use survey_core::{
    Event, LaneCode, LaneNumber, LanePeriod, LanePeriodManager, SpanRecord, Survey, SurveyError,
    SurveyInfo, TimeBucket, TrajectoryRecord, TurnKind,
};

use crate::CliError;

/// Batch input for one survey file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SurveyBundle {
    pub plate: Option<String>,
    pub file_id: Option<String>,
    pub trajectory: Vec<TrajectoryRecord>,
    pub spans: Vec<SpanRecord>,
    pub lanes: Vec<LaneAction>,
    pub overrides: Vec<OverrideRequest>,
    pub extent: Option<Extent>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct Extent {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// One live lane-recording step
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LaneAction {
    Assign {
        code: String,
        timestamp: DateTime<Utc>,
    },
    StartTurn {
        kind: TurnKind,
        #[serde(default)]
        lane: Option<u8>,
        timestamp: DateTime<Utc>,
    },
    EndTurn {
        timestamp: DateTime<Utc>,
    },
}

/// Retroactive lane correction over a window
#[derive(Debug, Clone, Deserialize)]
pub struct OverrideRequest {
    pub code: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SurveyBundle {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, CliError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn extent(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.extent.map(|e| (e.start, e.end))
    }
}

/// An input step that was not applied
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Rejected {
    /// `"lanes"` or `"overrides"`
    pub source: &'static str,
    pub index: usize,
    pub reason: String,
}

/// Outcome of a committed override
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AppliedOverride {
    pub index: usize,
    pub code: String,
    pub start: DateTime<Utc>,
    pub requested_end: DateTime<Utc>,
    pub actual_end: DateTime<Utc>,
}

/// Apply live lane steps in order, collecting the rejected ones
pub fn apply_lane_actions(lanes: &mut LanePeriodManager, actions: &[LaneAction]) -> Vec<Rejected> {
    profiling::scope!("apply_lane_actions");

    let mut rejected = Vec::new();
    for (index, action) in actions.iter().enumerate() {
        let result = match action {
            LaneAction::Assign { code, timestamp } => lanes.assign_lane_str(code, *timestamp),
            LaneAction::StartTurn {
                kind,
                lane: Some(lane),
                timestamp,
            } => match LaneNumber::new(*lane) {
                Some(lane) => lanes.start_turn_in_lane(*kind, lane, *timestamp),
                None => Err(SurveyError::InvalidLaneCode(lane.to_string())),
            },
            LaneAction::StartTurn {
                kind,
                lane: None,
                timestamp,
            } => lanes.start_turn(*kind, *timestamp),
            LaneAction::EndTurn { timestamp } => lanes.end_turn(*timestamp),
        };
        if let Err(e) = result {
            tracing::warn!("Lane action #{} rejected: {}", index, e);
            rejected.push(Rejected {
                source: "lanes",
                index,
                reason: e.to_string(),
            });
        }
    }
    rejected
}

/// Commit each override through the pending-override flow
pub fn apply_overrides(
    lanes: &mut LanePeriodManager,
    overrides: &[OverrideRequest],
) -> (Vec<AppliedOverride>, Vec<Rejected>) {
    profiling::scope!("apply_overrides");

    let mut applied = Vec::new();
    let mut rejected = Vec::new();
    for (index, request) in overrides.iter().enumerate() {
        let result = request
            .code
            .parse::<LaneCode>()
            .and_then(|code| lanes.propose(code, request.start, request.end).map(|_| ()))
            .and_then(|()| lanes.commit());
        match result {
            Ok(actual_end) => applied.push(AppliedOverride {
                index,
                code: request.code.clone(),
                start: request.start,
                requested_end: request.end,
                actual_end,
            }),
            Err(e) => {
                tracing::warn!("Override #{} rejected: {}", index, e);
                lanes.cancel();
                rejected.push(Rejected {
                    source: "overrides",
                    index,
                    reason: e.to_string(),
                });
            }
        }
    }
    (applied, rejected)
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct ChainageScale {
    pub min: f64,
    pub max: f64,
}

/// Viewport section of the report
#[derive(Debug, Clone, Serialize)]
pub struct ViewReport {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub pixels_per_second: f64,
    pub visible_events: usize,
    /// Visible events exceed the aggregation threshold
    pub aggregate: bool,
    pub chainage_scale: Option<ChainageScale>,
    pub buckets: Vec<TimeBucket>,
}

#[derive(Debug, Serialize)]
pub struct SurveyReport<'a> {
    pub info: SurveyInfo,
    pub events: &'a [Event],
    pub lane_periods: &'a [LanePeriod],
    pub overrides: Vec<AppliedOverride>,
    pub rejected: Vec<Rejected>,
    pub view: ViewReport,
}

impl<'a> SurveyReport<'a> {
    pub fn build(
        survey: &'a Survey,
        buckets: usize,
        overrides: Vec<AppliedOverride>,
        rejected: Vec<Rejected>,
    ) -> Self {
        let viewport = survey.viewport();
        let visible_events = viewport.visible_events(survey.events()).len();
        Self {
            info: survey.info(),
            events: survey.events(),
            lane_periods: survey.lanes().periods(),
            overrides,
            rejected,
            view: ViewReport {
                start: viewport.view_start(),
                end: viewport.view_end(),
                pixels_per_second: viewport.pixels_per_second(),
                visible_events,
                aggregate: viewport.should_aggregate(visible_events),
                chainage_scale: survey
                    .chainage_scale()
                    .map(|(min, max)| ChainageScale { min, max }),
                buckets: viewport.bucket_counts(survey.events(), buckets),
            },
        }
    }
}
