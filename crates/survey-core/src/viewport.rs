//! Timeline viewport: time/pixel mapping, zoom and pan, and culling queries

use crate::event::Event;
use crate::lane_periods::LanePeriod;
use crate::trajectory::{GpsPoint, GpsTrajectory};
use crate::{Result, SurveyError, utils};
use chrono::{DateTime, TimeDelta, Utc};

/// Default event count above which callers should switch to bucketed counts
pub const DEFAULT_AGGREGATION_THRESHOLD: usize = 500;

/// Fraction of the window kept as margin when following a position
const FOLLOW_MARGIN: f64 = 0.1;

/// Count of visible events overlapping one fixed-width time bucket
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeBucket {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub count: usize,
}

/// Maps the zoomed/panned time window onto a horizontal pixel range.
///
/// The window is stored as second offsets from `base_start` and always satisfies
/// `0 <= view_start < view_end <= base_span`.
#[derive(Clone, Debug)]
pub struct ViewportMapper {
    base_start: DateTime<Utc>,
    base_end: DateTime<Utc>,
    base_span: f64,
    view_start: f64,
    view_end: f64,
    pixel_width: f64,
    min_span: f64,
    aggregation_threshold: usize,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl ViewportMapper {
    /// Create a viewport showing the full `[base_start, base_end]` extent
    pub fn new(
        base_start: DateTime<Utc>,
        base_end: DateTime<Utc>,
        pixel_width: f64,
        min_span_secs: f64,
    ) -> Result<Self> {
        if base_end <= base_start {
            return Err(SurveyError::InvalidTimeRange {
                start: base_start,
                end: base_end,
            });
        }
        let base_span = utils::seconds_between(base_start, base_end);
        let min_span = if min_span_secs.is_finite() && min_span_secs > 0.0 {
            min_span_secs.min(base_span)
        } else {
            base_span.min(1.0)
        };

        Ok(Self {
            base_start,
            base_end,
            base_span,
            view_start: 0.0,
            view_end: base_span,
            pixel_width: sanitize_width(pixel_width),
            min_span,
            aggregation_threshold: DEFAULT_AGGREGATION_THRESHOLD,
        })
    }

    pub fn with_aggregation_threshold(mut self, threshold: usize) -> Self {
        self.aggregation_threshold = threshold;
        self
    }

    pub fn set_pixel_width(&mut self, pixel_width: f64) {
        self.pixel_width = sanitize_width(pixel_width);
    }

    #[inline]
    pub fn pixel_width(&self) -> f64 {
        self.pixel_width
    }

    pub fn base_start(&self) -> DateTime<Utc> {
        self.base_start
    }

    pub fn base_end(&self) -> DateTime<Utc> {
        self.base_end
    }

    pub fn view_start(&self) -> DateTime<Utc> {
        utils::offset_by_secs(self.base_start, self.view_start)
    }

    pub fn view_end(&self) -> DateTime<Utc> {
        utils::offset_by_secs(self.base_start, self.view_end)
    }

    #[inline]
    pub fn view_span_secs(&self) -> f64 {
        self.view_end - self.view_start
    }

    #[inline]
    pub fn min_span_secs(&self) -> f64 {
        self.min_span
    }

    #[inline]
    pub fn base_span_secs(&self) -> f64 {
        self.base_span
    }

    #[inline]
    pub fn pixels_per_second(&self) -> f64 {
        self.pixel_width / self.view_span_secs()
    }

    /// Show the full extent
    pub fn reset(&mut self) {
        self.view_start = 0.0;
        self.view_end = self.base_span;
    }

    // ========================================================================
    // Zoom and pan
    // ========================================================================

    /// Zoom by `factor` (> 1 zooms in) around `center`
    pub fn zoom(&mut self, factor: f64, center: DateTime<Utc>) {
        if !factor.is_finite() || factor <= 0.0 {
            tracing::debug!("Ignoring zoom factor {}", factor);
            return;
        }
        let span = (self.view_span_secs() / factor).clamp(self.min_span, self.base_span);
        let center = utils::seconds_between(self.base_start, center);
        self.view_start = center - span / 2.0;
        self.view_end = center + span / 2.0;
        self.clamp_window(span);
    }

    /// Shift the window by `delta`, stopping at the base bounds
    pub fn pan(&mut self, delta: TimeDelta) {
        let delta = delta
            .num_microseconds()
            .map(|us| us as f64 / 1_000_000.0)
            .unwrap_or(delta.num_seconds() as f64);
        self.pan_secs(delta);
    }

    /// Shift the window by a pixel distance
    pub fn pan_pixels(&mut self, dx: f64) {
        if dx.is_finite() {
            self.pan_secs(dx / self.pixels_per_second());
        }
    }

    fn pan_secs(&mut self, delta: f64) {
        let span = self.view_span_secs();
        self.view_start += delta;
        self.view_end += delta;
        self.clamp_window(span);
    }

    /// Move `[view_start, view_start + span]` back inside the base extent
    fn clamp_window(&mut self, span: f64) {
        let span = span.min(self.base_span);
        let start = self.view_start.clamp(0.0, (self.base_span - span).max(0.0));
        self.view_start = start;
        self.view_end = start + span;
    }

    /// Pan so that `t` is inside the window with a margin. No-op if it already is.
    pub fn ensure_visible(&mut self, t: DateTime<Utc>) {
        let offset = utils::seconds_between(self.base_start, t);
        let span = self.view_span_secs();
        let margin = span * FOLLOW_MARGIN;
        if offset < self.view_start {
            self.view_start = offset - margin;
        } else if offset > self.view_end {
            self.view_start = offset + margin - span;
        } else {
            return;
        }
        self.clamp_window(span);
    }

    // ========================================================================
    // Mapping
    // ========================================================================

    pub fn time_to_pixel(&self, t: DateTime<Utc>) -> f64 {
        let offset = utils::seconds_between(self.base_start, t);
        (offset - self.view_start) * self.pixels_per_second()
    }

    pub fn pixel_to_time(&self, x: f64) -> DateTime<Utc> {
        let offset = self.view_start + x / self.pixels_per_second();
        utils::offset_by_secs(self.base_start, offset)
    }

    // ========================================================================
    // Culling
    // ========================================================================

    pub fn visible_events<'a>(&self, events: &'a [Event]) -> Vec<&'a Event> {
        let (start, end) = (self.view_start(), self.view_end());
        events
            .iter()
            .filter(|e| e.overlaps_window(start, end))
            .collect()
    }

    pub fn visible_lane_periods<'a>(&self, periods: &'a [LanePeriod]) -> Vec<&'a LanePeriod> {
        let (start, end) = (self.view_start(), self.view_end());
        periods
            .iter()
            .filter(|p| p.overlaps_window(start, end))
            .collect()
    }

    pub fn visible_points<'a>(&self, trajectory: &'a GpsTrajectory) -> Vec<&'a GpsPoint> {
        trajectory
            .points_in_range(self.view_start(), self.view_end())
            .collect()
    }

    /// Whether `candidate_count` visible items should be drawn as bucketed counts instead
    #[inline]
    pub fn should_aggregate(&self, candidate_count: usize) -> bool {
        candidate_count > self.aggregation_threshold
    }

    /// Split the window into `buckets` equal slices and count the events overlapping each
    pub fn bucket_counts(&self, events: &[Event], buckets: usize) -> Vec<TimeBucket> {
        let buckets = buckets.max(1);
        let width = self.view_span_secs() / buckets as f64;
        let bounds: Vec<DateTime<Utc>> = (0..=buckets)
            .map(|i| utils::offset_by_secs(self.base_start, self.view_start + width * i as f64))
            .collect();

        let mut counts = vec![0usize; buckets];
        for event in self.visible_events(events) {
            let first = self.bucket_of(event.start_time(), width, buckets);
            let last = self.bucket_of(event.end_time().max(event.start_time()), width, buckets);
            for count in &mut counts[first..=last] {
                *count += 1;
            }
        }

        counts
            .into_iter()
            .enumerate()
            .map(|(i, count)| TimeBucket {
                start: bounds[i],
                end: bounds[i + 1],
                count,
            })
            .collect()
    }

    fn bucket_of(&self, t: DateTime<Utc>, width: f64, buckets: usize) -> usize {
        let offset = utils::seconds_between(self.base_start, t) - self.view_start;
        let idx = (offset / width).floor();
        if idx <= 0.0 {
            0
        } else {
            (idx as usize).min(buckets - 1)
        }
    }

    /// Chainage range over the current window, sampled at `samples` evenly spaced instants
    /// including both window ends. `None` for an empty trajectory.
    pub fn chainage_scale(&self, trajectory: &GpsTrajectory, samples: usize) -> Option<(f64, f64)> {
        let n = samples.max(2);
        let step = self.view_span_secs() / (n - 1) as f64;
        let mut range: Option<(f64, f64)> = None;
        for i in 0..n {
            let offset = if i == n - 1 {
                self.view_end
            } else {
                self.view_start + step * i as f64
            };
            let t = utils::offset_by_secs(self.base_start, offset);
            let chainage = trajectory.interpolate_chainage(t)?;
            range = Some(match range {
                Some((min, max)) => (min.min(chainage), max.max(chainage)),
                None => (chainage, chainage),
            });
        }
        range
    }
}

fn sanitize_width(pixel_width: f64) -> f64 {
    if pixel_width.is_finite() {
        pixel_width.max(1.0)
    } else {
        1.0
    }
}
