//! Lane period state machine
//!
//! [`LanePeriodManager`] owns the lane history of one `(plate, file_scope_id)` pair. Periods
//! are kept sorted by `from_time` and never overlap in their open interior
//! (`to_time[i] <= from_time[i + 1]`). Touching neighbours with the same code are merged on
//! every write. At most one period is the "current open" period that live assignments extend.

use crate::lane_code::{LaneCode, LaneNumber, TurnKind};
use crate::{Result, SurveyError, utils};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// One lane-occupancy interval
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LanePeriod {
    pub plate: String,
    pub from_time: DateTime<Utc>,
    pub to_time: DateTime<Utc>,
    pub lane_code: LaneCode,
    pub file_scope_id: String,
}

impl LanePeriod {
    pub fn new(
        plate: impl Into<String>,
        file_scope_id: impl Into<String>,
        from_time: DateTime<Utc>,
        to_time: DateTime<Utc>,
        lane_code: LaneCode,
    ) -> Self {
        Self {
            plate: plate.into(),
            from_time,
            to_time,
            lane_code,
            file_scope_id: file_scope_id.into(),
        }
    }

    /// `from_time < t < to_time`
    #[inline]
    pub fn contains_strictly(&self, t: DateTime<Utc>) -> bool {
        self.from_time < t && t < self.to_time
    }

    #[inline]
    pub fn duration_secs(&self) -> f64 {
        utils::seconds_between(self.from_time, self.to_time)
    }

    /// Whether the closed interval touches `[start, end]`
    #[inline]
    pub fn overlaps_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.to_time >= start && self.from_time <= end
    }
}

/// State kept while a turn period is open
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TurnContext {
    pub kind: TurnKind,
    /// Lane to return to when the turn ends
    pub saved_lane_code: Option<LaneCode>,
    pub started_at: DateTime<Utc>,
}

/// A lane override window being adjusted before it is committed
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PendingOverride {
    pub code: LaneCode,
    pub start_t: DateTime<Utc>,
    pub candidate_end_t: DateTime<Utc>,
}

/// Immutable copy of a lane history, safe to hand to another thread
#[derive(Clone, Debug)]
pub struct LaneSnapshot {
    pub plate: String,
    pub file_scope_id: String,
    pub periods: Arc<[LanePeriod]>,
}

impl LaneSnapshot {
    #[inline]
    pub fn len(&self) -> usize {
        self.periods.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }
}

/// Lane history editor for a single vehicle and survey file
#[derive(Clone, Debug)]
pub struct LanePeriodManager {
    plate: String,
    file_scope_id: String,
    periods: Vec<LanePeriod>,
    current_open: Option<usize>,
    turn: Option<TurnContext>,
    scope_end: Option<DateTime<Utc>>,
    pending: Option<PendingOverride>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl LanePeriodManager {
    pub fn new(plate: impl Into<String>, file_scope_id: impl Into<String>) -> Self {
        Self {
            plate: plate.into(),
            file_scope_id: file_scope_id.into(),
            periods: Vec::new(),
            current_open: None,
            turn: None,
            scope_end: None,
            pending: None,
        }
    }

    /// End of the file scope, used to bound override windows with no later period
    pub fn set_scope_end(&mut self, end: DateTime<Utc>) {
        self.scope_end = Some(end);
    }

    pub fn scope_end(&self) -> Option<DateTime<Utc>> {
        self.scope_end
    }

    pub fn plate(&self) -> &str {
        &self.plate
    }

    pub fn file_scope_id(&self) -> &str {
        &self.file_scope_id
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[inline]
    pub fn periods(&self) -> &[LanePeriod] {
        &self.periods
    }

    /// Lane code in effect at `t`. The open period covers everything from its start onwards.
    pub fn lane_at(&self, t: DateTime<Utc>) -> Option<LaneCode> {
        let k = self.periods.partition_point(|p| p.from_time <= t);
        let idx = k.checked_sub(1)?;
        let period = &self.periods[idx];
        (t < period.to_time || self.current_open == Some(idx)).then_some(period.lane_code)
    }

    pub fn current_period(&self) -> Option<&LanePeriod> {
        self.current_open.map(|idx| &self.periods[idx])
    }

    pub fn current_lane(&self) -> Option<LaneCode> {
        self.current_period().map(|p| p.lane_code)
    }

    pub fn turn_context(&self) -> Option<&TurnContext> {
        self.turn.as_ref()
    }

    #[inline]
    pub fn is_turn_active(&self) -> bool {
        self.turn.is_some()
    }

    /// True iff `t` lies strictly inside some existing period
    pub fn check_overlap(&self, t: DateTime<Utc>) -> bool {
        self.containing_period(t, None).is_some()
    }

    /// The only period that can strictly contain `t` is the last one starting before it
    fn containing_period(&self, t: DateTime<Utc>, skip: Option<usize>) -> Option<usize> {
        let k = self.periods.partition_point(|p| p.from_time < t);
        let idx = k.checked_sub(1)?;
        (Some(idx) != skip && self.periods[idx].contains_strictly(t)).then_some(idx)
    }

    fn conflicting_period(&self, t: DateTime<Utc>) -> Option<&LanePeriod> {
        self.containing_period(t, self.current_open)
            .map(|idx| &self.periods[idx])
    }

    /// `from_time` of the first period starting strictly after `t`
    pub fn next_boundary_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let k = self.periods.partition_point(|p| p.from_time <= t);
        self.periods.get(k).map(|p| p.from_time)
    }

    /// End an override window starting at `start` would actually get
    pub fn resolve_window_end(
        &self,
        start: DateTime<Utc>,
        candidate_end: DateTime<Utc>,
    ) -> DateTime<Utc> {
        match self.next_boundary_after(start).or(self.scope_end) {
            Some(boundary) => candidate_end.min(boundary),
            None => candidate_end,
        }
    }

    pub fn snapshot(&self) -> LaneSnapshot {
        LaneSnapshot {
            plate: self.plate.clone(),
            file_scope_id: self.file_scope_id.clone(),
            periods: Arc::from(self.periods.as_slice()),
        }
    }

    // ========================================================================
    // Live assignment
    // ========================================================================

    /// Record that the vehicle is in `code` from `t` onwards.
    ///
    /// Same code as the open period extends it (a `t` before its start is a no-op). A
    /// different code closes the open period at `t` and opens `[t, t]`. A `t` strictly inside any other period is rejected with
    /// [`SurveyError::LaneConflict`] and nothing changes.
    pub fn assign_lane(&mut self, code: LaneCode, t: DateTime<Utc>) -> Result<()> {
        self.assign_inner(code, t)?;
        if !code.is_turn() {
            self.turn = None;
        }
        Ok(())
    }

    /// Parse `code` at the boundary and assign it
    pub fn assign_lane_str(&mut self, code: &str, t: DateTime<Utc>) -> Result<()> {
        let code = code.parse::<LaneCode>().inspect_err(|e| {
            tracing::warn!("Rejected lane assignment at {}: {}", t, e);
        })?;
        self.assign_lane(code, t)
    }

    fn assign_inner(&mut self, code: LaneCode, t: DateTime<Utc>) -> Result<()> {
        if let Some(period) = self.conflicting_period(t) {
            tracing::warn!(
                "Lane {} at {} conflicts with {} -> {} ({})",
                code,
                t,
                period.from_time,
                period.to_time,
                period.lane_code
            );
            return Err(SurveyError::LaneConflict {
                period: period.clone(),
            });
        }

        let Some(open) = self.current_open else {
            return self.insert_open(code, t);
        };

        let next_from = self.periods.get(open + 1).map(|p| p.from_time);
        let period = &mut self.periods[open];

        if t < period.from_time {
            if period.lane_code == code {
                return Ok(());
            }
            return Err(SurveyError::LaneConflict {
                period: period.clone(),
            });
        }
        if next_from.is_some_and(|next| t > next) {
            // The open period is boxed in by later history; start a fresh one after it
            self.current_open = None;
            return self.insert_open(code, t);
        }

        if period.lane_code == code {
            period.to_time = period.to_time.max(t);
            self.coalesce_at(open);
        } else if period.from_time == t {
            period.lane_code = code;
            period.to_time = t;
            self.coalesce_at(open);
        } else {
            period.to_time = t;
            let fresh = self.make_period(t, t, code);
            self.periods.insert(open + 1, fresh);
            self.current_open = Some(open + 1);
            self.coalesce_at(open + 1);
        }
        Ok(())
    }

    /// Open a period at `t` when there is no usable open period
    fn insert_open(&mut self, code: LaneCode, t: DateTime<Utc>) -> Result<()> {
        let idx = self.periods.partition_point(|p| p.from_time <= t);

        if let Some(prev_idx) = idx.checked_sub(1) {
            let prev = &mut self.periods[prev_idx];
            if prev.from_time == t {
                if prev.lane_code != code && prev.to_time != t {
                    return Err(SurveyError::LaneConflict {
                        period: prev.clone(),
                    });
                }
                prev.lane_code = code;
                self.current_open = Some(prev_idx);
                self.coalesce_at(prev_idx);
                return Ok(());
            }
        }

        let fresh = self.make_period(t, t, code);
        self.periods.insert(idx, fresh);
        self.current_open = Some(idx);
        self.coalesce_at(idx);
        Ok(())
    }

    fn make_period(&self, from: DateTime<Utc>, to: DateTime<Utc>, code: LaneCode) -> LanePeriod {
        LanePeriod::new(self.plate.as_str(), self.file_scope_id.as_str(), from, to, code)
    }

    /// Merge `idx` with touching same-code neighbours. Returns the merged period's index.
    fn coalesce_at(&mut self, mut idx: usize) -> usize {
        if idx + 1 < self.periods.len() {
            let (left, right) = (&self.periods[idx], &self.periods[idx + 1]);
            if left.lane_code == right.lane_code && left.to_time == right.from_time {
                let right = self.periods.remove(idx + 1);
                let merged = &mut self.periods[idx];
                merged.to_time = merged.to_time.max(right.to_time);
                self.current_open = self.current_open.map(|open| match open {
                    o if o == idx + 1 => idx,
                    o if o > idx + 1 => o - 1,
                    o => o,
                });
            }
        }

        if idx > 0 {
            let (left, right) = (&self.periods[idx - 1], &self.periods[idx]);
            if left.lane_code == right.lane_code && left.to_time == right.from_time {
                let right = self.periods.remove(idx);
                let merged = &mut self.periods[idx - 1];
                merged.to_time = merged.to_time.max(right.to_time);
                self.current_open = self.current_open.map(|open| match open {
                    o if o >= idx => o - 1,
                    o => o,
                });
                idx -= 1;
            }
        }
        idx
    }

    // ========================================================================
    // Turns
    // ========================================================================

    /// Start a turn from the lane the vehicle is currently in
    pub fn start_turn(&mut self, kind: TurnKind, t: DateTime<Utc>) -> Result<()> {
        let saved = self.lane_to_return_to();
        let lane = saved
            .and_then(|code| match code {
                LaneCode::Numeric(lane) | LaneCode::Shoulder(Some(lane)) => Some(lane),
                _ => None,
            })
            .ok_or(SurveyError::TurnWithoutLane)?;
        self.begin_turn(kind, lane, saved, t)
    }

    /// Start a turn made from an explicit lane
    pub fn start_turn_in_lane(
        &mut self,
        kind: TurnKind,
        lane: LaneNumber,
        t: DateTime<Utc>,
    ) -> Result<()> {
        let saved = self.lane_to_return_to();
        self.begin_turn(kind, lane, saved, t)
    }

    fn lane_to_return_to(&self) -> Option<LaneCode> {
        match &self.turn {
            Some(ctx) => ctx.saved_lane_code,
            None => self.current_lane().filter(|code| !code.is_turn()),
        }
    }

    fn begin_turn(
        &mut self,
        kind: TurnKind,
        lane: LaneNumber,
        saved: Option<LaneCode>,
        t: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(period) = self.conflicting_period(t) {
            return Err(SurveyError::LaneConflict {
                period: period.clone(),
            });
        }
        if self.turn.is_some() {
            self.end_turn(t)?;
        }

        self.assign_inner(LaneCode::Turn { kind, lane }, t)?;
        self.turn = Some(TurnContext {
            kind,
            saved_lane_code: saved,
            started_at: t,
        });
        tracing::debug!("Turn {:?} from lane {} started at {}", kind, lane, t);
        Ok(())
    }

    /// Close the open turn at `t` and return to the saved lane. No-op without an open turn.
    pub fn end_turn(&mut self, t: DateTime<Utc>) -> Result<()> {
        let Some(ctx) = self.turn else {
            return Ok(());
        };
        if t < ctx.started_at {
            return Err(SurveyError::InvalidTimeRange {
                start: ctx.started_at,
                end: t,
            });
        }

        match ctx.saved_lane_code {
            Some(saved) => self.assign_inner(saved, t)?,
            None => {
                if let Some(open) = self.current_open.take() {
                    let cap = self.periods.get(open + 1).map(|p| p.from_time);
                    let period = &mut self.periods[open];
                    let end = cap.map_or(t, |cap| t.min(cap));
                    period.to_time = period.to_time.max(end);
                }
            }
        }

        self.turn = None;
        Ok(())
    }

    // ========================================================================
    // Windowed override
    // ========================================================================

    /// Overwrite `[start_t, actual_end_t]` with `code`, where `actual_end_t` is
    /// `candidate_end_t` clamped to the next period boundary after `start_t` (or the scope
    /// end). Periods straddling the window edges are trimmed; periods inside it are removed.
    pub fn change_lane_smart(
        &mut self,
        code: LaneCode,
        start_t: DateTime<Utc>,
        candidate_end_t: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let end_t = self.resolve_window_end(start_t, candidate_end_t);
        if end_t <= start_t {
            return Err(SurveyError::InvalidTimeRange {
                start: start_t,
                end: end_t,
            });
        }
        if end_t < candidate_end_t {
            tracing::info!(
                "Lane override {} clamped from {} to {}",
                code,
                candidate_end_t,
                end_t
            );
        }

        let old_open = self.current_open.take();
        let old = std::mem::take(&mut self.periods);
        // The open period covers everything up to the next period's start
        let open_covers_to = old_open.map(|open| {
            old.get(open + 1)
                .map_or(DateTime::<Utc>::MAX_UTC, |next| next.from_time)
        });
        let mut rebuilt = Vec::with_capacity(old.len() + 2);
        let mut new_open = None;
        let mut window_idx = None;
        let window = self.make_period(start_t, end_t, code);
        let mut window = Some(window);

        for (idx, mut period) in old.into_iter().enumerate() {
            let was_open = old_open == Some(idx);
            let covers_to = match open_covers_to {
                Some(cover) if was_open => cover.max(period.to_time),
                _ => period.to_time,
            };

            if covers_to <= start_t && period.from_time < start_t {
                if was_open {
                    new_open = Some(rebuilt.len());
                }
                rebuilt.push(period);
                continue;
            }

            if period.from_time >= end_t {
                if let Some(w) = window.take() {
                    window_idx = Some(rebuilt.len());
                    rebuilt.push(w);
                }
                if was_open {
                    new_open = Some(rebuilt.len());
                }
                rebuilt.push(period);
                continue;
            }

            // Intersects the window
            let right = (covers_to > end_t).then(|| {
                let mut right = period.clone();
                right.from_time = end_t;
                right.to_time = right.to_time.max(end_t);
                right
            });
            let mut left_idx = None;
            if period.from_time < start_t {
                period.to_time = start_t;
                left_idx = Some(rebuilt.len());
                rebuilt.push(period);
            }
            if let Some(w) = window.take() {
                window_idx = Some(rebuilt.len());
                rebuilt.push(w);
            }
            if let Some(right) = right {
                if was_open {
                    new_open = Some(rebuilt.len());
                }
                rebuilt.push(right);
            } else if was_open {
                // The window reaches the next period; whatever is left of the open period stays open
                new_open = left_idx.or(window_idx);
            }
        }

        if let Some(w) = window.take() {
            window_idx = Some(rebuilt.len());
            rebuilt.push(w);
        }

        self.periods = rebuilt;
        self.current_open = new_open;
        if let Some(idx) = window_idx {
            self.coalesce_at(idx);
        }
        Ok(end_t)
    }

    /// Begin adjusting an override window
    pub fn propose(
        &mut self,
        code: LaneCode,
        start_t: DateTime<Utc>,
        candidate_end_t: DateTime<Utc>,
    ) -> Result<&PendingOverride> {
        if candidate_end_t <= start_t {
            return Err(SurveyError::InvalidTimeRange {
                start: start_t,
                end: candidate_end_t,
            });
        }
        Ok(self.pending.insert(PendingOverride {
            code,
            start_t,
            candidate_end_t,
        }))
    }

    /// Move the candidate end of the pending override
    pub fn adjust(&mut self, candidate_end_t: DateTime<Utc>) -> Result<&PendingOverride> {
        let pending = self.pending.as_mut().ok_or(SurveyError::NoPendingOverride)?;
        if candidate_end_t <= pending.start_t {
            return Err(SurveyError::InvalidTimeRange {
                start: pending.start_t,
                end: candidate_end_t,
            });
        }
        pending.candidate_end_t = candidate_end_t;
        Ok(pending)
    }

    /// Apply the pending override. It stays pending if the change is rejected.
    pub fn commit(&mut self) -> Result<DateTime<Utc>> {
        let pending = self.pending.take().ok_or(SurveyError::NoPendingOverride)?;
        self.change_lane_smart(pending.code, pending.start_t, pending.candidate_end_t)
            .inspect_err(|_| self.pending = Some(pending))
    }

    pub fn cancel(&mut self) -> Option<PendingOverride> {
        self.pending.take()
    }

    pub fn pending(&self) -> Option<&PendingOverride> {
        self.pending.as_ref()
    }

    /// Where the pending override would end if committed now
    pub fn pending_window_end(&self) -> Option<DateTime<Utc>> {
        self.pending
            .as_ref()
            .map(|p| self.resolve_window_end(p.start_t, p.candidate_end_t))
    }

    // ========================================================================
    // History
    // ========================================================================

    /// Replace the history with persisted periods.
    ///
    /// Periods belonging to another plate or scope are skipped. Overlapping or inverted
    /// periods reject the whole load and leave the current history untouched.
    pub fn load_periods(&mut self, periods: Vec<LanePeriod>) -> Result<()> {
        let mut accepted: Vec<LanePeriod> = periods
            .into_iter()
            .filter(|p| {
                let ours = p.plate == self.plate && p.file_scope_id == self.file_scope_id;
                if !ours {
                    tracing::warn!(
                        "Skipping lane period for {}/{} while loading {}/{}",
                        p.plate,
                        p.file_scope_id,
                        self.plate,
                        self.file_scope_id
                    );
                }
                ours
            })
            .collect();
        accepted.sort_by_key(|p| p.from_time);

        if let Some(bad) = accepted.iter().find(|p| p.from_time > p.to_time) {
            return Err(SurveyError::InvalidTimeRange {
                start: bad.from_time,
                end: bad.to_time,
            });
        }
        if let Some(pair) = accepted.windows(2).find(|w| w[0].to_time > w[1].from_time) {
            return Err(SurveyError::OverlappingHistory {
                first: pair[0].clone(),
                second: pair[1].clone(),
            });
        }

        let mut merged: Vec<LanePeriod> = Vec::with_capacity(accepted.len());
        for period in accepted {
            match merged.last_mut() {
                Some(last)
                    if last.lane_code == period.lane_code && last.to_time == period.from_time =>
                {
                    last.to_time = last.to_time.max(period.to_time);
                }
                _ => merged.push(period),
            }
        }

        tracing::debug!(
            "Loaded {} lane periods for {}/{}",
            merged.len(),
            self.plate,
            self.file_scope_id
        );
        self.current_open = merged.len().checked_sub(1);
        self.periods = merged;
        self.turn = None;
        self.pending = None;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.periods.clear();
        self.current_open = None;
        self.turn = None;
        self.pending = None;
    }
}
