use std::fmt;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::solar::{self, SunTimes};
use crate::core::SolarError;
use crate::location::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SunEvent {
    Sunrise,
    Sunset,
}

impl SunEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            SunEvent::Sunrise => "sunrise",
            SunEvent::Sunset => "sunset",
        }
    }
}

impl fmt::Display for SunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowMode {
    #[default]
    Both,
    SunriseOnly,
    SunsetOnly,
}

impl WindowMode {
    /// Setting both flags is the same as setting neither.
    pub fn from_flags(only_sunsets: bool, only_sunrises: bool) -> Self {
        match (only_sunsets, only_sunrises) {
            (true, false) => WindowMode::SunsetOnly,
            (false, true) => WindowMode::SunriseOnly,
            _ => WindowMode::Both,
        }
    }

    pub fn includes(self, event: SunEvent) -> bool {
        match self {
            WindowMode::Both => true,
            WindowMode::SunriseOnly => event == SunEvent::Sunrise,
            WindowMode::SunsetOnly => event == SunEvent::Sunset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SchedulePolicy {
    pub location: Option<Location>,
    pub window_minutes: u32,
    pub mode: WindowMode,
    pub schedule_enabled: bool,
}

impl SchedulePolicy {
    pub fn window(&self) -> Duration {
        Duration::minutes(i64::from(self.window_minutes))
    }

    fn configured_location(&self) -> Option<&Location> {
        self.location.as_ref().filter(|l| l.is_configured())
    }
}

/// Why a decision came out the way it did.
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionReason {
    ScheduleDisabled,
    NoLocation,
    InWindow,
    OutOfWindow,
    /// Sun times could not be computed; capture is allowed.
    EvaluationFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureWindowDecision {
    pub in_window: bool,
    pub event: Option<SunEvent>,
    pub reason: DecisionReason,
}

impl CaptureWindowDecision {
    fn allow(reason: DecisionReason) -> Self {
        Self {
            in_window: true,
            event: None,
            reason,
        }
    }

    pub fn event_kind(&self) -> &'static str {
        self.event.map(SunEvent::as_str).unwrap_or("")
    }

    /// True when capture is allowed only because the policy could not be
    /// evaluated.
    pub fn is_fail_open(&self) -> bool {
        matches!(
            self.reason,
            DecisionReason::NoLocation | DecisionReason::EvaluationFailed(_)
        )
    }
}

/// Source of sunrise/sunset times for a location and local date.
pub trait SunTimesSource: Send + Sync {
    fn sun_times(
        &self,
        location: &Location,
        date: NaiveDate,
        offset: FixedOffset,
    ) -> Result<SunTimes, SolarError>;
}

/// Sun times from the sunrise equation in [`solar`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SolarCalculator;

impl SunTimesSource for SolarCalculator {
    fn sun_times(
        &self,
        location: &Location,
        date: NaiveDate,
        offset: FixedOffset,
    ) -> Result<SunTimes, SolarError> {
        solar::sun_times(location.latitude, location.longitude, date, offset)
    }
}

pub fn evaluate(policy: &SchedulePolicy, now: DateTime<Utc>) -> CaptureWindowDecision {
    evaluate_with(policy, now, &SolarCalculator)
}

/// Decides whether `now` falls inside a capture window. Never fails:
/// anything that prevents evaluation allows capture.
pub fn evaluate_with(
    policy: &SchedulePolicy,
    now: DateTime<Utc>,
    source: &dyn SunTimesSource,
) -> CaptureWindowDecision {
    if !policy.schedule_enabled {
        return CaptureWindowDecision::allow(DecisionReason::ScheduleDisabled);
    }

    let Some(location) = policy.configured_location() else {
        log::warn!("[policy] schedule enabled but no location configured, capturing anyway");
        return CaptureWindowDecision::allow(DecisionReason::NoLocation);
    };

    match matching_window(policy, location, now, source) {
        Ok(Some(event)) => CaptureWindowDecision {
            in_window: true,
            event: Some(event),
            reason: DecisionReason::InWindow,
        },
        Ok(None) => CaptureWindowDecision {
            in_window: false,
            event: None,
            reason: DecisionReason::OutOfWindow,
        },
        Err(e) => {
            log::error!("[policy] cannot evaluate capture window: {}", e);
            CaptureWindowDecision::allow(DecisionReason::EvaluationFailed(e.to_string()))
        }
    }
}

fn matching_window(
    policy: &SchedulePolicy,
    location: &Location,
    now: DateTime<Utc>,
    source: &dyn SunTimesSource,
) -> Result<Option<SunEvent>, SolarError> {
    let offset = location.offset_at(now);
    let local_now = now.with_timezone(&offset);
    let today = local_now.date_naive();
    let yesterday = today.pred_opt().ok_or(SolarError::OutOfRange(today))?;
    let tomorrow = today.succ_opt().ok_or(SolarError::OutOfRange(today))?;
    let window = policy.window();

    let candidates = [
        (SunEvent::Sunrise, today),
        (SunEvent::Sunrise, tomorrow),
        (SunEvent::Sunset, yesterday),
        (SunEvent::Sunset, today),
    ];

    let mut days = DayCache::default();
    for (event, date) in candidates {
        if !policy.mode.includes(event) {
            continue;
        }
        let times = days.get(source, location, date, offset)?;
        let at = event_time(&times, event);
        if at - window <= local_now && local_now <= at + window {
            return Ok(Some(event));
        }
    }
    Ok(None)
}

/// Start of the next capture window after `now`, if scheduling is active.
/// Days whose sun times cannot be computed are skipped.
pub fn next_window(
    policy: &SchedulePolicy,
    now: DateTime<Utc>,
) -> Option<(DateTime<FixedOffset>, SunEvent)> {
    next_window_with(policy, now, &SolarCalculator)
}

pub fn next_window_with(
    policy: &SchedulePolicy,
    now: DateTime<Utc>,
    source: &dyn SunTimesSource,
) -> Option<(DateTime<FixedOffset>, SunEvent)> {
    if !policy.schedule_enabled {
        return None;
    }
    let location = policy.configured_location()?;
    let offset = location.offset_at(now);
    let local_now = now.with_timezone(&offset);
    let window = policy.window();

    let mut best: Option<(DateTime<FixedOffset>, SunEvent)> = None;
    let mut date = local_now.date_naive();
    for _ in 0..3 {
        if let Ok(times) = source.sun_times(location, date, offset) {
            for event in [SunEvent::Sunrise, SunEvent::Sunset] {
                if !policy.mode.includes(event) {
                    continue;
                }
                let start = event_time(&times, event) - window;
                if start > local_now && best.is_none_or(|(b, _)| start < b) {
                    best = Some((start, event));
                }
            }
        }
        date = date.succ_opt()?;
    }
    best
}

fn event_time(times: &SunTimes, event: SunEvent) -> DateTime<FixedOffset> {
    match event {
        SunEvent::Sunrise => times.sunrise,
        SunEvent::Sunset => times.sunset,
    }
}

/// Memoizes sun times per date within one evaluation.
#[derive(Default)]
struct DayCache {
    days: Vec<SunTimes>,
}

impl DayCache {
    fn get(
        &mut self,
        source: &dyn SunTimesSource,
        location: &Location,
        date: NaiveDate,
        offset: FixedOffset,
    ) -> Result<SunTimes, SolarError> {
        if let Some(times) = self.days.iter().find(|t| t.date == date) {
            return Ok(*times);
        }
        let times = source.sun_times(location, date, offset)?;
        self.days.push(times);
        Ok(times)
    }
}
