use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

use webcam_grabber::core::SolarError;
use webcam_grabber::location::Location;
use webcam_grabber::schedule::{
    DecisionReason, SchedulePolicy, SunEvent, SunTimes, SunTimesSource, WindowMode, evaluate,
    evaluate_with, sun_times,
};

/// Sunrise at 06:00 and sunset at 18:00 local time.
struct SixToSix;

impl SunTimesSource for SixToSix {
    fn sun_times(
        &self,
        _location: &Location,
        date: NaiveDate,
        offset: FixedOffset,
    ) -> Result<SunTimes, SolarError> {
        let at = |h| {
            offset
                .from_local_datetime(&date.and_time(NaiveTime::from_hms_opt(h, 0, 0).unwrap()))
                .unwrap()
        };
        Ok(SunTimes {
            date,
            sunrise: at(6),
            sunset: at(18),
        })
    }
}

fn policy(location: Option<Location>, schedule_enabled: bool) -> SchedulePolicy {
    SchedulePolicy {
        location,
        window_minutes: 30,
        mode: WindowMode::Both,
        schedule_enabled,
    }
}

/// 2024-03-10 at the given local time in UTC+02:00.
fn local(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    FixedOffset::east_opt(2 * 3600)
        .unwrap()
        .with_ymd_and_hms(2024, 3, 10, h, m, s)
        .unwrap()
        .with_timezone(&Utc)
}

#[test]
fn window_boundaries_are_inclusive() {
    let p = policy(Some(Location::new(45.0, 25.0).with_offset_minutes(120)), true);

    assert!(evaluate_with(&p, local(5, 30, 0), &SixToSix).in_window);
    assert!(evaluate_with(&p, local(6, 30, 0), &SixToSix).in_window);
    assert!(!evaluate_with(&p, local(5, 29, 59), &SixToSix).in_window);
    assert!(!evaluate_with(&p, local(6, 30, 1), &SixToSix).in_window);

    let decision = evaluate_with(&p, local(18, 15, 0), &SixToSix);
    assert_eq!(decision.event, Some(SunEvent::Sunset));
}

#[test]
fn disabled_schedule_always_in_window() {
    let locations = [
        None,
        Some(Location::new(0.0, 0.0)),
        Some(Location::new(78.22, 15.65)),
        Some(Location::new(-33.87, 151.21).with_offset_minutes(600)),
        Some(Location::new(64.14, -21.94).with_offset_minutes(0)),
    ];
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    for location in locations {
        let p = policy(location, false);
        for step in 0..200 {
            let now = start + chrono::Duration::minutes(step * 2_633);
            let decision = evaluate(&p, now);
            assert!(decision.in_window);
            assert_eq!(decision.event_kind(), "");
        }
    }
}

#[test]
fn missing_location_fails_open() {
    let decision = evaluate(&policy(None, true), Utc::now());

    assert!(decision.in_window);
    assert_eq!(decision.reason, DecisionReason::NoLocation);
    assert!(decision.is_fail_open());
}

#[test]
fn real_sun_times_bracket_a_window() {
    let reykjavik = Location::new(64.14, -21.94).with_offset_minutes(0);
    let date = NaiveDate::from_ymd_opt(2024, 9, 22).unwrap();
    let times = sun_times(
        reykjavik.latitude,
        reykjavik.longitude,
        date,
        FixedOffset::east_opt(0).unwrap(),
    )
    .unwrap();

    let p = policy(Some(reykjavik), true);
    let at_sunrise = times.sunrise.with_timezone(&Utc);
    let at_sunset = times.sunset.with_timezone(&Utc);
    let midday = at_sunrise + (at_sunset - at_sunrise) / 2;

    assert_eq!(evaluate(&p, at_sunrise).event_kind(), "sunrise");
    assert_eq!(evaluate(&p, at_sunset).event_kind(), "sunset");
    assert!(!evaluate(&p, midday).in_window);
}
