//! Sunrise and sunset times from the sunrise equation.
//!
//! Accurate to a minute or two away from the poles, which is well inside
//! any capture window worth configuring.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

use crate::core::SolarError;

const J2000: f64 = 2_451_545.0;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
/// Julian day number of 1970-01-01 at noon.
const UNIX_EPOCH_JDN: f64 = 2_440_588.0;
const SECONDS_PER_DAY: f64 = 86_400.0;
const EARTH_TILT_DEG: f64 = 23.4397;
/// Refraction plus the solar disc radius.
const HORIZON_DEG: f64 = -0.833;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SunTimes {
    pub date: NaiveDate,
    pub sunrise: DateTime<FixedOffset>,
    pub sunset: DateTime<FixedOffset>,
}

/// Computes sunrise and sunset for the local calendar `date` at the given
/// coordinates, expressed at `offset`.
pub fn sun_times(
    latitude: f64,
    longitude: f64,
    date: NaiveDate,
    offset: FixedOffset,
) -> Result<SunTimes, SolarError> {
    if !latitude.is_finite()
        || !longitude.is_finite()
        || !(-90.0..=90.0).contains(&latitude)
        || !(-180.0..=180.0).contains(&longitude)
    {
        return Err(SolarError::InvalidCoordinates {
            latitude,
            longitude,
        });
    }

    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).ok_or(SolarError::OutOfRange(date))?;
    let days = date.signed_duration_since(epoch).num_days() as f64;

    let n = days + UNIX_EPOCH_JDN - J2000;
    let mean_solar_noon = n - longitude / 360.0;

    let anomaly = (357.5291 + 0.985_600_28 * mean_solar_noon).rem_euclid(360.0);
    let m = anomaly.to_radians();
    let center = 1.9148 * m.sin() + 0.02 * (2.0 * m).sin() + 0.0003 * (3.0 * m).sin();
    let ecliptic_longitude = (anomaly + center + 180.0 + 102.9372).rem_euclid(360.0).to_radians();

    let transit = J2000 + mean_solar_noon + 0.0053 * m.sin() - 0.0069 * (2.0 * ecliptic_longitude).sin();

    let sin_decl = ecliptic_longitude.sin() * EARTH_TILT_DEG.to_radians().sin();
    let cos_decl = (1.0 - sin_decl * sin_decl).sqrt();
    let phi = latitude.to_radians();

    let cos_hour_angle =
        (HORIZON_DEG.to_radians().sin() - phi.sin() * sin_decl) / (phi.cos() * cos_decl);
    if !(-1.0..=1.0).contains(&cos_hour_angle) {
        return Err(SolarError::NoEvent { date, latitude });
    }
    let hour_angle = cos_hour_angle.acos().to_degrees();

    let sunrise = julian_to_datetime(transit - hour_angle / 360.0, date)?;
    let sunset = julian_to_datetime(transit + hour_angle / 360.0, date)?;

    Ok(SunTimes {
        date,
        sunrise: sunrise.with_timezone(&offset),
        sunset: sunset.with_timezone(&offset),
    })
}

fn julian_to_datetime(julian: f64, date: NaiveDate) -> Result<DateTime<Utc>, SolarError> {
    let unix = (julian - UNIX_EPOCH_JD) * SECONDS_PER_DAY;
    let secs = unix.floor();
    let nanos = ((unix - secs) * 1e9) as u32;
    DateTime::from_timestamp(secs as i64, nanos).ok_or(SolarError::OutOfRange(date))
}
