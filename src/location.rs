//! Observer location for sun calculations, plus best-effort detection.
//!
//! Detection order: `ipapi.co`, then `ip-api.com`, then nothing. The
//! first provider that returns usable coordinates wins.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Settings;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);
const IPAPI_URL: &str = "https://ipapi.co/json/";
const IP_API_URL: &str = "http://ip-api.com/json/";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub name: String,
    /// Fixed UTC offset of the location. The host's offset when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<i32>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            name: String::new(),
            utc_offset_minutes: None,
        }
    }

    pub fn with_offset_minutes(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = Some(minutes);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The configured location, or `None` while it is still the (0, 0)
    /// placeholder.
    pub fn from_settings(settings: &Settings) -> Option<Location> {
        let location = &settings.location;
        (location.is_configured() && location.is_valid()).then(|| location.clone())
    }

    /// (0, 0) is the settings placeholder for "not configured".
    pub fn is_configured(&self) -> bool {
        self.latitude != 0.0 || self.longitude != 0.0
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    pub fn offset_at(&self, now: DateTime<Utc>) -> FixedOffset {
        self.utc_offset_minutes
            .and_then(|minutes| FixedOffset::east_opt(minutes * 60))
            .unwrap_or_else(|| Local.offset_from_utc_datetime(&now.naive_utc()).fix())
    }

    pub fn label(&self) -> String {
        if self.name.is_empty() {
            format!("{:.4}, {:.4}", self.latitude, self.longitude)
        } else {
            self.name.clone()
        }
    }
}

#[derive(Debug, Deserialize)]
struct IpapiResponse {
    latitude: Option<f64>,
    longitude: Option<f64>,
    city: Option<String>,
    utc_offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    city: Option<String>,
    offset: Option<i32>,
}

/// Looks up the host's approximate location from its public IP.
pub fn detect_location() -> Option<Location> {
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(LOOKUP_TIMEOUT)
        .timeout_read(LOOKUP_TIMEOUT)
        .build();

    match query_ipapi(&agent) {
        Ok(Some(location)) => {
            log::info!("[location] ipapi.co: {}", location.label());
            return Some(location);
        }
        Ok(None) => log::debug!("[location] ipapi.co returned no coordinates"),
        Err(e) => log::debug!("[location] ipapi.co failed: {}", e),
    }

    match query_ip_api(&agent) {
        Ok(Some(location)) => {
            log::info!("[location] ip-api.com: {}", location.label());
            Some(location)
        }
        Ok(None) => {
            log::warn!("[location] no provider returned a location");
            None
        }
        Err(e) => {
            log::warn!("[location] ip-api.com failed: {}", e);
            None
        }
    }
}

fn query_ipapi(agent: &ureq::Agent) -> anyhow::Result<Option<Location>> {
    let text = agent.get(IPAPI_URL).call()?.into_string()?;
    let body: IpapiResponse = serde_json::from_str(&text)?;
    Ok(location_from_ipapi(body))
}

fn query_ip_api(agent: &ureq::Agent) -> anyhow::Result<Option<Location>> {
    let text = agent.get(IP_API_URL).call()?.into_string()?;
    let body: IpApiResponse = serde_json::from_str(&text)?;
    Ok(location_from_ip_api(body))
}

fn location_from_ipapi(body: IpapiResponse) -> Option<Location> {
    let location = Location {
        latitude: body.latitude?,
        longitude: body.longitude?,
        name: body.city.unwrap_or_default(),
        utc_offset_minutes: body.utc_offset.as_deref().and_then(parse_hhmm_offset),
    };
    location.is_valid().then_some(location)
}

fn location_from_ip_api(body: IpApiResponse) -> Option<Location> {
    if body.status.as_deref() != Some("success") {
        return None;
    }
    let location = Location {
        latitude: body.lat?,
        longitude: body.lon?,
        name: body.city.unwrap_or_default(),
        utc_offset_minutes: body.offset.map(|seconds| seconds / 60),
    };
    location.is_valid().then_some(location)
}

/// Parses offsets such as `+0800` or `-0530` into minutes.
fn parse_hhmm_offset(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    let (sign, digits) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => (1, raw),
    };
    let digits = digits.replace(':', "");
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    Some(sign * (hours * 60 + minutes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_coordinates_are_unconfigured() {
        assert!(!Location::new(0.0, 0.0).is_configured());
        assert!(Location::new(0.0, 12.5).is_configured());
    }

    #[test]
    fn test_from_settings_skips_placeholder() {
        let mut settings = Settings::default();
        assert!(Location::from_settings(&settings).is_none());

        settings.location = Location::new(52.52, 13.40).with_name("Berlin");
        assert_eq!(Location::from_settings(&settings).unwrap().name, "Berlin");
    }

    #[test]
    fn test_explicit_offset_is_used() {
        let loc = Location::new(1.35, 103.82).with_offset_minutes(480);
        assert_eq!(loc.offset_at(Utc::now()).local_minus_utc(), 8 * 3600);
    }

    #[test]
    fn test_parse_hhmm_offset() {
        assert_eq!(parse_hhmm_offset("+0800"), Some(480));
        assert_eq!(parse_hhmm_offset("-0530"), Some(-330));
        assert_eq!(parse_hhmm_offset("+05:45"), Some(345));
        assert_eq!(parse_hhmm_offset("bogus"), None);
        assert_eq!(parse_hhmm_offset("+1é2"), None);
        assert_eq!(parse_hhmm_offset("é123"), None);
        assert_eq!(parse_hhmm_offset("+-130"), None);
    }

    #[test]
    fn test_ipapi_payload() {
        let body: IpapiResponse = serde_json::from_str(
            r#"{"city": "Lisbon", "latitude": 38.72, "longitude": -9.13, "utc_offset": "+0100"}"#,
        )
        .unwrap();
        let loc = location_from_ipapi(body).unwrap();
        assert_eq!(loc.name, "Lisbon");
        assert_eq!(loc.utc_offset_minutes, Some(60));
    }

    #[test]
    fn test_ipapi_error_payload() {
        let body: IpapiResponse =
            serde_json::from_str(r#"{"error": true, "reason": "RateLimited"}"#).unwrap();
        assert!(location_from_ipapi(body).is_none());
    }

    #[test]
    fn test_ip_api_payload() {
        let body: IpApiResponse = serde_json::from_str(
            r#"{"status": "success", "lat": -33.87, "lon": 151.21, "city": "Sydney", "offset": 36000}"#,
        )
        .unwrap();
        let loc = location_from_ip_api(body).unwrap();
        assert_eq!(loc.utc_offset_minutes, Some(600));

        let failed: IpApiResponse = serde_json::from_str(r#"{"status": "fail"}"#).unwrap();
        assert!(location_from_ip_api(failed).is_none());
    }
}
