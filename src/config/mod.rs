//! Persistent settings: a JSON document on disk, read once and rewritten
//! on every change, plus the typed snapshot the rest of the crate uses.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::clips::ClipSettings;
use crate::core::SettingsError;
use crate::location::Location;
use crate::schedule::{CapturePlan, SchedulePolicy, WindowMode};
use crate::stream::StreamId;

pub const DEFAULT_SETTINGS_PATH: &str = "config.json";

const DEFAULT_INTERVAL_SECS: u64 = 60;
const DEFAULT_TIME_WINDOW_MINUTES: u32 = 30;

/// Interval labels written by older releases.
const LEGACY_INTERVALS: &[(&str, u64)] = &[
    ("1 second", 1),
    ("2 seconds", 2),
    ("3 seconds", 3),
    ("4 seconds", 4),
    ("5 seconds", 5),
    ("10 seconds", 10),
    ("15 seconds", 15),
    ("30 seconds", 30),
    ("45 seconds", 45),
    ("1 minute", 60),
    ("1:15 minute", 75),
    ("1:30 minute", 90),
    ("1:45 minute", 105),
    ("2 minutes", 120),
    ("3 minutes", 180),
    ("4 minutes", 240),
    ("5 minutes", 300),
    ("6 minutes", 360),
    ("7 minutes", 420),
    ("8 minutes", 480),
    ("9 minutes", 540),
    ("10 minutes", 600),
    ("15 minutes", 900),
    ("30 minutes", 1800),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub youtube_urls: Vec<String>,
    pub output_path: String,
    /// Seconds between captures.
    pub interval: u64,
    pub resolution: String,
    /// Minutes either side of sunrise/sunset.
    pub time_window: u32,
    pub only_sunsets: bool,
    pub only_sunrises: bool,
    pub schedule_enabled: bool,
    pub location: Location,
    pub shutdown_when_done: bool,
    pub paused: bool,
    pub convert_to_clips: bool,
    pub delete_frames_after_clip: bool,
    pub clip_fps: u32,
    pub auto_detect_location: bool,
    pub desktop_notifications: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitoring_port: Option<u16>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            youtube_urls: Vec::new(),
            output_path: "screenshots".to_string(),
            interval: DEFAULT_INTERVAL_SECS,
            resolution: "1080p".to_string(),
            time_window: DEFAULT_TIME_WINDOW_MINUTES,
            only_sunsets: false,
            only_sunrises: false,
            schedule_enabled: false,
            location: Location::new(0.0, 0.0),
            shutdown_when_done: false,
            paused: false,
            convert_to_clips: true,
            delete_frames_after_clip: false,
            clip_fps: 30,
            auto_detect_location: true,
            desktop_notifications: false,
            monitoring_port: None,
        }
    }
}

impl Settings {
    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.youtube_urls.iter().map(|url| StreamId::new(url.trim())).collect()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval.max(1))
    }

    pub fn schedule_policy(&self) -> SchedulePolicy {
        SchedulePolicy {
            location: Location::from_settings(self),
            window_minutes: self.time_window,
            mode: WindowMode::from_flags(self.only_sunsets, self.only_sunrises),
            schedule_enabled: self.schedule_enabled,
        }
    }

    pub fn capture_plan(&self) -> CapturePlan {
        CapturePlan {
            streams: self.stream_ids(),
            output_root: PathBuf::from(&self.output_path),
            interval: self.interval(),
            resolution: self.resolution.clone(),
            policy: self.schedule_policy(),
            shutdown_when_done: self.shutdown_when_done,
        }
    }

    pub fn clip_settings(&self) -> ClipSettings {
        ClipSettings {
            enabled: self.convert_to_clips,
            output_root: PathBuf::from(&self.output_path),
            fps: self.clip_fps.max(1),
            delete_frames: self.delete_frames_after_clip,
        }
    }
}

/// Key-value view over the settings file. Unknown keys are preserved.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl SettingsStore {
    /// Loads `path`, migrating legacy values and filling in defaults. A
    /// missing file yields the defaults without writing anything.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        let mut values = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Ok(Value::Object(map)) => map,
                Ok(_) => return Err(SettingsError::NotAnObject),
                Err(source) => return Err(SettingsError::Parse { path, source }),
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!("[config] {} not found, using defaults", path.display());
                Map::new()
            }
            Err(source) => return Err(SettingsError::Read { path, source }),
        };

        migrate(&mut values);
        fill_defaults(&mut values);
        Ok(Self { path, values })
    }

    /// Defaults only, persisted to `path` on the first `set`.
    pub fn with_defaults(path: impl AsRef<Path>) -> Self {
        let mut values = Map::new();
        fill_defaults(&mut values);
        Self {
            path: path.as_ref().to_path_buf(),
            values,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.values.get(key).cloned().unwrap_or(default)
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SettingsError> {
        self.values
            .get(key)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|source| SettingsError::Value {
                    key: key.to_string(),
                    source,
                })
            })
            .transpose()
    }

    /// Stores `value` under `key` and rewrites the file.
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), SettingsError> {
        let value = serde_json::to_value(value).map_err(|source| SettingsError::Value {
            key: key.to_string(),
            source,
        })?;
        self.values.insert(key.to_string(), coerce(key, value));
        self.save()
    }

    /// Stores several values with a single write.
    pub fn update(&mut self, entries: Map<String, Value>) -> Result<(), SettingsError> {
        for (key, value) in entries {
            let value = coerce(&key, value);
            self.values.insert(key, value);
        }
        self.save()
    }

    pub fn all(&self) -> Map<String, Value> {
        self.values.clone()
    }

    pub fn settings(&self) -> Result<Settings, SettingsError> {
        serde_json::from_value(Value::Object(self.values.clone())).map_err(|source| {
            SettingsError::Value {
                key: "*".to_string(),
                source,
            }
        })
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        let content = serde_json::to_string_pretty(&self.values).map_err(|source| {
            SettingsError::Value {
                key: "*".to_string(),
                source,
            }
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                path: self.path.clone(),
                source,
            })?;
        }

        // Write-then-rename keeps the previous file intact on failure.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|source| SettingsError::Write {
                path: self.path.clone(),
                source,
            })
    }
}

fn migrate(values: &mut Map<String, Value>) {
    if let Some(legacy) = values.remove("preferred_resolution") {
        log::info!("[config] migrated preferred_resolution to resolution");
        values.insert("resolution".to_string(), legacy);
    }

    for key in ["interval", "time_window"] {
        if let Some(value) = values.remove(key) {
            values.insert(key.to_string(), coerce(key, value));
        }
    }
}

fn fill_defaults(values: &mut Map<String, Value>) {
    if let Ok(Value::Object(defaults)) = serde_json::to_value(Settings::default()) {
        for (key, value) in defaults {
            values.entry(key).or_insert(value);
        }
    }
}

/// Integer coercion for the numeric keys, falling back to the default.
fn coerce(key: &str, value: Value) -> Value {
    match key {
        "interval" => Value::from(parse_interval(&value).unwrap_or_else(|| {
            log::error!("[config] invalid interval {}, using default", value);
            DEFAULT_INTERVAL_SECS
        })),
        "time_window" => Value::from(parse_count(&value).unwrap_or_else(|| {
            log::error!("[config] invalid time window {}, using default", value);
            u64::from(DEFAULT_TIME_WINDOW_MINUTES)
        })),
        _ => value,
    }
}

fn parse_interval(value: &Value) -> Option<u64> {
    if let Value::String(label) = value {
        let label = label.trim();
        if let Some((_, secs)) = LEGACY_INTERVALS.iter().find(|(l, _)| *l == label) {
            return Some(*secs);
        }
    }
    parse_count(value).filter(|secs| *secs > 0)
}

fn parse_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.json");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::load(dir.path().join("absent.json")).unwrap();

        assert_eq!(store.settings().unwrap(), Settings::default());
        assert!(!dir.path().join("absent.json").exists());
    }

    #[test]
    fn test_legacy_interval_and_resolution_are_migrated() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            r#"{"interval": "1:30 minute", "preferred_resolution": "720p", "time_window": "45"}"#,
        );
        let settings = SettingsStore::load(&path).unwrap().settings().unwrap();

        assert_eq!(settings.interval, 90);
        assert_eq!(settings.resolution, "720p");
        assert_eq!(settings.time_window, 45);
    }

    #[test]
    fn test_unknown_interval_label_uses_default() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, r#"{"interval": "every so often"}"#);
        let store = SettingsStore::load(&path).unwrap();
        assert_eq!(store.get("interval"), Some(&json!(60)));
    }

    #[test]
    fn test_set_persists_and_preserves_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, r#"{"window_geometry": "800x600"}"#);

        let mut store = SettingsStore::load(&path).unwrap();
        store.set("interval", "30").unwrap();
        store.set("youtube_urls", vec!["https://youtu.be/a"]).unwrap();

        let reloaded = SettingsStore::load(&path).unwrap();
        assert_eq!(reloaded.get("interval"), Some(&json!(30)));
        assert_eq!(reloaded.get("window_geometry"), Some(&json!("800x600")));
        assert_eq!(
            reloaded.get_as::<Vec<String>>("youtube_urls").unwrap(),
            Some(vec!["https://youtu.be/a".to_string()])
        );
    }

    #[test]
    fn test_get_or_falls_back() {
        let store = SettingsStore::with_defaults("unused.json");
        assert_eq!(store.get_or("nope", json!(7)), json!(7));
        assert_eq!(store.get_or("clip_fps", json!(7)), json!(30));
    }

    #[test]
    fn test_update_writes_once_with_coercion() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut store = SettingsStore::with_defaults(&path);

        let mut entries = Map::new();
        entries.insert("time_window".to_string(), json!(12.0));
        entries.insert("schedule_enabled".to_string(), json!(true));
        store.update(entries).unwrap();

        let settings = SettingsStore::load(&path).unwrap().settings().unwrap();
        assert_eq!(settings.time_window, 12);
        assert!(settings.schedule_enabled);
    }

    #[test]
    fn test_non_object_document_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "[1, 2, 3]");
        assert!(matches!(
            SettingsStore::load(&path),
            Err(SettingsError::NotAnObject)
        ));

        let path = write(&dir, "{ not json");
        assert!(matches!(
            SettingsStore::load(&path),
            Err(SettingsError::Parse { .. })
        ));
    }

    #[test]
    fn test_snapshot_builds_schedule_policy() {
        let settings = Settings {
            only_sunsets: true,
            only_sunrises: true,
            schedule_enabled: true,
            ..Settings::default()
        };
        let policy = settings.schedule_policy();

        assert_eq!(policy.mode, WindowMode::Both);
        assert!(policy.location.is_none());
        assert_eq!(policy.window_minutes, 30);
        assert_eq!(settings.capture_plan().interval, Duration::from_secs(60));
    }

    #[test]
    fn test_location_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            r#"{"location": {"latitude": 48.85, "longitude": 2.35, "name": "Paris"}}"#,
        );
        let settings = SettingsStore::load(&path).unwrap().settings().unwrap();
        assert_eq!(settings.location.name, "Paris");
        assert!(settings.location.is_configured());
    }
}
