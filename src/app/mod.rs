//! The controller the UI layer drives. Owns the settings store as its
//! single writer and pushes every change to the running components.

pub mod init;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use url::Url;

pub use init::{AppDeps, build_notifier, ensure_location};

use crate::config::{Settings, SettingsStore};
use crate::core::{AppError, lock_mutex};
use crate::location::Location;
use crate::schedule::{CaptureScheduler, TickOutcome};
use crate::stream::{StreamId, StreamInfoCache, prefetch, ytdlp};
use crate::supervisor::StreamSupervisor;
use crate::worker::{WorkerDeps, WorkerStatus};

const ALLOWED_HOSTS: &[&str] = &["youtube.com", "www.youtube.com", "m.youtube.com", "youtu.be"];

pub struct App {
    store: SettingsStore,
    settings: Settings,
    deps: AppDeps,
    cache: Arc<StreamInfoCache>,
    supervisor: Arc<Mutex<StreamSupervisor>>,
    scheduler: CaptureScheduler,
    quit: Arc<AtomicBool>,
}

impl App {
    pub fn new(store: SettingsStore, deps: AppDeps) -> Result<Self, AppError> {
        let settings = store.settings()?;
        let cache = Arc::new(StreamInfoCache::new());
        let supervisor = Arc::new(Mutex::new(StreamSupervisor::new(WorkerDeps {
            cache: cache.clone(),
            resolver: deps.resolver.clone(),
            capture: deps.capture.clone(),
            notifier: deps.notifier.clone(),
        })));
        let scheduler = CaptureScheduler::new(
            supervisor.clone(),
            settings.capture_plan(),
            deps.cleanup.clone(),
            deps.shutdown.clone(),
        );
        if settings.paused {
            scheduler.pause();
        }

        Ok(Self {
            store,
            settings,
            deps,
            cache,
            supervisor,
            scheduler,
            quit: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Warms the stream cache in the background and starts the tick loop.
    pub fn start(&mut self) -> anyhow::Result<()> {
        self.prefetch_in_background(self.settings.stream_ids());
        self.scheduler.start()?;
        log::info!(
            "[app] capturing {} stream(s) every {}s",
            self.settings.youtube_urls.len(),
            self.settings.interval
        );
        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn scheduler(&self) -> &CaptureScheduler {
        &self.scheduler
    }

    pub fn cache(&self) -> &Arc<StreamInfoCache> {
        &self.cache
    }

    pub fn supervisor(&self) -> &Arc<Mutex<StreamSupervisor>> {
        &self.supervisor
    }

    pub fn statuses(&self) -> Vec<WorkerStatus> {
        lock_mutex(&self.supervisor, "app.statuses").statuses()
    }

    pub fn quit_flag(&self) -> Arc<AtomicBool> {
        self.quit.clone()
    }

    pub fn is_quitting(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    /// Replaces the stream list. Blank entries are dropped and duplicates
    /// collapsed; any URL outside YouTube rejects the whole list.
    pub fn set_stream_urls(&mut self, urls: &[String]) -> Result<(), AppError> {
        let mut seen = BTreeSet::new();
        let mut cleaned = Vec::new();
        for url in urls.iter().map(|u| u.trim()).filter(|u| !u.is_empty()) {
            validate_stream_url(url)?;
            if seen.insert(url.to_string()) {
                cleaned.push(url.to_string());
            }
        }

        let added: Vec<StreamId> = cleaned
            .iter()
            .filter(|url| !self.settings.youtube_urls.contains(url))
            .map(|url| StreamId::new(url.as_str()))
            .collect();

        self.store.set("youtube_urls", &cleaned)?;
        self.settings.youtube_urls = cleaned;
        self.prefetch_in_background(added);
        self.apply();
        Ok(())
    }

    pub fn set_location(&mut self, location: Location) -> Result<(), AppError> {
        if !location.is_valid() {
            return Err(AppError::InvalidValue {
                key: "location",
                message: format!("{}, {} is out of range", location.latitude, location.longitude),
            });
        }
        self.store.set("location", &location)?;
        log::info!("[app] location set to {}", location.label());
        self.settings.location = location;
        self.apply();
        Ok(())
    }

    /// Restarts every worker with the new interval. Cached stream info is kept.
    pub fn set_interval(&mut self, seconds: u64) -> Result<(), AppError> {
        if seconds == 0 {
            return Err(AppError::InvalidValue {
                key: "interval",
                message: "must be at least one second".to_string(),
            });
        }
        self.store.set("interval", seconds)?;
        self.settings.interval = seconds;
        self.scheduler.update_plan(self.settings.capture_plan());
        lock_mutex(&self.supervisor, "app.set_interval").update_interval(Duration::from_secs(seconds));
        Ok(())
    }

    /// Cached stream info was resolved for the old resolution, so it is dropped.
    pub fn set_resolution(&mut self, resolution: &str) -> Result<(), AppError> {
        let height = ytdlp::parse_resolution(resolution).map_err(|e| AppError::InvalidValue {
            key: "resolution",
            message: e.to_string(),
        })?;
        let label = format!("{}p", height);
        self.store.set("resolution", &label)?;
        self.settings.resolution = label;
        self.cache.clear();
        self.apply();
        Ok(())
    }

    pub fn set_time_window(&mut self, minutes: u32) -> Result<(), AppError> {
        self.store.set("time_window", minutes)?;
        self.settings.time_window = minutes;
        self.apply();
        Ok(())
    }

    pub fn set_output_path(&mut self, path: impl Into<PathBuf>) -> Result<(), AppError> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(AppError::InvalidValue {
                key: "output_path",
                message: "must not be empty".to_string(),
            });
        }
        let path = path.to_string_lossy().into_owned();
        self.store.set("output_path", &path)?;
        self.settings.output_path = path;
        if let Some(clips) = &self.deps.clips {
            clips.update(self.settings.clip_settings());
        }
        self.apply();
        Ok(())
    }

    pub fn toggle_schedule(&mut self) -> Result<bool, AppError> {
        let enabled = !self.settings.schedule_enabled;
        self.store.set("schedule_enabled", enabled)?;
        self.settings.schedule_enabled = enabled;
        log::info!("[app] sun schedule {}", if enabled { "enabled" } else { "disabled" });
        self.apply();
        Ok(enabled)
    }

    pub fn toggle_only_sunsets(&mut self) -> Result<bool, AppError> {
        let value = !self.settings.only_sunsets;
        self.store.set("only_sunsets", value)?;
        self.settings.only_sunsets = value;
        self.apply();
        Ok(value)
    }

    pub fn toggle_only_sunrises(&mut self) -> Result<bool, AppError> {
        let value = !self.settings.only_sunrises;
        self.store.set("only_sunrises", value)?;
        self.settings.only_sunrises = value;
        self.apply();
        Ok(value)
    }

    pub fn toggle_pause(&mut self) -> Result<bool, AppError> {
        let paused = !self.settings.paused;
        self.store.set("paused", paused)?;
        self.settings.paused = paused;

        let supervisor = lock_mutex(&self.supervisor, "app.toggle_pause");
        if paused {
            self.scheduler.pause();
            supervisor.pause_all();
        } else {
            supervisor.resume_all();
            self.scheduler.resume();
        }
        Ok(paused)
    }

    /// Stops the scheduler and every worker. Idempotent.
    pub fn quit(&mut self) {
        if self.quit.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("[app] quitting");
        self.scheduler.stop();
        lock_mutex(&self.supervisor, "app.quit").stop_all();
    }

    /// Pushes the current settings to the scheduler. Streams inside a window
    /// are reconciled immediately; window exits run on the tick loop.
    fn apply(&self) -> TickOutcome {
        self.scheduler.update_plan(self.settings.capture_plan());
        self.scheduler.refresh(Utc::now())
    }

    fn prefetch_in_background(&self, streams: Vec<StreamId>) {
        if streams.is_empty() {
            return;
        }
        let cache = self.cache.clone();
        let resolver = self.deps.resolver.clone();
        let resolution = self.settings.resolution.clone();
        let spawned = std::thread::Builder::new()
            .name("prefetch".to_string())
            .spawn(move || prefetch(&cache, resolver.as_ref(), &streams, &resolution));
        if let Err(e) = spawned {
            log::warn!("[app] prefetch thread failed to start: {}", e);
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.quit();
    }
}

/// Accepts http(s) URLs on the YouTube hosts.
pub fn validate_stream_url(raw: &str) -> Result<(), AppError> {
    let invalid = || AppError::InvalidUrl(raw.to_string());
    let parsed = Url::parse(raw).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid());
    }
    let host = parsed.host_str().ok_or_else(invalid)?.to_ascii_lowercase();
    if ALLOWED_HOSTS.contains(&host.as_str()) {
        Ok(())
    } else {
        Err(invalid())
    }
}
