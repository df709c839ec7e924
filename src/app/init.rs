use std::sync::Arc;

use crate::clips::{ClipConverter, PostWindowCleanup};
use crate::config::{Settings, SettingsStore};
use crate::location::{Location, detect_location};
use crate::notify::{DesktopNotifier, LogNotifier, Notifier};
use crate::schedule::{ShutdownHook, SystemShutdown};
use crate::stream::{FfmpegCapture, FrameCapture, StreamResolver, YtDlpResolver};

/// External capabilities the controller wires into workers and the
/// scheduler.
#[derive(Clone)]
pub struct AppDeps {
    pub resolver: Arc<dyn StreamResolver>,
    pub capture: Arc<dyn FrameCapture>,
    pub notifier: Arc<dyn Notifier>,
    pub cleanup: Arc<dyn PostWindowCleanup>,
    /// Set when `cleanup` is the clip converter, so setting changes reach it.
    pub clips: Option<Arc<ClipConverter>>,
    pub shutdown: Arc<dyn ShutdownHook>,
}

impl AppDeps {
    /// yt-dlp, ffmpeg, clip conversion and a real shutdown hook.
    pub fn production(settings: &Settings) -> Self {
        let clips = Arc::new(ClipConverter::new(settings.clip_settings()));
        Self {
            resolver: Arc::new(YtDlpResolver::new()),
            capture: Arc::new(FfmpegCapture::new()),
            notifier: build_notifier(settings),
            cleanup: clips.clone(),
            clips: Some(clips),
            shutdown: Arc::new(SystemShutdown),
        }
    }
}

pub fn build_notifier(settings: &Settings) -> Arc<dyn Notifier> {
    if settings.desktop_notifications {
        Arc::new(DesktopNotifier::new())
    } else {
        Arc::new(LogNotifier)
    }
}

/// Fills in the location from IP geolocation when none is configured and
/// detection is enabled. Persists what it finds.
pub fn ensure_location(store: &mut SettingsStore, settings: &mut Settings) {
    if Location::from_settings(settings).is_some() || !settings.auto_detect_location {
        return;
    }

    let Some(location) = detect_location() else {
        log::warn!("[app] no location available; sun schedule will capture all day");
        return;
    };

    match store.set("location", &location) {
        Ok(()) => log::info!("[app] location set to {}", location.label()),
        Err(e) => log::error!("[app] failed to persist detected location: {}", e),
    }
    settings.location = location;
}
