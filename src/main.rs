// src/main.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, error, info};

use webcam_grabber::app::{self, App, AppDeps};
use webcam_grabber::config::{DEFAULT_SETTINGS_PATH, Settings, SettingsStore};
use webcam_grabber::monitoring;
use webcam_grabber::schedule;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // ------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------
    let settings_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_SETTINGS_PATH.into());

    let mut store = match SettingsStore::load(&settings_path) {
        Ok(store) => store,
        Err(e) => {
            error!("[grabber] {}; starting from defaults", e);
            SettingsStore::with_defaults(&settings_path)
        }
    };
    let mut settings = store.settings()?;
    info!("[grabber] loaded {}", settings_path);

    app::ensure_location(&mut store, &mut settings);

    // ------------------------------------------------------------
    // Graceful shutdown
    // ------------------------------------------------------------
    let running = Arc::new(AtomicBool::new(true));
    {
        let r = running.clone();
        ctrlc::set_handler(move || {
            info!("[grabber] shutdown requested");
            r.store(false, Ordering::SeqCst);
        })?;
    }

    // ------------------------------------------------------------
    // Controller
    // ------------------------------------------------------------
    let deps = AppDeps::production(&settings);
    let mut app = App::new(store, deps)?;

    start_monitoring(&settings, &app);
    log_next_window(&settings);

    app.start()?;

    // ------------------------------------------------------------
    // Main loop
    // ------------------------------------------------------------
    info!("[grabber] running – Ctrl+C to stop");

    let mut last_stats = Instant::now();

    while running.load(Ordering::Relaxed) && !app.is_quitting() {
        std::thread::sleep(Duration::from_millis(100));

        if last_stats.elapsed() >= Duration::from_secs(60) {
            for status in app.statuses() {
                debug!(
                    "[grabber] {} ok={} failed={} paused={}",
                    status.stream_id, status.captures_ok, status.captures_failed, status.paused
                );
            }
            last_stats = Instant::now();
        }
    }

    // ------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------
    info!("[grabber] shutting down…");
    running.store(false, Ordering::SeqCst);
    app.quit();
    info!("[grabber] bye");
    Ok(())
}

fn start_monitoring(settings: &Settings, app: &App) {
    let Some(port) = settings.monitoring_port else {
        return;
    };

    let bind = format!("0.0.0.0:{}", port);
    if let Err(e) = monitoring::start_monitoring_server(
        &bind,
        app.supervisor().clone(),
        app.scheduler().liveness(),
    ) {
        error!("[monitoring] error: {}", e);
        return;
    }
    info!("[grabber] monitoring on port {}", port);
}

fn log_next_window(settings: &Settings) {
    let policy = settings.schedule_policy();
    if !policy.schedule_enabled {
        return;
    }
    match schedule::next_window(&policy, chrono::Utc::now()) {
        Some((start, event)) => info!("[grabber] next {} window opens at {}", event, start),
        None => info!("[grabber] no upcoming capture window could be computed"),
    }
}
