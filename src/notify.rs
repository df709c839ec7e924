use std::process::{Command, Stdio};

/// Fire-and-forget user notifications. Implementations must never block
/// the caller for long and must swallow their own failures.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// Writes notifications to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        log::info!("[notify] {}: {}", title, message);
    }
}

/// Desktop popups through `notify-send`, logged as well.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    program: String,
}

impl DesktopNotifier {
    pub fn new() -> Self {
        Self {
            program: "notify-send".to_string(),
        }
    }
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, message: &str) {
        LogNotifier.notify(title, message);

        let spawned = Command::new(&self.program)
            .args(["--app-name=webcam-grabber", "--expire-time=5000", title, message])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            // Reap on a detached thread so the caller never waits.
            Ok(mut child) => {
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
            }
            Err(e) => log::debug!("[notify] {} unavailable: {}", self.program, e),
        }
    }
}
