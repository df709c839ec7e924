use std::sync::atomic::{AtomicU64, Ordering};

// Global sequence number, lets interleaved worker logs be correlated.
static LOG_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct LogContext {
    pub component: String,
    pub instance_id: String,
    pub event: Option<String>,
    pub sequence: u64,
}

impl LogContext {
    pub fn new(component: &str, instance_id: &str) -> Self {
        Self {
            component: component.to_string(),
            instance_id: instance_id.to_string(),
            event: None,
            sequence: LOG_SEQUENCE.fetch_add(1, Ordering::Relaxed) + 1,
        }
    }

    pub fn with_event(mut self, event: &str) -> Self {
        self.event = Some(event.to_string());
        self
    }

    pub fn format(&self, level: &str, message: &str) -> String {
        let event_info = match &self.event {
            Some(event) => format!(" event={}", event),
            None => String::new(),
        };

        format!(
            "[{}][seq={:06}][{}:{}{}] {}",
            level, self.sequence, self.component, self.instance_id, event_info, message
        )
    }
}

/// Uniform log formatting for long-running components.
pub trait ComponentLogger {
    fn log_context(&self) -> LogContext;

    fn debug(&self, message: &str) {
        log::debug!("{}", self.log_context().format("DEBUG", message));
    }

    fn info(&self, message: &str) {
        log::info!("{}", self.log_context().format("INFO", message));
    }

    fn warn(&self, message: &str) {
        log::warn!("{}", self.log_context().format("WARN", message));
    }

    fn error(&self, message: &str) {
        log::error!("{}", self.log_context().format("ERROR", message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_context_creation() {
        let ctx = LogContext::new("worker", "https://youtu.be/abc");

        assert_eq!(ctx.component, "worker");
        assert_eq!(ctx.instance_id, "https://youtu.be/abc");
        assert!(ctx.sequence > 0);
        assert!(ctx.event.is_none());
    }

    #[test]
    fn test_log_formatting() {
        let ctx = LogContext::new("scheduler", "main");
        let formatted = ctx.format("INFO", "tick");

        assert!(formatted.contains("[INFO]"));
        assert!(formatted.contains("[scheduler:main]"));
        assert!(formatted.ends_with("tick"));

        let with_event = LogContext::new("scheduler", "main").with_event("sunset");
        assert!(with_event.format("DEBUG", "window").contains("event=sunset"));
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let first = LogContext::new("a", "1");
        let second = LogContext::new("a", "2");
        assert!(second.sequence > first.sequence);
    }
}
