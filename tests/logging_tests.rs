use webcam_grabber::{ComponentLogger, LogContext};

#[test]
fn test_log_context_sequence_increases() {
    let first = LogContext::new("worker", "https://youtu.be/a");
    let second = LogContext::new("worker", "https://youtu.be/a");

    assert!(second.sequence > first.sequence);
    assert!(first.event.is_none());
}

#[test]
fn test_log_formatting_with_event() {
    let ctx = LogContext::new("scheduler", "main").with_event("sunrise");
    let formatted = ctx.format("INFO", "entered window");

    assert!(formatted.starts_with("[INFO][seq="));
    assert!(formatted.contains("[scheduler:main event=sunrise]"));
    assert!(formatted.ends_with("entered window"));
}

#[test]
fn test_component_logger_trait() {
    struct FakeWorker {
        stream: String,
    }

    impl ComponentLogger for FakeWorker {
        fn log_context(&self) -> LogContext {
            LogContext::new("worker", &self.stream)
        }
    }

    let worker = FakeWorker {
        stream: "https://youtu.be/cam".to_string(),
    };
    let ctx = worker.log_context();

    assert_eq!(ctx.component, "worker");
    assert_eq!(ctx.instance_id, "https://youtu.be/cam");
    worker.info("logging without a logger installed is a no-op");
}
