use std::fmt::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tiny_http::{Header, Method, Response, Server, StatusCode};

use crate::core::lock_mutex;
use crate::supervisor::StreamSupervisor;
use crate::worker::WorkerStatus;

/// Serves `/health` and `/metrics` on its own thread until the process exits.
///
/// `/health` follows `scheduler_alive`, the scheduler's liveness flag.
pub fn start_monitoring_server(
    bind: &str,
    supervisor: Arc<Mutex<StreamSupervisor>>,
    scheduler_alive: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let server = Server::http(bind).map_err(|e| anyhow::anyhow!(e))?;
    log::info!("[monitoring] server on {}", bind);

    thread::Builder::new()
        .name("monitoring".to_string())
        .spawn(move || {
            for req in server.incoming_requests() {
                let response = match (req.method(), req.url()) {
                    (&Method::Get, "/health") => health_response(scheduler_alive.load(Ordering::SeqCst)),
                    (&Method::Get, "/metrics") => {
                        let statuses = lock_mutex(&supervisor, "monitoring.metrics").statuses();
                        text_response(build_metrics(&statuses), StatusCode(200), "text/plain; version=0.0.4")
                    }
                    _ => Response::from_string("").with_status_code(StatusCode(404)),
                };
                let _ = req.respond(response);
            }
        })?;

    Ok(())
}

fn health_response(running: bool) -> Response<std::io::Cursor<Vec<u8>>> {
    if running {
        text_response("ok".to_string(), StatusCode(200), "text/plain")
    } else {
        text_response("not_running".to_string(), StatusCode(503), "text/plain")
    }
}

fn text_response(
    body: String,
    status: StatusCode,
    content_type: &str,
) -> Response<std::io::Cursor<Vec<u8>>> {
    let response = Response::from_string(body).with_status_code(status);
    match Header::from_bytes("Content-Type", content_type) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

pub fn build_metrics(statuses: &[WorkerStatus]) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# HELP webcam_captures_total Frames captured per stream.");
    let _ = writeln!(output, "# TYPE webcam_captures_total counter");
    for status in statuses {
        let _ = writeln!(
            output,
            "webcam_captures_total{{stream=\"{}\"}} {}",
            escape_label_value(status.stream_id.as_str()),
            status.captures_ok
        );
    }

    let _ = writeln!(output, "# HELP webcam_capture_failures_total Failed capture attempts per stream.");
    let _ = writeln!(output, "# TYPE webcam_capture_failures_total counter");
    for status in statuses {
        let _ = writeln!(
            output,
            "webcam_capture_failures_total{{stream=\"{}\"}} {}",
            escape_label_value(status.stream_id.as_str()),
            status.captures_failed
        );
    }

    let _ = writeln!(output, "# HELP webcam_worker_running Whether the capture loop is alive (1) or not (0).");
    let _ = writeln!(output, "# TYPE webcam_worker_running gauge");
    for status in statuses {
        let _ = writeln!(
            output,
            "webcam_worker_running{{stream=\"{}\"}} {}",
            escape_label_value(status.stream_id.as_str()),
            u8::from(status.running)
        );
    }

    let _ = writeln!(output, "# HELP webcam_worker_paused Whether the worker is paused (1) or not (0).");
    let _ = writeln!(output, "# TYPE webcam_worker_paused gauge");
    for status in statuses {
        let _ = writeln!(
            output,
            "webcam_worker_paused{{stream=\"{}\"}} {}",
            escape_label_value(status.stream_id.as_str()),
            u8::from(status.paused)
        );
    }

    output
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamId;
    use std::time::Duration;

    fn status(id: &str, ok: u64, failed: u64) -> WorkerStatus {
        WorkerStatus {
            stream_id: StreamId::from(id),
            interval: Duration::from_secs(60),
            running: true,
            paused: false,
            captures_ok: ok,
            captures_failed: failed,
            last_capture_at: None,
            last_output: None,
            last_error: None,
        }
    }

    #[test]
    fn test_metrics_per_stream() {
        let metrics = build_metrics(&[status("https://youtu.be/a", 5, 1), status("https://youtu.be/b", 2, 0)]);

        assert!(metrics.contains("webcam_captures_total{stream=\"https://youtu.be/a\"} 5"));
        assert!(metrics.contains("webcam_capture_failures_total{stream=\"https://youtu.be/a\"} 1"));
        assert!(metrics.contains("webcam_worker_running{stream=\"https://youtu.be/b\"} 1"));
        assert!(metrics.contains("webcam_worker_paused{stream=\"https://youtu.be/b\"} 0"));
    }

    #[test]
    fn test_health_follows_scheduler_liveness() {
        assert_eq!(health_response(true).status_code(), StatusCode(200));
        assert_eq!(health_response(false).status_code(), StatusCode(503));
    }

    #[test]
    fn test_label_escaping() {
        assert_eq!(escape_label_value(r#"a"b\c"#), r#"a\"b\\c"#);
    }

    #[test]
    fn test_empty_metrics_still_has_headers() {
        let metrics = build_metrics(&[]);
        assert!(metrics.contains("# TYPE webcam_captures_total counter"));
    }
}
