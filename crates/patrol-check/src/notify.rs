//! Notification dispatch.
//!
//! Dispatch is fire-and-forget: the engine hands over a target list and a
//! context and never observes the result. Delivery failures are logged.
//!
//! Target syntax:
//! - `log` writes a structured log line.
//! - `http://host[:port]/path` POSTs the context as JSON.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::Full;
use serde::Serialize;
use tracing::{debug, info, warn};

use patrol_core::{CheckDefinition, CheckKind, Verdict};
use patrol_state::CheckResult;

/// What a notification is about.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckContext {
    pub service: String,
    pub check: String,
    pub kind: CheckKind,
    pub verdict: Verdict,
    /// Verdict before this run, if known.
    pub previous: Option<Verdict>,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub error: Option<String>,
    pub output: String,
    pub at: DateTime<Utc>,
}

impl CheckContext {
    /// Context for a stored result.
    pub fn from_result(
        definition: &CheckDefinition,
        result: &CheckResult,
        previous: Option<Verdict>,
    ) -> Self {
        Self {
            service: result.service.clone(),
            check: result.check.clone(),
            kind: result.kind,
            verdict: result.verdict,
            previous,
            value: result.value,
            unit: definition.unit.clone(),
            error: result.error.clone(),
            output: result.output.clone(),
            at: result.created_at,
        }
    }

    /// Context for a run that produced no stored result.
    pub fn failed_run(
        definition: &CheckDefinition,
        error: String,
        previous: Option<Verdict>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            service: definition.service.clone(),
            check: definition.name.clone(),
            kind: definition.kind,
            verdict: Verdict::Unhealthy,
            previous,
            value: None,
            unit: definition.unit.clone(),
            error: Some(error),
            output: String::new(),
            at,
        }
    }
}

/// Receives notification requests.
pub trait Notifier: Send + Sync {
    fn send_notifications(&self, targets: &[String], context: &CheckContext);
}

/// Writes each notification as a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_notifications(&self, targets: &[String], context: &CheckContext) {
        for target in targets {
            match context.verdict {
                Verdict::Healthy => info!(
                    %target,
                    service = %context.service,
                    check = %context.check,
                    previous = ?context.previous,
                    value = ?context.value,
                    "check is healthy"
                ),
                Verdict::Unhealthy => warn!(
                    %target,
                    service = %context.service,
                    check = %context.check,
                    previous = ?context.previous,
                    error = context.error.as_deref().unwrap_or(""),
                    "check is unhealthy"
                ),
            }
        }
    }
}

/// POSTs the context as JSON to plain-HTTP endpoints.
///
/// Each delivery runs on its own task; must be used from within a tokio
/// runtime.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Notifier for WebhookNotifier {
    fn send_notifications(&self, targets: &[String], context: &CheckContext) {
        let body = match serde_json::to_vec(context) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                warn!(error = %e, "failed to encode notification");
                return;
            }
        };
        for target in targets {
            let target = target.clone();
            let body = body.clone();
            let timeout = self.timeout;
            tokio::spawn(async move {
                match tokio::time::timeout(timeout, post_json(&target, body)).await {
                    Ok(Ok(status)) if status.is_success() => {
                        debug!(%target, %status, "webhook delivered");
                    }
                    Ok(Ok(status)) => warn!(%target, %status, "webhook rejected"),
                    Ok(Err(e)) => warn!(%target, error = %e, "webhook delivery failed"),
                    Err(_) => warn!(%target, "webhook delivery timed out"),
                }
            });
        }
    }
}

/// Send one HTTP/1.1 POST and return the response status.
async fn post_json(target: &str, body: Bytes) -> Result<http::StatusCode, String> {
    let uri: http::Uri = target.parse().map_err(|e| format!("invalid url: {e}"))?;
    if uri.scheme_str() != Some("http") {
        return Err("only http:// targets are supported".to_string());
    }
    let host = uri.host().ok_or("url has no host")?;
    let port = uri.port_u16().unwrap_or(80);
    let address = format!("{host}:{port}");
    let path = uri.path_and_query().map_or("/", |p| p.as_str());

    let stream = tokio::net::TcpStream::connect(&address)
        .await
        .map_err(|e| format!("connect: {e}"))?;
    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| format!("handshake: {e}"))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method("POST")
        .uri(path)
        .header("host", &address)
        .header("content-type", "application/json")
        .header("user-agent", "patrol/0.1")
        .body(Full::new(body))
        .map_err(|e| format!("request: {e}"))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| format!("send: {e}"))?;
    Ok(resp.status())
}

/// Routes each target to the dispatcher that understands it.
#[derive(Clone)]
pub struct FanoutNotifier {
    log: Arc<dyn Notifier>,
    webhook: Arc<dyn Notifier>,
}

impl FanoutNotifier {
    pub fn new(log: Arc<dyn Notifier>, webhook: Arc<dyn Notifier>) -> Self {
        Self { log, webhook }
    }
}

impl Default for FanoutNotifier {
    fn default() -> Self {
        Self::new(Arc::new(LogNotifier), Arc::new(WebhookNotifier::default()))
    }
}

impl Notifier for FanoutNotifier {
    fn send_notifications(&self, targets: &[String], context: &CheckContext) {
        let mut log_targets = Vec::new();
        let mut http_targets = Vec::new();
        for target in targets {
            if target == "log" {
                log_targets.push(target.clone());
            } else if target.starts_with("http://") {
                http_targets.push(target.clone());
            } else {
                warn!(
                    %target,
                    service = %context.service,
                    check = %context.check,
                    "unknown notification target"
                );
            }
        }
        if !log_targets.is_empty() {
            self.log.send_notifications(&log_targets, context);
        }
        if !http_targets.is_empty() {
            self.webhook.send_notifications(&http_targets, context);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::TimeZone;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Vec<String>>>,
    }

    impl Notifier for Recorder {
        fn send_notifications(&self, targets: &[String], _context: &CheckContext) {
            self.sent.lock().unwrap().push(targets.to_vec());
        }
    }

    fn context() -> CheckContext {
        CheckContext {
            service: "api".to_string(),
            check: "ping".to_string(),
            kind: CheckKind::Status,
            verdict: Verdict::Unhealthy,
            previous: Some(Verdict::Healthy),
            value: None,
            unit: None,
            error: Some("exit status 1".to_string()),
            output: String::new(),
            at: Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn fanout_routes_by_target_kind() {
        let log = Arc::new(Recorder::default());
        let webhook = Arc::new(Recorder::default());
        let fanout = FanoutNotifier::new(log.clone(), webhook.clone());

        let targets = vec![
            "log".to_string(),
            "http://hooks.local/a".to_string(),
            "smtp://ops".to_string(),
            "http://hooks.local/b".to_string(),
        ];
        fanout.send_notifications(&targets, &context());

        assert_eq!(*log.sent.lock().unwrap(), vec![vec!["log".to_string()]]);
        assert_eq!(
            *webhook.sent.lock().unwrap(),
            vec![vec![
                "http://hooks.local/a".to_string(),
                "http://hooks.local/b".to_string()
            ]]
        );
    }

    #[test]
    fn fanout_skips_empty_groups() {
        let log = Arc::new(Recorder::default());
        let webhook = Arc::new(Recorder::default());
        let fanout = FanoutNotifier::new(log.clone(), webhook.clone());

        fanout.send_notifications(&[], &context());
        assert!(log.sent.lock().unwrap().is_empty());
        assert!(webhook.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn context_serializes_verdicts_snake_case() {
        let json = serde_json::to_value(context()).unwrap();
        assert_eq!(json["verdict"], "unhealthy");
        assert_eq!(json["previous"], "healthy");
        assert_eq!(json["kind"], "status");
    }

    #[tokio::test]
    async fn post_json_sends_body_and_reads_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut received = Vec::new();
            // Read until the JSON body has arrived.
            while !String::from_utf8_lossy(&received).contains("\"check\":\"ping\"") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 204 No Content\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
            String::from_utf8_lossy(&received).to_string()
        });

        let body = Bytes::from(serde_json::to_vec(&context()).unwrap());
        let status = post_json(&format!("http://{addr}/hooks/patrol"), body)
            .await
            .unwrap();
        assert_eq!(status, http::StatusCode::NO_CONTENT);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /hooks/patrol HTTP/1.1"));
        assert!(request.contains("content-type: application/json"));
    }

    #[tokio::test]
    async fn post_json_rejects_non_http() {
        let err = post_json("https://example.com/x", Bytes::new()).await.unwrap_err();
        assert!(err.contains("only http://"));
    }

    #[tokio::test]
    async fn post_json_to_closed_port_fails() {
        let err = post_json("http://127.0.0.1:1/x", Bytes::new()).await.unwrap_err();
        assert!(err.starts_with("connect"));
    }
}
