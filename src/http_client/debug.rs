use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::HttpDebug;
use crate::http_client::engine::LogEmitter;
use crate::http_client::response::proto_name;

const DEFAULT_MAX_LOG_BYTES: usize = 128 * 1024;

/// One HTTP debug record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Unique ID of the logical request (shared by its redirect hops)
    pub request_id: String,
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    /// High-level category for the event (http/redirect/auth)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Optional phase within the category (request/response/...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Milliseconds since the logical request started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_logged: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Debug,
    Error,
    Warning,
}

/// Emits `httpDebug` dumps for every hop of one logical request.
#[derive(Clone)]
pub(crate) struct RequestLogger {
    emitter: Arc<dyn LogEmitter>,
    request_id: Arc<String>,
    start: Instant,
    mode: HttpDebug,
}

impl RequestLogger {
    pub fn new(emitter: Arc<dyn LogEmitter>, mode: HttpDebug) -> Self {
        Self {
            emitter,
            request_id: Arc::new(uuid::Uuid::new_v4().to_string()),
            start: Instant::now(),
            mode,
        }
    }

    pub fn enabled(&self) -> bool {
        self.mode != HttpDebug::Off
    }

    pub fn request_id(&self) -> &str {
        self.request_id.as_ref()
    }

    #[allow(clippy::too_many_arguments)]
    fn event(
        &self,
        level: LogLevel,
        category: &str,
        phase: Option<&str>,
        message: impl Into<String>,
        details: Option<Value>,
        bytes_logged: Option<u64>,
        truncated: Option<bool>,
    ) {
        self.emitter.emit(LogEntry {
            request_id: self.request_id().to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level,
            message: message.into(),
            category: Some(category.to_string()),
            phase: phase.map(str::to_string),
            elapsed_ms: Some(self.start.elapsed().as_millis() as u64),
            details,
            bytes_logged,
            truncated,
        });
    }

    pub fn info(&self, category: &str, phase: Option<&str>, message: impl Into<String>) {
        if self.enabled() {
            self.event(LogLevel::Info, category, phase, message, None, None, None);
        }
    }

    pub fn log_request(&self, request: &http::Request<Bytes>) {
        if !self.enabled() {
            return;
        }
        let target = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        self.event(
            LogLevel::Info,
            "http",
            Some("request"),
            format!("> {} {} {}", request.method(), target, proto_name(request.version())),
            Some(json!({ "url": request.uri().to_string() })),
            None,
            None,
        );
        self.log_headers(request.headers(), "request", ">");
        if self.mode == HttpDebug::Full {
            self.log_body("http", "request", request.body(), ">");
        }
    }

    pub fn log_response(&self, parts: &http::response::Parts, body: &[u8]) {
        if !self.enabled() {
            return;
        }
        self.event(
            LogLevel::Info,
            "http",
            Some("response"),
            format!("< {} {}", proto_name(parts.version), parts.status),
            Some(json!({ "status": parts.status.as_u16() })),
            None,
            None,
        );
        self.log_headers(&parts.headers, "response", "<");
        if self.mode == HttpDebug::Full {
            self.log_body("http", "response", body, "<");
        }
    }

    fn log_headers(&self, headers: &HeaderMap, phase: &str, prefix: &str) {
        for (name, value) in headers.iter() {
            let line = header_to_string(name, value);
            self.event(
                LogLevel::Info,
                "http",
                Some(phase),
                format!("{prefix} {line}"),
                Some(json!({ "name": name.as_str(), "length": value.as_bytes().len() })),
                None,
                None,
            );
        }
    }

    fn log_body(&self, category: &str, phase: &str, body: &[u8], prefix: &str) {
        if body.is_empty() {
            return;
        }
        let truncated = body.len() > DEFAULT_MAX_LOG_BYTES;
        let logged_len = body.len().min(DEFAULT_MAX_LOG_BYTES);
        let preview = match std::str::from_utf8(&body[..logged_len]) {
            Ok(text) if !truncated => text.to_string(),
            Ok(text) => format!("{text}..."),
            Err(_) => format!(
                "<binary:{} bytes{}>",
                body.len(),
                if truncated { ", truncated" } else { "" }
            ),
        };
        self.event(
            LogLevel::Info,
            category,
            Some(phase),
            format!("{prefix} {preview}"),
            Some(json!({ "size": body.len(), "loggedBytes": logged_len })),
            Some(logged_len as u64),
            Some(truncated),
        );
    }
}

fn header_to_string(name: &HeaderName, value: &HeaderValue) -> String {
    match value.to_str() {
        Ok(v) => format!("{name}: {v}"),
        Err(_) => format!("{name}: <{} bytes>", value.as_bytes().len()),
    }
}

#[cfg(test)]
mod tests {
    use super::RequestLogger;
    use crate::config::HttpDebug;
    use crate::http_client::testing::RecordingEmitter;
    use bytes::Bytes;
    use std::sync::Arc;

    fn request() -> http::Request<Bytes> {
        http::Request::post("http://h/p?q=1")
            .header("content-type", "text/plain")
            .body(Bytes::from_static(b"payload"))
            .unwrap()
    }

    #[test]
    fn off_emits_nothing() {
        let emitter = Arc::new(RecordingEmitter::default());
        let logger = RequestLogger::new(emitter.clone(), HttpDebug::Off);
        logger.log_request(&request());
        logger.info("redirect", None, "hop");
        assert!(emitter.entries().is_empty());
    }

    #[test]
    fn headers_mode_skips_bodies() {
        let emitter = Arc::new(RecordingEmitter::default());
        let logger = RequestLogger::new(emitter.clone(), HttpDebug::Headers);
        logger.log_request(&request());
        let messages: Vec<String> = emitter.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages[0], "> POST /p?q=1 HTTP/1.1");
        assert!(messages.contains(&"> content-type: text/plain".to_string()));
        assert!(!messages.iter().any(|m| m.contains("payload")));
    }

    #[test]
    fn full_mode_includes_bodies_under_one_request_id() {
        let emitter = Arc::new(RecordingEmitter::default());
        let logger = RequestLogger::new(emitter.clone(), HttpDebug::Full);
        logger.log_request(&request());
        let (parts, _) = http::Response::builder()
            .status(201)
            .body(())
            .unwrap()
            .into_parts();
        logger.log_response(&parts, &[0xff, 0xfe]);
        let entries = emitter.entries();
        assert!(entries.iter().any(|e| e.message == "> payload"));
        assert!(entries.iter().any(|e| e.message == "< HTTP/1.1 201 Created"));
        assert!(entries.iter().any(|e| e.message == "< <binary:2 bytes>"));
        assert!(entries.iter().all(|e| e.request_id == logger.request_id()));
    }
}
