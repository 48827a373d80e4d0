use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use http::header::CONTENT_ENCODING;
use http_body_util::BodyExt;
use tokio::time::Instant;

use crate::config::SystemTags;
use crate::context::VuContext;
use crate::errors::classify::from_transport;
use crate::errors::{Error, ErrorKind};
use crate::http_client::compression::decompress_body;
use crate::http_client::debug::RequestLogger;
use crate::http_client::engine::{RoundTripFuture, RoundTripper, TransportBody};
use crate::http_client::response::{HopFacts, proto_name};
use crate::http_client::tracer::{ConnFacts, Phase, Tracer};
use crate::metrics::TagSet;

/// Drives single round trips through the context's transport for one
/// logical request: enforces the deadline and cancellation, drains and
/// decodes the body, and pushes one sample set per round trip.
pub(crate) struct TracingRoundTripper<'a> {
    ctx: &'a VuContext,
    logger: &'a RequestLogger,
    base_tags: TagSet,
    /// Templated or caller-supplied name; otherwise each hop's URL.
    name: Option<String>,
    timeout: Duration,
    deadline: Instant,
    last: Mutex<HopFacts>,
}

struct HopOutcome {
    response: Option<http::response::Parts>,
    body: Bytes,
    error: Option<Error>,
    conn: Option<ConnFacts>,
}

/// Timeouts too large for the clock are capped rather than overflowing it.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

impl<'a> TracingRoundTripper<'a> {
    pub fn new(
        ctx: &'a VuContext,
        logger: &'a RequestLogger,
        base_tags: TagSet,
        name: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            ctx,
            logger,
            base_tags,
            name,
            timeout,
            deadline: deadline_after(timeout),
            last: Mutex::new(HopFacts::default()),
        }
    }

    /// Facts of the most recent round trip.
    pub fn take_last(&self) -> HopFacts {
        std::mem::take(&mut *self.last.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn cancelled(&self) -> Error {
        Error::new(ErrorKind::Cancelled, "request cancelled")
    }

    fn timed_out(&self) -> Error {
        Error::new(
            ErrorKind::RequestTimeout,
            format!("request timeout after {}", humantime::format_duration(self.timeout)),
        )
    }

    async fn drain(&self, mut body: TransportBody) -> Result<Bytes, Error> {
        let mut buf = self.ctx.buffers().get();
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(from_transport)?;
            if let Ok(data) = frame.into_data() {
                buf.extend_from_slice(&data);
            }
        }
        Ok(buf.to_bytes())
    }

    async fn exchange(&self, request: http::Request<Bytes>, tracer: &Arc<Tracer>) -> HopOutcome {
        let cancel = self.ctx.cancellation();
        let send = self.ctx.transport().send(request, Arc::clone(tracer));

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(self.cancelled()),
            sent = tokio::time::timeout_at(self.deadline, send) => match sent {
                Err(_) => Err(self.timed_out()),
                Ok(Err(e)) => Err(from_transport(e)),
                Ok(Ok(response)) => Ok(response),
            },
        };
        let response = match response {
            Ok(response) => response,
            Err(error) => {
                return HopOutcome {
                    response: None,
                    body: Bytes::new(),
                    error: Some(error),
                    conn: tracer.conn().cloned(),
                };
            }
        };
        tracer.mark(Phase::FirstByte);

        let (parts, body) = response.into_parts();
        let conn = parts
            .extensions
            .get::<ConnFacts>()
            .cloned()
            .or_else(|| tracer.conn().cloned());
        let drained = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(self.cancelled()),
            drained = tokio::time::timeout_at(self.deadline, self.drain(body)) => {
                drained.unwrap_or_else(|_| Err(self.timed_out()))
            }
        };
        let decoded = drained.and_then(|raw| {
            if raw.is_empty() {
                return Ok(raw);
            }
            let encoding = parts
                .headers
                .get(CONTENT_ENCODING)
                .and_then(|v| v.to_str().ok());
            decompress_body(raw, encoding)
        });
        match decoded {
            Ok(body) => HopOutcome {
                response: Some(parts),
                body,
                error: None,
                conn,
            },
            Err(error) => HopOutcome {
                response: Some(parts),
                body: Bytes::new(),
                error: Some(error),
                conn,
            },
        }
    }

    fn hop_tags(
        &self,
        method: &http::Method,
        url: &str,
        outcome: &HopOutcome,
    ) -> TagSet {
        let enabled: &SystemTags = &self.ctx.options().system_tags;
        let mut tags = self.base_tags.clone();
        tags.insert_system(enabled, "method", method.as_str());
        tags.insert_system(enabled, "url", url);
        tags.insert_system(enabled, "name", self.name.as_deref().unwrap_or(url));
        match &outcome.response {
            Some(parts) => {
                tags.insert_system(enabled, "status", parts.status.as_u16().to_string());
                tags.insert_system(enabled, "proto", proto_name(parts.version));
            }
            None => tags.insert_system(enabled, "status", "0"),
        }
        if let Some(error) = &outcome.error {
            tags.insert_system(enabled, "error", error.message.clone());
            tags.insert_system(enabled, "error_code", error.code().to_string());
        }
        if let Some(tls) = outcome.conn.as_ref().and_then(|c| c.tls.as_ref()) {
            tags.insert_system(enabled, "tls_version", tls.version.as_str());
            if let Some(ocsp) = &tls.ocsp {
                tags.insert_system(enabled, "ocsp_status", ocsp.status.as_str());
            }
        }
        tags
    }

    async fn trip(&self, request: http::Request<Bytes>) -> Result<http::Response<Bytes>, Error> {
        let method = request.method().clone();
        let url = request.uri().to_string();
        self.logger.log_request(&request);

        let tracer = Tracer::new();
        tracer.mark(Phase::GetConn);
        let outcome = self.exchange(request, &tracer).await;
        let trail = tracer.finish();

        let tags = Arc::new(self.hop_tags(&method, &url, &outcome));
        self.ctx.sink().push(trail.samples(tags));

        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = HopFacts {
            trail: Some(trail),
            remote_addr: outcome.conn.as_ref().and_then(|c| c.remote_addr),
            tls: outcome.conn.as_ref().and_then(|c| c.tls.clone()),
            status: outcome.response.as_ref().map(|p| p.status.as_u16()),
            proto: outcome
                .response
                .as_ref()
                .map(|p| proto_name(p.version).to_string()),
            headers: outcome.response.as_ref().map(|p| p.headers.clone()),
        };

        if let Some(parts) = &outcome.response {
            self.logger.log_response(parts, &outcome.body);
        }
        match (outcome.error, outcome.response) {
            (Some(error), _) => Err(error.context("url", url)),
            (None, Some(parts)) => Ok(http::Response::from_parts(parts, outcome.body)),
            (None, None) => Err(Error::new(ErrorKind::Generic, "transport returned no response")),
        }
    }
}

impl RoundTripper for TracingRoundTripper<'_> {
    fn round_trip(&self, request: http::Request<Bytes>) -> RoundTripFuture<'_> {
        Box::pin(self.trip(request))
    }
}
