use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;

use crate::errors::Error;
use crate::http_client::debug::{LogEntry, LogLevel};
use crate::http_client::tracer::Tracer;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Streaming response body handed back by a [`Transport`].
pub type TransportBody = UnsyncBoxBody<Bytes, BoxError>;

pub type TransportFuture =
    Pin<Box<dyn Future<Output = Result<http::Response<TransportBody>, BoxError>> + Send>>;

pub type RoundTripFuture<'a> =
    Pin<Box<dyn Future<Output = Result<http::Response<Bytes>, Error>> + Send + 'a>>;

/// Sends one HTTP request over the network and stamps `tracer` as the
/// connection and request phases complete. Does not follow redirects.
pub trait Transport: Send + Sync {
    fn send(&self, request: http::Request<Bytes>, tracer: Arc<Tracer>) -> TransportFuture;
}

/// One complete, buffered round trip (samples emitted, body drained).
///
/// Auth negotiators wrap a round tripper and may drive it more than once.
pub trait RoundTripper: Send + Sync {
    fn round_trip(&self, request: http::Request<Bytes>) -> RoundTripFuture<'_>;
}

impl<R: RoundTripper + ?Sized> RoundTripper for &R {
    fn round_trip(&self, request: http::Request<Bytes>) -> RoundTripFuture<'_> {
        (**self).round_trip(request)
    }
}

pub trait LogEmitter: Send + Sync {
    fn emit(&self, entry: LogEntry);
}

/// Forwards HTTP debug entries to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogForwarder;

pub const HTTP_DEBUG_TARGET: &str = "volley::http_debug";

impl LogEmitter for LogForwarder {
    fn emit(&self, entry: LogEntry) {
        let level = match entry.level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        };
        log::log!(target: HTTP_DEBUG_TARGET, level, "[{}] {}", entry.request_id, entry.message);
    }
}
