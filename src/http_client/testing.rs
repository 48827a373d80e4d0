//! In-process transport and helpers shared by unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;
use http_body_util::{BodyExt, Full};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::Options;
use crate::context::VuContext;
use crate::http_client::debug::LogEntry;
use crate::http_client::engine::{BoxError, LogEmitter, Transport, TransportFuture};
use crate::http_client::tracer::{Phase, Tracer};
use crate::metrics::{Sample, SampleSink};

type Handler = dyn Fn(&http::Request<Bytes>) -> Result<http::Response<Bytes>, BoxError> + Send + Sync;

#[derive(Debug, Clone)]
pub(crate) struct SeenRequest {
    pub method: http::Method,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Answers every request from a closure and remembers what it was sent.
pub(crate) struct FakeTransport {
    handler: Box<Handler>,
    seen: Mutex<Vec<SeenRequest>>,
    delay: Option<Duration>,
}

impl FakeTransport {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&http::Request<Bytes>) -> Result<http::Response<Bytes>, BoxError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            seen: Mutex::new(Vec::new()),
            delay: None,
        })
    }

    pub fn delayed<F>(delay: Duration, handler: F) -> Arc<Self>
    where
        F: Fn(&http::Request<Bytes>) -> Result<http::Response<Bytes>, BoxError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            seen: Mutex::new(Vec::new()),
            delay: Some(delay),
        })
    }

    pub fn ok(body: &'static str) -> Arc<Self> {
        Self::new(move |_| Ok(http::Response::new(Bytes::from_static(body.as_bytes()))))
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl Transport for FakeTransport {
    fn send(&self, request: http::Request<Bytes>, tracer: Arc<Tracer>) -> TransportFuture {
        tracer.mark(Phase::DialStart);
        tracer.mark(Phase::ConnectDone);
        self.seen.lock().unwrap().push(SeenRequest {
            method: request.method().clone(),
            uri: request.uri().to_string(),
            headers: request.headers().clone(),
            body: request.body().clone(),
        });
        tracer.mark(Phase::WroteRequest);
        let result = (self.handler)(&request);
        let delay = self.delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let response = result?;
            Ok::<_, BoxError>(response.map(|body| {
                Full::new(body)
                    .map_err(|never| -> BoxError { match never {} })
                    .boxed_unsync()
            }))
        })
    }
}

pub(crate) fn respond(status: u16) -> http::response::Builder {
    http::Response::builder().status(status)
}

/// A context inside iteration 0 of VU 1, plus the sample receiver.
pub(crate) fn context(transport: Arc<dyn Transport>) -> (VuContext, UnboundedReceiver<Vec<Sample>>) {
    context_with(transport, Options::default())
}

pub(crate) fn context_with(
    transport: Arc<dyn Transport>,
    options: Options,
) -> (VuContext, UnboundedReceiver<Vec<Sample>>) {
    let (sink, rx) = SampleSink::channel();
    let mut ctx = VuContext::new(options, transport, sink);
    ctx.begin_iteration(1, 0);
    (ctx, rx)
}

/// Every sample container pushed so far, one entry per round trip.
pub(crate) fn drain(rx: &mut UnboundedReceiver<Vec<Sample>>) -> Vec<Vec<Sample>> {
    let mut out = Vec::new();
    while let Ok(batch) = rx.try_recv() {
        out.push(batch);
    }
    out
}

#[derive(Default)]
pub(crate) struct RecordingEmitter {
    entries: Mutex<Vec<LogEntry>>,
}

impl RecordingEmitter {
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl LogEmitter for RecordingEmitter {
    fn emit(&self, entry: LogEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}
