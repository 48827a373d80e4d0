use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

mod connector;

use crate::config::Options;
use crate::errors::Error;
use crate::http_client::engine::{BoxError, Transport, TransportFuture};
use crate::http_client::tracer::{Phase, Tracer};
use connector::{EngineConnector, build_connector};

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

tokio::task_local! {
    /// The tracer of the round trip currently driving the client. Connector
    /// layers and the certificate verifier run inside hyper and have no other
    /// way to reach it.
    pub(crate) static HOP_TRACER: Arc<Tracer>;
}

pub(crate) fn current_tracer() -> Option<Arc<Tracer>> {
    HOP_TRACER.try_with(Arc::clone).ok()
}

/// Production [`Transport`]: a pooled hyper client over rustls.
///
/// Connections are reused across requests and virtual users sharing the
/// transport; timings of a reused connection report no dial or handshake.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<EngineConnector, TracedBody>,
}

impl HyperTransport {
    pub fn new(options: &Options) -> Result<Self, Error> {
        let connector = build_connector(options.insecure_skip_tls_verify)?;
        let mut builder = Client::builder(TokioExecutor::new());
        builder.pool_idle_timeout(POOL_IDLE_TIMEOUT);
        builder.http2_adaptive_window(true);
        Ok(Self {
            client: builder.build(connector),
        })
    }
}

impl Transport for HyperTransport {
    fn send(&self, request: http::Request<Bytes>, tracer: Arc<Tracer>) -> TransportFuture {
        let client = self.client.clone();
        let request = request.map(|body| TracedBody::new(body, Arc::clone(&tracer)));

        Box::pin(HOP_TRACER.scope(tracer, async move {
            let response = client.request(request).await?;
            Ok::<_, BoxError>(response.map(|body| body.map_err(BoxError::from).boxed_unsync()))
        }))
    }
}

/// Request body that stamps when hyper starts and finishes writing it.
pub(crate) struct TracedBody {
    inner: Full<Bytes>,
    tracer: Arc<Tracer>,
}

impl TracedBody {
    fn new(body: Bytes, tracer: Arc<Tracer>) -> Self {
        Self {
            inner: Full::new(body),
            tracer,
        }
    }
}

impl Body for TracedBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.tracer.mark(Phase::GotConn);
        let polled = Pin::new(&mut self.inner).poll_frame(cx);
        if matches!(polled, Poll::Ready(None)) || self.inner.is_end_stream() {
            self.tracer.mark(Phase::WroteRequest);
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        let end = self.inner.is_end_stream();
        if end {
            // Empty bodies are never polled; hyper asks this while writing the head.
            self.tracer.mark(Phase::GotConn);
            self.tracer.mark(Phase::WroteRequest);
        }
        end
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
