use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use hyper::http::Uri;
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::connect::dns::{GaiResolver, Name};
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use hyper_util::rt::TokioIo;
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tower_service::Service;

use super::{HOP_TRACER, current_tracer};
use crate::errors::{Error, ErrorKind};
use crate::http_client::engine::BoxError;
use crate::http_client::tls::{TlsInfo, TlsVersion, cipher_suite_name, parse_ocsp_response};
use crate::http_client::tracer::{ConnFacts, Phase};

const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

type HttpsStream = hyper_rustls::MaybeHttpsStream<TokioIo<TcpStream>>;

/// The full connector stack: traced DNS, traced TCP, rustls, then connection facts.
pub(crate) type EngineConnector =
    TracingConnector<hyper_rustls::HttpsConnector<PhaseConnector<HttpConnector<TracingResolver>>>>;

/// Build the connector shared by every request of a transport.
pub(crate) fn build_connector(insecure_skip_verify: bool) -> Result<EngineConnector, Error> {
    let tls_config = build_tls_config(insecure_skip_verify)?;

    let mut http = HttpConnector::new_with_resolver(TracingResolver::new());
    http.enforce_http(false);
    http.set_connect_timeout(Some(DIAL_TIMEOUT));
    http.set_nodelay(true);

    let https = HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(PhaseConnector { inner: http });

    Ok(TracingConnector { inner: https })
}

/// System resolver that stamps the end of the lookup on the current hop.
#[derive(Clone)]
pub(crate) struct TracingResolver {
    inner: GaiResolver,
}

impl TracingResolver {
    fn new() -> Self {
        Self {
            inner: GaiResolver::new(),
        }
    }
}

impl Service<Name> for TracingResolver {
    type Response = std::vec::IntoIter<SocketAddr>;
    type Error = io::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, name: Name) -> Self::Future {
        let tracer = current_tracer();
        let lookup = name.to_string();
        let fut = self.inner.call(name);

        Box::pin(async move {
            let addrs: Vec<SocketAddr> = fut.await?.collect();
            if let Some(tracer) = tracer {
                tracer.mark(Phase::DnsDone);
            }
            log::trace!("resolved {lookup} to {addrs:?}");
            Ok(addrs.into_iter())
        })
    }
}

/// Stamps dial start and TCP connect completion around the plain connector.
#[derive(Clone)]
pub(crate) struct PhaseConnector<C> {
    inner: C,
}

impl<C> Service<Uri> for PhaseConnector<C>
where
    C: Service<Uri> + Clone + Send,
    C::Future: Send + 'static,
    C::Response: Send + 'static,
    C::Error: Send + 'static,
{
    type Response = C::Response;
    type Error = C::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let tracer = current_tracer();
        if let Some(tracer) = &tracer {
            tracer.mark(Phase::DialStart);
        }
        let fut = self.inner.call(dst);

        Box::pin(async move {
            let stream = fut.await?;
            if let Some(tracer) = tracer {
                tracer.mark(Phase::ConnectDone);
            }
            Ok(stream)
        })
    }
}

/// Outermost connector: stamps TLS completion and records the facts of
/// the new connection on the stream so every response it carries has them.
#[derive(Clone)]
pub(crate) struct TracingConnector<C> {
    inner: C,
}

impl<C> Service<Uri> for TracingConnector<C>
where
    C: Service<Uri, Response = HttpsStream, Error = BoxError> + Clone + Send,
    C::Future: Send + 'static,
{
    type Response = TracedStream;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let tracer = current_tracer();
        let fut = self.inner.call(dst);

        Box::pin(async move {
            // Scoped so the resolver and verifier see this hop even if hyper
            // finishes the connect in a background task.
            let connected = match tracer.clone() {
                Some(tracer) => HOP_TRACER.scope(tracer, fut).await,
                None => fut.await,
            };
            let stream = match connected {
                Ok(stream) => stream,
                Err(err) => {
                    log::debug!("connection failed: {err}");
                    return Err(err);
                }
            };
            let ocsp = tracer.as_ref().and_then(|t| t.ocsp().map(<[u8]>::to_vec));
            let facts = connection_facts(&stream, ocsp.as_deref());
            if let Some(tracer) = &tracer {
                if facts.tls.is_some() {
                    tracer.mark(Phase::TlsDone);
                }
                tracer.set_conn(facts.clone());
            }
            Ok(TracedStream { inner: stream, facts })
        })
    }
}

fn connection_facts(stream: &HttpsStream, ocsp: Option<&[u8]>) -> ConnFacts {
    match stream {
        hyper_rustls::MaybeHttpsStream::Https(tls_io) => {
            let (io_wrapper, conn) = tls_io.inner().get_ref();
            ConnFacts {
                remote_addr: io_wrapper.inner().inner().peer_addr().ok(),
                tls: tls_info(conn, ocsp),
            }
        }
        hyper_rustls::MaybeHttpsStream::Http(tcp_io) => ConnFacts {
            remote_addr: tcp_io.inner().peer_addr().ok(),
            tls: None,
        },
    }
}

fn tls_info(conn: &ClientConnection, ocsp: Option<&[u8]>) -> Option<TlsInfo> {
    let version = conn.protocol_version().and_then(TlsVersion::from_rustls)?;
    let cipher_suite = conn
        .negotiated_cipher_suite()
        .map(|suite| cipher_suite_name(suite.suite()))
        .unwrap_or_default();
    let ocsp = ocsp.and_then(|der| match parse_ocsp_response(der) {
        Ok(info) => Some(info),
        Err(err) => {
            log::debug!("ignoring unparsable OCSP staple: {err}");
            None
        }
    });
    Some(TlsInfo {
        version,
        cipher_suite,
        ocsp,
    })
}

/// A connected stream carrying the facts observed when it was established.
pub(crate) struct TracedStream {
    inner: HttpsStream,
    facts: ConnFacts,
}

impl Connection for TracedStream {
    fn connected(&self) -> Connected {
        self.inner.connected().extra(self.facts.clone())
    }
}

impl Read for TracedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl Write for TracedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }
}

fn root_store() -> RootCertStore {
    // Load the OS trust store first; fall back to webpki roots if it is empty.
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        log::debug!("skipping native certificate source: {err}");
    }
    let (added, _) = roots.add_parsable_certificates(native.certs);
    if added == 0 {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    roots
}

fn build_tls_config(insecure_skip_verify: bool) -> Result<ClientConfig, Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let inner = if insecure_skip_verify {
        None
    } else {
        let verifier = WebPkiServerVerifier::builder_with_provider(Arc::new(root_store()), Arc::clone(&provider))
            .build()
            .map_err(|e| Error::new(ErrorKind::Tls, format!("cannot build certificate verifier: {e}")))?;
        Some(verifier)
    };
    let verifier = StaplingVerifier {
        inner,
        provider: Arc::clone(&provider),
    };

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::new(ErrorKind::Tls, format!("unsupported TLS configuration: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Ok(config)
}

/// Certificate verifier that hands the stapled OCSP response to the
/// current hop. Without an inner verifier every certificate is accepted.
#[derive(Debug)]
struct StaplingVerifier {
    inner: Option<Arc<WebPkiServerVerifier>>,
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for StaplingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if let Some(tracer) = current_tracer() {
            tracer.set_ocsp(ocsp);
        }
        match &self.inner {
            Some(inner) => inner.verify_server_cert(end_entity, intermediates, server_name, ocsp, now),
            None => Ok(ServerCertVerified::assertion()),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        match &self.inner {
            Some(inner) => inner.verify_tls12_signature(message, cert, dss),
            None => Ok(HandshakeSignatureValid::assertion()),
        }
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        match &self.inner {
            Some(inner) => inner.verify_tls13_signature(message, cert, dss),
            None => Ok(HandshakeSignatureValid::assertion()),
        }
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
