use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Options;
use crate::errors::{Error, ErrorKind};
use crate::http_client::buffer_pool::BufferPool;
use crate::http_client::cookie_jar::CookieJar;
use crate::http_client::engine::{LogEmitter, LogForwarder, Transport};
use crate::metrics::SampleSink;

/// Group path separator; the root group is the empty string.
pub const GROUP_SEPARATOR: &str = "::";

/// Everything a virtual user's HTTP calls share: options, transport, the
/// ambient jar, grouping, the sample sink and the cancellation signal.
///
/// Cheap to clone; clones share the jar, sink, pool and token.
#[derive(Clone)]
pub struct VuContext {
    options: Arc<Options>,
    transport: Arc<dyn Transport>,
    jar: Option<CookieJar>,
    group: String,
    vu: Option<u64>,
    iteration: Option<u64>,
    sink: SampleSink,
    buffers: Arc<BufferPool>,
    emitter: Arc<dyn LogEmitter>,
    cancel: CancellationToken,
}

impl VuContext {
    pub fn new(options: Options, transport: Arc<dyn Transport>, sink: SampleSink) -> Self {
        Self {
            options: Arc::new(options),
            transport,
            jar: None,
            group: String::new(),
            vu: None,
            iteration: None,
            sink,
            buffers: BufferPool::new(),
            emitter: Arc::new(LogForwarder),
            cancel: CancellationToken::new(),
        }
    }

    /// Start an iteration with a fresh ambient jar.
    pub fn begin_iteration(&mut self, vu: u64, iteration: u64) {
        self.vu = Some(vu);
        self.iteration = Some(iteration);
        self.jar = Some(CookieJar::new());
    }

    pub fn end_iteration(&mut self) {
        self.jar = None;
        self.iteration = None;
    }

    pub fn in_iteration(&self) -> bool {
        self.jar.is_some()
    }

    /// A context for a nested group, `::outer::inner`.
    pub fn with_group(&self, name: &str) -> Self {
        let mut child = self.clone();
        child.group = format!("{}{GROUP_SEPARATOR}{name}", self.group);
        child
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn LogEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// The ambient jar; rejected outside of a running iteration.
    pub fn cookie_jar(&self) -> Result<CookieJar, Error> {
        self.jar.clone().ok_or_else(|| {
            Error::new(
                ErrorKind::NotInIteration,
                "the ambient cookie jar is only available while an iteration runs",
            )
        })
    }

    pub(crate) fn ambient_jar(&self) -> Option<&CookieJar> {
        self.jar.as_ref()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn vu(&self) -> Option<u64> {
        self.vu
    }

    pub fn iteration(&self) -> Option<u64> {
        self.iteration
    }

    pub fn sink(&self) -> &SampleSink {
        &self.sink
    }

    pub(crate) fn buffers(&self) -> &Arc<BufferPool> {
        &self.buffers
    }

    pub(crate) fn emitter(&self) -> &Arc<dyn LogEmitter> {
        &self.emitter
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::VuContext;
    use crate::config::Options;
    use crate::errors::ErrorKind;
    use crate::http_client::testing::FakeTransport;
    use crate::metrics::SampleSink;

    fn context() -> VuContext {
        let (sink, _rx) = SampleSink::channel();
        VuContext::new(Options::default(), FakeTransport::ok("hi"), sink)
    }

    #[test]
    fn ambient_jar_exists_only_inside_an_iteration() {
        let mut ctx = context();
        assert_eq!(ctx.cookie_jar().unwrap_err().kind, ErrorKind::NotInIteration);
        ctx.begin_iteration(1, 0);
        let jar = ctx.cookie_jar().unwrap();
        assert!(jar.same_jar(&ctx.cookie_jar().unwrap()));
        ctx.end_iteration();
        assert!(!ctx.in_iteration());
    }

    #[test]
    fn each_iteration_gets_a_fresh_jar() {
        let mut ctx = context();
        ctx.begin_iteration(1, 0);
        let first = ctx.cookie_jar().unwrap();
        ctx.begin_iteration(1, 1);
        assert!(!first.same_jar(&ctx.cookie_jar().unwrap()));
        assert_eq!(ctx.iteration(), Some(1));
    }

    #[test]
    fn groups_nest() {
        let ctx = context();
        let inner = ctx.with_group("login").with_group("form");
        assert_eq!(inner.group(), "::login::form");
        assert_eq!(ctx.group(), "");
    }
}
