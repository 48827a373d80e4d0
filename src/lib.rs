//! Scriptable HTTP client engine for load generation.
//!
//! Each virtual user drives requests through an [`Http`] bound to its
//! [`VuContext`]. Every round trip emits one batch of timing samples to the
//! context's [`SampleSink`], and failures are classified into stable numeric
//! codes (see [`ErrorKind::code`]).

pub mod config;
pub mod context;
pub mod errors;
pub mod http_client;
pub mod metrics;

pub use config::{AuthMode, CookieParam, HttpDebug, Options, Params, ResponseType, SystemTags};
pub use context::VuContext;
pub use errors::{Error, ErrorKind, Result};
pub use http_client::batch::{BatchItem, BatchRequests, BatchResponses};
pub use http_client::client::Http;
pub use http_client::cookie_jar::{CookieJar, CookieOptions};
pub use http_client::engine::{LogEmitter, LogForwarder, Transport};
pub use http_client::hyper_engine::HyperTransport;
pub use http_client::request::{Method, RequestBody};
pub use http_client::response::{Response, ResponseBody, Timings};
pub use http_client::url_tag::{UrlArg, UrlTag};
pub use metrics::{Metric, Sample, SampleSink, TagSet};
