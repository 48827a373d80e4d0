use std::fmt;

use serde_json::Value;

use crate::config::Params;
use crate::context::VuContext;
use crate::errors::Error;
use crate::http_client::batch::{BatchRequests, BatchResponses, run_batch};
use crate::http_client::cookie_jar::CookieJar;
use crate::http_client::executor::execute;
use crate::http_client::request::{Method, RequestBody};
use crate::http_client::response::Response;
use crate::http_client::url_tag::{UrlArg, UrlTag};

/// The script-facing HTTP module bound to one virtual user's context.
#[derive(Clone)]
pub struct Http {
    ctx: VuContext,
}

impl Http {
    pub fn new(ctx: VuContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &VuContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut VuContext {
        &mut self.ctx
    }

    pub async fn request(
        &self,
        method: Method,
        url: impl Into<UrlArg>,
        body: Option<RequestBody>,
        params: Params,
    ) -> Result<Response, Error> {
        execute(&self.ctx, method, &url.into(), body, &params).await
    }

    pub async fn get(&self, url: impl Into<UrlArg>, params: Params) -> Result<Response, Error> {
        self.request(Method::Get, url, None, params).await
    }

    pub async fn head(&self, url: impl Into<UrlArg>, params: Params) -> Result<Response, Error> {
        self.request(Method::Head, url, None, params).await
    }

    pub async fn post(
        &self,
        url: impl Into<UrlArg>,
        body: Option<RequestBody>,
        params: Params,
    ) -> Result<Response, Error> {
        self.request(Method::Post, url, body, params).await
    }

    pub async fn put(
        &self,
        url: impl Into<UrlArg>,
        body: Option<RequestBody>,
        params: Params,
    ) -> Result<Response, Error> {
        self.request(Method::Put, url, body, params).await
    }

    pub async fn patch(
        &self,
        url: impl Into<UrlArg>,
        body: Option<RequestBody>,
        params: Params,
    ) -> Result<Response, Error> {
        self.request(Method::Patch, url, body, params).await
    }

    pub async fn del(
        &self,
        url: impl Into<UrlArg>,
        body: Option<RequestBody>,
        params: Params,
    ) -> Result<Response, Error> {
        self.request(Method::Delete, url, body, params).await
    }

    pub async fn options(
        &self,
        url: impl Into<UrlArg>,
        body: Option<RequestBody>,
        params: Params,
    ) -> Result<Response, Error> {
        self.request(Method::Options, url, body, params).await
    }

    pub async fn batch(&self, requests: BatchRequests) -> Result<BatchResponses, Error> {
        run_batch(&self.ctx, requests).await
    }

    /// Batch from marshalled script values; shape errors surface before any request is sent.
    pub async fn batch_value(&self, requests: Option<&Value>) -> Result<BatchResponses, Error> {
        let requests = BatchRequests::from_value(requests)?;
        self.batch(requests).await
    }

    /// The iteration's ambient jar.
    pub fn cookie_jar(&self) -> Result<CookieJar, Error> {
        self.ctx.cookie_jar()
    }

    /// A standalone jar, usable through `Params::jar`.
    pub fn new_cookie_jar(&self) -> CookieJar {
        CookieJar::new()
    }

    /// Template-literal tag: literal `parts` interleaved with dynamic `pieces`.
    pub fn url<P: fmt::Display>(&self, parts: &[&str], pieces: &[P]) -> UrlTag {
        UrlTag::from_template(parts, pieces)
    }
}
