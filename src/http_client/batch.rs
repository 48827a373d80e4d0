//! Concurrent execution of many requests under the batch ceilings.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinSet;
use url::Url;

use crate::config::Params;
use crate::context::VuContext;
use crate::errors::{Error, ErrorKind};
use crate::http_client::executor::execute;
use crate::http_client::limiter::BatchLimiter;
use crate::http_client::request::{Method, RequestBody};
use crate::http_client::response::Response;
use crate::http_client::url_tag::{UrlArg, UrlTag};

/// One entry of a batch.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub method: Method,
    pub target: UrlArg,
    pub body: Option<RequestBody>,
    pub params: Params,
}

impl BatchItem {
    pub fn new(method: Method, target: impl Into<UrlArg>) -> Self {
        Self {
            method,
            target: target.into(),
            body: None,
            params: Params::default(),
        }
    }

    pub fn get(target: impl Into<UrlArg>) -> Self {
        Self::new(Method::Get, target)
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Accepts `"url"`, `[method, url, body?, params?]` or
    /// `{method?, url, body?, params?}`. `key` names the item in errors.
    pub fn from_value(key: &str, value: &Value) -> Result<Self, Error> {
        match value {
            Value::String(_) => Ok(Self::get(url_arg(key, value)?)),
            Value::Array(parts) => {
                if parts.len() < 2 {
                    return Err(invalid(key, format!("invalid batch request {value}")));
                }
                let method = method(key, &parts[0])?;
                let mut item = Self::new(method, url_arg(key, &parts[1])?);
                if let Some(body) = parts.get(2) {
                    item.body = RequestBody::from_value(body)?;
                }
                if let Some(params) = parts.get(3) {
                    item.params = Params::from_value(params)?;
                }
                Ok(item)
            }
            Value::Object(fields) => {
                let target = fields
                    .get("url")
                    .ok_or_else(|| invalid(key, format!("batch request {key} doesn't have a url key")))?;
                let method = match fields.get("method") {
                    Some(m) => method(key, m)?,
                    None => Method::Get,
                };
                let mut item = Self::new(method, url_arg(key, target)?);
                if let Some(body) = fields.get("body") {
                    item.body = RequestBody::from_value(body)?;
                }
                if let Some(params) = fields.get("params") {
                    item.params = Params::from_value(params)?;
                }
                Ok(item)
            }
            other => Err(invalid(key, format!("invalid batch request {other}"))),
        }
    }

    /// `host:port` used for the per-host ceiling.
    fn host_key(&self) -> String {
        Url::parse(self.target.url())
            .ok()
            .and_then(|url| {
                let host = url.host_str()?.to_string();
                Some(match url.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host,
                })
            })
            .unwrap_or_default()
    }
}

impl From<&str> for BatchItem {
    fn from(url: &str) -> Self {
        Self::get(url)
    }
}

fn invalid(key: &str, message: String) -> Error {
    crate::http_error!(ErrorKind::InvalidArgument, message, "item" => key)
}

fn method(key: &str, value: &Value) -> Result<Method, Error> {
    value
        .as_str()
        .ok_or_else(|| invalid(key, format!("invalid method type {value}")))?
        .parse()
}

/// A URL string, or a `{name, url}` object as produced by the `url` template tag.
fn url_arg(key: &str, value: &Value) -> Result<UrlArg, Error> {
    match value {
        Value::String(url) => Ok(UrlArg::Literal(url.clone())),
        Value::Object(fields) => match (fields.get("name"), fields.get("url")) {
            (Some(Value::String(name)), Some(Value::String(url))) => {
                Ok(UrlArg::Templated(UrlTag::new(name.clone(), url.clone())))
            }
            _ => Err(invalid(key, format!("invalid URL value {value}"))),
        },
        other => Err(invalid(key, format!("invalid URL value {other}"))),
    }
}

/// Batch input: positional or keyed.
#[derive(Debug, Clone)]
pub enum BatchRequests {
    List(Vec<BatchItem>),
    /// Keyed items, in input order.
    Map(Vec<(String, BatchItem)>),
}

impl BatchRequests {
    /// Validate every item before anything is sent.
    pub fn from_value(value: Option<&Value>) -> Result<Self, Error> {
        match value {
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| BatchItem::from_value(&i.to_string(), item))
                .collect::<Result<Vec<_>, _>>()
                .map(BatchRequests::List),
            Some(Value::Object(items)) => items
                .iter()
                .map(|(key, item)| Ok((key.clone(), BatchItem::from_value(key, item)?)))
                .collect::<Result<Vec<_>, Error>>()
                .map(BatchRequests::Map),
            Some(other) => Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("batch expects an array or an object, got {other}"),
            )),
            None => Err(Error::new(ErrorKind::InvalidArgument, "no batch requests given")),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BatchRequests::List(items) => items.len(),
            BatchRequests::Map(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Batch output, shaped like the input.
#[derive(Debug, Clone)]
pub enum BatchResponses {
    List(Vec<Response>),
    Map(Vec<(String, Response)>),
}

impl BatchResponses {
    pub fn len(&self) -> usize {
        match self {
            BatchResponses::List(items) => items.len(),
            BatchResponses::Map(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Positional lookup for lists, key lookup for maps.
    pub fn get(&self, key: &str) -> Option<&Response> {
        match self {
            BatchResponses::List(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            BatchResponses::Map(items) => items.iter().find(|(k, _)| k == key).map(|(_, r)| r),
        }
    }

    pub fn responses(&self) -> Vec<&Response> {
        match self {
            BatchResponses::List(items) => items.iter().collect(),
            BatchResponses::Map(items) => items.iter().map(|(_, r)| r).collect(),
        }
    }
}

/// Run every item concurrently under the `batch` / `batchPerHost` ceilings
/// and wait for all of them.
///
/// A failing item never cancels its siblings. If any item returns an error
/// (its effective `throw` was set) that error is returned once every task
/// has finished.
pub async fn run_batch(ctx: &VuContext, requests: BatchRequests) -> Result<BatchResponses, Error> {
    let (keys, items): (Option<Vec<String>>, Vec<BatchItem>) = match requests {
        BatchRequests::List(items) => (None, items),
        BatchRequests::Map(pairs) => {
            let (keys, items) = pairs.into_iter().unzip();
            (Some(keys), items)
        }
    };

    let options = ctx.options();
    let limiter = Arc::new(BatchLimiter::new(options.batch, options.batch_per_host));
    let mut tasks = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let ctx = ctx.clone();
        let limiter = Arc::clone(&limiter);
        tasks.spawn(async move {
            let _slot = limiter.acquire(&item.host_key()).await;
            let result = execute(&ctx, item.method, &item.target, item.body, &item.params).await;
            (index, result)
        });
    }

    let mut slots: Vec<Option<Response>> = vec![None; keys.as_ref().map_or(tasks.len(), Vec::len)];
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(response))) => slots[index] = Some(response),
            Ok((_, Err(err))) => {
                first_error.get_or_insert(err);
            }
            Err(join) => {
                first_error.get_or_insert(Error::new(
                    ErrorKind::Generic,
                    format!("batch request task failed: {join}"),
                ));
            }
        }
    }
    if let Some(err) = first_error {
        return Err(err);
    }

    let responses = slots
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| Error::new(ErrorKind::Generic, "batch finished with a missing response"))?;
    Ok(match keys {
        None => BatchResponses::List(responses),
        Some(keys) => BatchResponses::Map(keys.into_iter().zip(responses).collect()),
    })
}
