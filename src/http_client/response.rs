use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use http::HeaderMap;
use serde::Serialize;
use serde_json::Value;

use crate::config::ResponseType;
use crate::errors::{Error, ErrorKind};
use crate::http_client::cookies::cookies_from_headers;
use crate::http_client::tls::TlsInfo;
use crate::http_client::tracer::Trail;

/// A cookie as reported on a response.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    /// Seconds; zero or negative deletes the cookie.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<i64>,
    pub secure: bool,
    pub http_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            expires: None,
            max_age: None,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }
}

/// Phase durations of the final round trip, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    pub duration: f64,
    pub blocked: f64,
    pub connecting: f64,
    pub tls_handshaking: f64,
    pub sending: f64,
    pub waiting: f64,
    pub receiving: f64,
}

impl From<&Trail> for Timings {
    fn from(trail: &Trail) -> Self {
        Self {
            duration: ms(trail.duration),
            blocked: ms(trail.blocked),
            connecting: ms(trail.connecting),
            tls_handshaking: ms(trail.tls_handshaking),
            sending: ms(trail.sending),
            waiting: ms(trail.waiting),
            receiving: ms(trail.receiving),
        }
    }
}

pub(crate) fn ms(d: std::time::Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Text(String),
    Binary(Vec<u8>),
    /// Discarded by `responseType: "none"`.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestCookie {
    pub name: String,
    pub value: String,
    pub replace: bool,
}

/// The outgoing request as it was sent, for introspection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestEcho {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: String,
    pub cookies: BTreeMap<String, Vec<RequestCookie>>,
}

/// Everything a script sees about one logical request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub remote_ip: String,
    pub remote_port: u16,
    /// Effective URL after redirects.
    pub url: String,
    /// Zero when no response was received.
    pub status: u16,
    pub proto: String,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, Vec<Cookie>>,
    pub body: ResponseBody,
    pub timings: Timings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsInfo>,
    /// Empty on success.
    pub error: String,
    /// Zero on success.
    pub error_code: u32,
    pub request: RequestEcho,
    #[serde(skip)]
    json_cache: OnceLock<Value>,
}

/// Facts about the round trip that produced (or failed to produce) the final response.
#[derive(Debug, Clone, Default)]
pub(crate) struct HopFacts {
    pub trail: Option<Trail>,
    pub remote_addr: Option<SocketAddr>,
    pub tls: Option<TlsInfo>,
    pub status: Option<u16>,
    pub proto: Option<String>,
    pub headers: Option<HeaderMap>,
}

impl Response {
    /// Build a response from the final round trip's status, headers and drained body.
    pub(crate) fn completed(
        url: String,
        parts: &http::response::Parts,
        body: bytes::Bytes,
        response_type: ResponseType,
        facts: HopFacts,
        request: RequestEcho,
    ) -> Self {
        let body = match response_type {
            ResponseType::Text => ResponseBody::Text(String::from_utf8_lossy(&body).into_owned()),
            ResponseType::Binary => ResponseBody::Binary(body.to_vec()),
            ResponseType::None => ResponseBody::None,
        };
        let mut cookies: BTreeMap<String, Vec<Cookie>> = BTreeMap::new();
        for cookie in cookies_from_headers(&parts.headers) {
            cookies.entry(cookie.name.clone()).or_default().push(cookie);
        }
        let mut response = Self::base(url, facts, request);
        response.status = parts.status.as_u16();
        response.proto = proto_name(parts.version).to_string();
        response.headers = flatten_headers(&parts.headers);
        response.cookies = cookies;
        response.body = body;
        response
    }

    /// Build a response for a failed request; whatever the last hop captured is kept.
    pub(crate) fn failed(url: String, err: &Error, facts: HopFacts, request: RequestEcho) -> Self {
        let mut response = Self::base(url, facts, request);
        response.set_error(err);
        response
    }

    fn base(url: String, facts: HopFacts, request: RequestEcho) -> Self {
        let (remote_ip, remote_port) = facts
            .remote_addr
            .map(|addr| (addr.ip().to_string(), addr.port()))
            .unwrap_or_default();
        Self {
            remote_ip,
            remote_port,
            url,
            status: facts.status.unwrap_or(0),
            proto: facts.proto.unwrap_or_default(),
            headers: facts.headers.as_ref().map(flatten_headers).unwrap_or_default(),
            cookies: BTreeMap::new(),
            body: ResponseBody::None,
            timings: facts.trail.as_ref().map(Timings::from).unwrap_or_default(),
            tls: facts.tls,
            error: String::new(),
            error_code: 0,
            request,
            json_cache: OnceLock::new(),
        }
    }

    pub(crate) fn set_error(&mut self, err: &Error) {
        self.error = err.message.clone();
        self.error_code = err.code();
    }

    pub fn is_error(&self) -> bool {
        self.error_code != 0
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> Option<&str> {
        match &self.body {
            ResponseBody::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.body {
            ResponseBody::Text(text) => Some(text.as_bytes()),
            ResponseBody::Binary(bytes) => Some(bytes),
            ResponseBody::None => None,
        }
    }

    /// Parse the body as JSON once and cache it.
    pub fn json(&self) -> Result<&Value, Error> {
        if let Some(value) = self.json_cache.get() {
            return Ok(value);
        }
        let bytes = self.bytes().ok_or_else(|| {
            Error::new(
                ErrorKind::BodyUnavailable,
                "the response body was discarded; set responseType to text or binary",
            )
        })?;
        let parsed: Value = serde_json::from_slice(bytes)?;
        Ok(self.json_cache.get_or_init(|| parsed))
    }

    /// Walk a dotted selector (`a.b.0.c`) into the parsed JSON body.
    pub fn json_path(&self, selector: &str) -> Result<Option<&Value>, Error> {
        let mut current = self.json()?;
        for segment in selector.split('.').filter(|s| !s.is_empty()) {
            let next = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}

pub(crate) fn proto_name(version: http::Version) -> &'static str {
    match version {
        http::Version::HTTP_09 => "HTTP/0.9",
        http::Version::HTTP_10 => "HTTP/1.0",
        http::Version::HTTP_11 => "HTTP/1.1",
        http::Version::HTTP_2 => "HTTP/2.0",
        http::Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP",
    }
}

/// `content-type` -> `Content-Type`.
pub(crate) fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Canonical names, repeated headers joined with `", "`.
pub(crate) fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        out.entry(canonical_header_name(name.as_str()))
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    out
}
