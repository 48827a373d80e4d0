use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE, COOKIE, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue};
use percent_encoding::percent_decode_str;
use serde_json::Value;
use url::Url;

use crate::config::{AuthMode, Options, Params};
use crate::errors::{Error, ErrorKind};
use crate::http_client::compression::compress_body;
use crate::http_client::cookie_jar::OutgoingCookie;
use crate::http_client::cookies::format_cookie_header;
use crate::http_client::response::{RequestCookie, RequestEcho, canonical_header_name};
use crate::http_client::url_tag::UrlArg;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }

    pub fn as_http(self) -> http::Method {
        match self {
            Method::Get => http::Method::GET,
            Method::Head => http::Method::HEAD,
            Method::Post => http::Method::POST,
            Method::Put => http::Method::PUT,
            Method::Patch => http::Method::PATCH,
            Method::Delete => http::Method::DELETE,
            Method::Options => http::Method::OPTIONS,
        }
    }

    /// GET and HEAD never carry a payload.
    pub fn sends_body(self) -> bool {
        !matches!(self, Method::Get | Method::Head)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" | "DEL" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            other => Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("unsupported HTTP method {other:?}"),
            )),
        }
    }
}

/// Request payload as handed in by a script.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Text(String),
    Bytes(Bytes),
    /// Sent form-encoded, in order.
    Form(Vec<(String, String)>),
}

impl RequestBody {
    /// Strings pass through, objects are form fields, arrays of octets are bytes.
    pub fn from_value(value: &Value) -> Result<Option<Self>, Error> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(RequestBody::Text(s.clone()))),
            Value::Object(map) => map
                .iter()
                .map(|(key, value)| {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        Value::Number(_) | Value::Bool(_) => value.to_string(),
                        Value::Null => String::new(),
                        other => {
                            return Err(Error::new(
                                ErrorKind::InvalidArgument,
                                format!("form field '{key}' must be a scalar, got {other}"),
                            ));
                        }
                    };
                    Ok((key.clone(), value))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(|fields| Some(RequestBody::Form(fields))),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|n| u8::try_from(n).ok())
                        .ok_or_else(|| {
                            Error::new(
                                ErrorKind::InvalidArgument,
                                "binary bodies must be arrays of bytes",
                            )
                        })
                })
                .collect::<Result<Vec<u8>, _>>()
                .map(|bytes| Some(RequestBody::Bytes(Bytes::from(bytes)))),
            other => Ok(Some(RequestBody::Text(other.to_string()))),
        }
    }
}

impl From<&str> for RequestBody {
    fn from(value: &str) -> Self {
        RequestBody::Text(value.to_string())
    }
}

impl From<String> for RequestBody {
    fn from(value: String) -> Self {
        RequestBody::Text(value)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(value: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(value))
    }
}

impl From<Bytes> for RequestBody {
    fn from(value: Bytes) -> Self {
        RequestBody::Bytes(value)
    }
}

impl From<BTreeMap<String, String>> for RequestBody {
    fn from(value: BTreeMap<String, String>) -> Self {
        RequestBody::Form(value.into_iter().collect())
    }
}

impl From<Vec<(String, String)>> for RequestBody {
    fn from(value: Vec<(String, String)>) -> Self {
        RequestBody::Form(value)
    }
}

/// Username and password lifted out of the URL userinfo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Credentials {
    pub user: String,
    pub password: String,
}

/// A request with every decision made except cookies, which are resolved per hop.
#[derive(Debug, Clone)]
pub(crate) struct PreparedRequest {
    pub method: Method,
    /// Wire URL, userinfo removed.
    pub url: Url,
    /// Templated name; untemplated requests are named after each hop's URL.
    pub name: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub credentials: Option<Credentials>,
}

impl PreparedRequest {
    /// Validate and assemble a request.
    ///
    /// Defaults come first (User-Agent, form Content-Type), then caller
    /// headers replace any of them by exact name.
    pub fn build(
        method: Method,
        target: &UrlArg,
        body: Option<RequestBody>,
        params: &Params,
        options: &Options,
    ) -> Result<Self, Error> {
        let mut url = parse_target(target.url())?;
        let credentials = take_credentials(&mut url);

        let mut headers = HeaderMap::new();
        if !options.user_agent.is_empty() {
            headers.insert(USER_AGENT, header_value(&options.user_agent)?);
        }

        let body = match body {
            _ if !method.sends_body() => Bytes::new(),
            None => Bytes::new(),
            Some(RequestBody::Text(text)) => Bytes::from(text),
            Some(RequestBody::Bytes(bytes)) => bytes,
            Some(RequestBody::Form(fields)) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
                let encoded = serde_urlencoded::to_string(&fields).map_err(|e| {
                    Error::new(ErrorKind::InvalidArgument, format!("cannot encode form body: {e}"))
                })?;
                Bytes::from(encoded)
            }
        };

        for (name, value) in &params.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                crate::http_error!(
                    ErrorKind::InvalidArgument,
                    format!("invalid header name: {e}"),
                    "header" => name
                )
            })?;
            headers.insert(name, header_value(value)?);
        }

        if let Some(creds) = &credentials {
            let auth = params.auth.unwrap_or_default();
            if matches!(auth, AuthMode::Basic | AuthMode::Ntlm) && !headers.contains_key(AUTHORIZATION) {
                let token = STANDARD.encode(format!("{}:{}", creds.user, creds.password));
                headers.insert(AUTHORIZATION, header_value(&format!("Basic {token}"))?);
            }
        }

        let body = match params.compression.as_deref() {
            Some(algorithms) if !body.is_empty() && !algorithms.trim().is_empty() => {
                let (compressed, encoding) = compress_body(&body, algorithms)?;
                headers.insert(CONTENT_ENCODING, header_value(&encoding)?);
                compressed
            }
            _ => body,
        };

        let name = target.name().map(str::to_string);

        Ok(Self {
            method,
            url,
            name,
            headers,
            body,
            credentials,
        })
    }

    /// The wire request for one hop.
    pub fn to_http(
        &self,
        method: &http::Method,
        url: &Url,
        headers: &HeaderMap,
        body: Bytes,
        cookies: &[OutgoingCookie],
    ) -> Result<http::Request<Bytes>, Error> {
        let uri = url.as_str().parse::<http::Uri>().map_err(|e| {
            Error::new(ErrorKind::InvalidUrl, format!("invalid URL {url}: {e}"))
        })?;
        let mut request = http::Request::builder()
            .method(method.clone())
            .uri(uri)
            .body(body)?;
        *request.headers_mut() = headers.clone();
        if !cookies.is_empty() {
            let line = format_cookie_header(cookies.iter().map(|c| (c.name.as_str(), c.value.as_str())));
            request.headers_mut().insert(COOKIE, header_value(&line)?);
        }
        Ok(request)
    }
}

/// Introspection copy of what went on the wire.
pub(crate) fn echo(request: &http::Request<Bytes>, cookies: &[OutgoingCookie]) -> RequestEcho {
    let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in request.headers() {
        if name == COOKIE {
            continue;
        }
        headers
            .entry(canonical_header_name(name.as_str()))
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    let mut jar: BTreeMap<String, Vec<RequestCookie>> = BTreeMap::new();
    for cookie in cookies {
        jar.entry(cookie.name.clone()).or_default().push(RequestCookie {
            name: cookie.name.clone(),
            value: cookie.value.clone(),
            replace: cookie.replace,
        });
    }
    RequestEcho {
        method: request.method().to_string(),
        url: request.uri().to_string(),
        headers,
        body: String::from_utf8_lossy(request.body()).into_owned(),
        cookies: jar,
    }
}

/// Parse a request URL: 1020 when malformed, 1021 for non-http(s) schemes.
pub(crate) fn parse_target(raw: &str) -> Result<Url, Error> {
    let url = Url::parse(raw.trim()).map_err(|e| {
        crate::http_error!(ErrorKind::InvalidUrl, format!("invalid URL {raw:?}: {e}"), "url" => raw)
    })?;
    check_scheme(&url)?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::new(
            ErrorKind::InvalidUrl,
            format!("invalid URL {raw:?}: missing host"),
        ));
    }
    Ok(url)
}

pub(crate) fn check_scheme(url: &Url) -> Result<(), Error> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(crate::http_error!(
            ErrorKind::UnsupportedScheme,
            format!("unsupported protocol scheme {other:?}"),
            "url" => url
        )),
    }
}

fn take_credentials(url: &mut Url) -> Option<Credentials> {
    if url.username().is_empty() && url.password().is_none() {
        return None;
    }
    let decode = |raw: &str| percent_decode_str(raw).decode_utf8_lossy().into_owned();
    let creds = Credentials {
        user: decode(url.username()),
        password: decode(url.password().unwrap_or_default()),
    };
    // Both setters only fail for cannot-be-a-base URLs, which http(s) never are.
    let _ = url.set_username("");
    let _ = url.set_password(None);
    Some(creds)
}

fn header_value(value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value).map_err(|e| {
        Error::new(ErrorKind::InvalidArgument, format!("invalid header value {value:?}: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::{Method, PreparedRequest, RequestBody, echo, parse_target};
    use crate::config::{AuthMode, Options, Params};
    use crate::errors::ErrorKind;
    use crate::http_client::cookie_jar::OutgoingCookie;
    use crate::http_client::url_tag::{UrlArg, UrlTag};
    use serde_json::json;

    fn build(method: Method, url: &str, body: Option<RequestBody>, params: Params) -> PreparedRequest {
        PreparedRequest::build(method, &UrlArg::from(url), body, &params, &Options::default()).unwrap()
    }

    #[test]
    fn methods_parse_case_insensitively() {
        assert_eq!("patch".parse::<Method>().unwrap(), Method::Patch);
        assert_eq!("del".parse::<Method>().unwrap(), Method::Delete);
        assert_eq!(Method::Options.as_http(), http::Method::OPTIONS);
        assert_eq!("TRACE".parse::<Method>().unwrap_err().kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn malformed_and_foreign_urls_have_distinct_codes() {
        assert_eq!(parse_target("http://[::1").unwrap_err().code(), 1020);
        assert_eq!(parse_target("not a url").unwrap_err().code(), 1020);
        assert_eq!(parse_target("ftp://example.com/f").unwrap_err().code(), 1021);
    }

    #[test]
    fn get_and_head_drop_the_body() {
        let req = build(Method::Get, "http://h/", Some("ignored".into()), Params::default());
        assert!(req.body.is_empty());
        let req = build(Method::Head, "http://h/", Some("ignored".into()), Params::default());
        assert!(req.body.is_empty());
    }

    #[test]
    fn form_bodies_are_encoded_with_content_type() {
        let body = RequestBody::from_value(&json!({"a": "1 2", "b": 3})).unwrap();
        let req = build(Method::Post, "http://h/", body, Params::default());
        assert_eq!(req.body.as_ref(), b"a=1+2&b=3");
        assert_eq!(req.headers["content-type"], "application/x-www-form-urlencoded");
    }

    #[test]
    fn caller_headers_override_defaults() {
        let params = Params::default()
            .header("User-Agent", "custom/1")
            .header("Host", "virtual.example");
        let req = build(Method::Post, "http://h/", Some("x".into()), params);
        assert_eq!(req.headers["user-agent"], "custom/1");
        assert_eq!(req.headers["host"], "virtual.example");
    }

    #[test]
    fn default_user_agent_is_sent() {
        let req = build(Method::Get, "http://h/", None, Params::default());
        assert!(req.headers["user-agent"].to_str().unwrap().starts_with("volley/"));
    }

    #[test]
    fn userinfo_becomes_basic_auth_and_leaves_the_url() {
        let req = build(Method::Get, "http://bob:p%40ss@h/x", None, Params::default());
        assert_eq!(req.url.as_str(), "http://h/x");
        assert_eq!(req.headers["authorization"], "Basic Ym9iOnBAc3M=");
        let creds = req.credentials.unwrap();
        assert_eq!((creds.user.as_str(), creds.password.as_str()), ("bob", "p@ss"));
    }

    #[test]
    fn digest_mode_keeps_credentials_off_the_first_request() {
        let params = Params::default().auth(AuthMode::Digest);
        let req = build(Method::Get, "http://bob:pw@h/x", None, params);
        assert!(!req.headers.contains_key("authorization"));
        assert!(req.credentials.is_some());
    }

    #[test]
    fn compression_sets_content_encoding() {
        let params = Params::default().compression("gzip");
        let req = build(Method::Post, "http://h/", Some("hello hello hello".into()), params);
        assert_eq!(req.headers["content-encoding"], "gzip");
        assert_eq!(&req.body[..2], &[0x1f, 0x8b]);

        let bad = PreparedRequest::build(
            Method::Post,
            &UrlArg::from("http://h/"),
            Some("x".into()),
            &Params::default().compression("lz4"),
            &Options::default(),
        );
        assert_eq!(bad.unwrap_err().code(), 1702);
    }

    #[test]
    fn templated_urls_keep_their_name() {
        let target = UrlArg::from(UrlTag::new("http://h/users/${}", "http://h/users/7"));
        let req = PreparedRequest::build(Method::Get, &target, None, &Params::default(), &Options::default())
            .unwrap();
        assert_eq!(req.url.as_str(), "http://h/users/7");
        assert_eq!(req.name.as_deref(), Some("http://h/users/${}"));
    }

    #[test]
    fn wire_request_carries_cookies_and_echo_lists_them() {
        let req = build(Method::Post, "http://h/p", Some("data".into()), Params::default());
        let cookies = vec![
            OutgoingCookie { name: "a".into(), value: "1".into(), replace: false },
            OutgoingCookie { name: "b".into(), value: "2".into(), replace: true },
        ];
        let wire = req
            .to_http(&req.method.as_http(), &req.url, &req.headers, req.body.clone(), &cookies)
            .unwrap();
        assert_eq!(wire.headers()["cookie"], "a=1; b=2");
        let echoed = echo(&wire, &cookies);
        assert_eq!(echoed.method, "POST");
        assert_eq!(echoed.body, "data");
        assert!(echoed.cookies["b"][0].replace);
        assert!(!echoed.headers.contains_key("Cookie"));
        assert!(echoed.headers.contains_key("User-Agent"));
    }

    #[test]
    fn binary_bodies_from_values() {
        let body = RequestBody::from_value(&json!([0, 255, 7])).unwrap();
        assert_eq!(body, Some(RequestBody::Bytes(bytes::Bytes::from_static(&[0, 255, 7]))));
        assert!(RequestBody::from_value(&json!([256])).is_err());
        assert_eq!(RequestBody::from_value(&json!(null)).unwrap(), None);
    }
}
