//! HTTP Digest authentication (RFC 7616, MD5 family) over a [`RoundTripper`].

use std::collections::HashMap;

use bytes::Bytes;
use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use http::{HeaderValue, StatusCode};
use md5::{Digest, Md5};

use crate::errors::{Error, ErrorKind};
use crate::http_client::engine::{RoundTripFuture, RoundTripper};
use crate::http_client::request::Credentials;

/// Parsed `WWW-Authenticate: Digest ...` parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
    /// True when the server offered `qop=auth`.
    pub qop_auth: bool,
}

impl DigestChallenge {
    /// Parse one header value; `None` unless it is a Digest challenge with a nonce.
    pub fn parse(header: &str) -> Option<Self> {
        let rest = header.trim();
        let (scheme, params) = rest.split_once(char::is_whitespace)?;
        if !scheme.eq_ignore_ascii_case("digest") {
            return None;
        }
        let params = auth_params(params);
        let nonce = params.get("nonce")?.clone();
        let qop_auth = params
            .get("qop")
            .is_some_and(|qop| qop.split(',').any(|q| q.trim().eq_ignore_ascii_case("auth")));
        Some(Self {
            realm: params.get("realm").cloned().unwrap_or_default(),
            nonce,
            opaque: params.get("opaque").cloned(),
            algorithm: params.get("algorithm").cloned(),
            qop_auth,
        })
    }

    fn is_session(&self) -> bool {
        self.algorithm
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case("MD5-sess"))
    }

    /// Build the Authorization value for `method` on `uri` (path and query).
    pub fn authorization(&self, creds: &Credentials, method: &str, uri: &str, cnonce: &str) -> String {
        const NC: &str = "00000001";
        let mut ha1 = md5_hex(&format!("{}:{}:{}", creds.user, self.realm, creds.password));
        if self.is_session() {
            ha1 = md5_hex(&format!("{ha1}:{}:{cnonce}", self.nonce));
        }
        let ha2 = md5_hex(&format!("{method}:{uri}"));
        let response = if self.qop_auth {
            md5_hex(&format!("{ha1}:{}:{NC}:{cnonce}:auth:{ha2}", self.nonce))
        } else {
            md5_hex(&format!("{ha1}:{}:{ha2}", self.nonce))
        };

        let mut value = format!(
            r#"Digest username="{}", realm="{}", nonce="{}", uri="{uri}", response="{response}""#,
            creds.user, self.realm, self.nonce
        );
        if let Some(algorithm) = &self.algorithm {
            value.push_str(&format!(", algorithm={algorithm}"));
        }
        if self.qop_auth {
            value.push_str(&format!(r#", qop=auth, nc={NC}, cnonce="{cnonce}""#));
        }
        if let Some(opaque) = &self.opaque {
            value.push_str(&format!(r#", opaque="{opaque}""#));
        }
        value
    }
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// `key=value` and `key="quoted, value"` pairs, keys lowercased.
fn auth_params(raw: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let mut rest = raw.trim();
    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim().trim_start_matches(',').trim().to_ascii_lowercase();
        let after = after.trim_start();
        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            }
        } else {
            match after.find(',') {
                Some(end) => (after[..end].trim(), &after[end..]),
                None => (after.trim(), ""),
            }
        };
        out.insert(key, value.to_string());
        rest = remaining.trim_start().trim_start_matches(',').trim_start();
    }
    out
}

/// Sends the request unauthenticated, then answers a Digest 401 once.
pub(crate) struct DigestNegotiator<R> {
    inner: R,
    credentials: Credentials,
}

impl<R: RoundTripper> DigestNegotiator<R> {
    pub fn new(inner: R, credentials: Credentials) -> Self {
        Self { inner, credentials }
    }

    async fn negotiate(&self, request: http::Request<Bytes>) -> Result<http::Response<Bytes>, Error> {
        let (parts, body) = request.into_parts();
        let first = http::Request::from_parts(parts.clone(), body.clone());
        let response = self.inner.round_trip(first).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(DigestChallenge::parse)
            .ok_or_else(|| {
                crate::http_error!(
                    ErrorKind::DigestChallenge,
                    "401 response carries no usable Digest challenge",
                    "url" => parts.uri
                )
            })?;

        let uri = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let cnonce = hex::encode(rand::random::<[u8; 8]>());
        let value = challenge.authorization(&self.credentials, parts.method.as_str(), uri, &cnonce);
        let value = HeaderValue::from_str(&value)
            .map_err(|e| Error::new(ErrorKind::DigestChallenge, format!("bad digest header: {e}")))?;

        let mut retry = http::Request::from_parts(parts, body);
        retry.headers_mut().insert(AUTHORIZATION, value);
        self.inner.round_trip(retry).await
    }
}

impl<R: RoundTripper> RoundTripper for DigestNegotiator<R> {
    fn round_trip(&self, request: http::Request<Bytes>) -> RoundTripFuture<'_> {
        Box::pin(self.negotiate(request))
    }
}
