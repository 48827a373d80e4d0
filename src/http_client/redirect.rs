use std::collections::BTreeMap;

use bytes::Bytes;
use http::header::{
    AUTHORIZATION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HOST, LOCATION,
    PROXY_AUTHORIZATION,
};
use http::{Method, StatusCode};
use url::Url;

use crate::config::CookieParam;
use crate::errors::{Error, ErrorKind};
use crate::http_client::cookie_jar::{CookieJar, merge_cookies};
use crate::http_client::debug::RequestLogger;
use crate::http_client::engine::RoundTripper;
use crate::http_client::request::{PreparedRequest, check_scheme, echo};
use crate::http_client::response::RequestEcho;

/// How many redirects one logical request may follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RedirectPolicy {
    pub limit: u32,
    /// Set by a per-request `redirects` param rather than the global default.
    pub explicit: bool,
}

impl RedirectPolicy {
    pub fn new(override_limit: Option<u32>, global: u32) -> Self {
        match override_limit {
            Some(limit) => Self { limit, explicit: true },
            None => Self { limit: global, explicit: false },
        }
    }
}

/// The terminal response of a redirect chain.
pub(crate) struct RedirectOutcome {
    pub response: http::Response<Bytes>,
    pub url: Url,
    pub request: RequestEcho,
    /// Set when an explicit limit ran out; the response is still the last one.
    pub exhausted: Option<Error>,
}

/// A chain that ended without a usable response.
pub(crate) struct RedirectFailure {
    pub error: Error,
    pub url: Url,
    pub request: RequestEcho,
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// Issue `prepared` and follow redirects hop by hop.
///
/// Every hop ingests its `Set-Cookie` headers into `jar` before the next
/// hop's cookies are computed, so cookies set mid-chain travel with it.
pub(crate) async fn follow(
    rt: &dyn RoundTripper,
    prepared: &PreparedRequest,
    jar: Option<&CookieJar>,
    overrides: &BTreeMap<String, CookieParam>,
    policy: RedirectPolicy,
    logger: &RequestLogger,
) -> Result<RedirectOutcome, RedirectFailure> {
    let mut method = prepared.method.as_http();
    let mut url = prepared.url.clone();
    let mut headers = prepared.headers.clone();
    let mut body = prepared.body.clone();
    let mut followed: u32 = 0;

    loop {
        let jar_cookies = jar.map(|j| j.matching(&url)).unwrap_or_default();
        let cookies = merge_cookies(jar_cookies, overrides);
        let request = match prepared.to_http(&method, &url, &headers, body.clone(), &cookies) {
            Ok(request) => request,
            Err(error) => {
                return Err(RedirectFailure {
                    error,
                    url,
                    request: RequestEcho::default(),
                });
            }
        };
        let sent = echo(&request, &cookies);

        let response = match rt.round_trip(request).await {
            Ok(response) => response,
            Err(error) => {
                return Err(RedirectFailure {
                    error,
                    url,
                    request: sent,
                });
            }
        };
        if let Some(jar) = jar {
            jar.ingest(&url, response.headers());
        }

        let status = response.status();
        let location = response.headers().get(LOCATION).cloned();
        let (true, Some(location)) = (is_redirect(status), location) else {
            return Ok(RedirectOutcome {
                response,
                url,
                request: sent,
                exhausted: None,
            });
        };

        let next = location
            .to_str()
            .ok()
            .and_then(|loc| url.join(loc.trim()).ok())
            .ok_or_else(|| {
                crate::http_error!(
                    ErrorKind::InvalidRedirectLocation,
                    format!(
                        "failed to parse Location header {:?}",
                        String::from_utf8_lossy(location.as_bytes())
                    ),
                    "url" => url
                )
            })
            .and_then(|next| check_scheme(&next).map(|_| next));
        let next = match next {
            Ok(next) => next,
            Err(error) => {
                return Err(RedirectFailure {
                    error,
                    url,
                    request: sent,
                });
            }
        };

        if followed + 1 > policy.limit {
            let exhausted = match (policy.explicit, policy.limit) {
                (true, 0) => None,
                (true, limit) => Some(crate::http_error!(
                    ErrorKind::TooManyRedirects,
                    format!("stopped after {limit} redirects"),
                    "url" => url
                )),
                (false, _) => {
                    log::warn!(
                        "Stopped after {} redirects and returned the redirection; pass {{ redirects: n }} in request params or set global maxRedirects to silence this (url={}, hops={})",
                        followed,
                        prepared.url,
                        followed + 1
                    );
                    None
                }
            };
            return Ok(RedirectOutcome {
                response,
                url,
                request: sent,
                exhausted,
            });
        }

        let next_method = match status.as_u16() {
            301..=303 if method != Method::GET && method != Method::HEAD => Method::GET,
            _ => method.clone(),
        };
        if next_method != method {
            body = Bytes::new();
            for name in [CONTENT_TYPE, CONTENT_LENGTH, CONTENT_ENCODING] {
                headers.remove(name);
            }
        }
        if !same_origin(&url, &next) {
            for name in [AUTHORIZATION, PROXY_AUTHORIZATION, COOKIE, HOST] {
                headers.remove(name);
            }
        }
        logger.info(
            "redirect",
            Some("follow"),
            format!("{} {url} -> {next}", status.as_u16()),
        );
        log::debug!("following {} redirect {url} -> {next}", status.as_u16());

        method = next_method;
        url = next;
        followed += 1;
    }
}
