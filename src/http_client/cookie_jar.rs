use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use http::HeaderMap;
use serde::Deserialize;
use url::Url;

use crate::config::CookieParam;
use crate::errors::{Error, ErrorKind};
use crate::http_client::cookies::{cookies_from_headers, parse_cookie_expires};
use crate::http_client::response::Cookie;

/// Optional attributes for [`CookieJar::set`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CookieOptions {
    pub domain: Option<String>,
    pub path: Option<String>,
    /// RFC 1123 date, e.g. `Mon, 02 Jan 2006 15:04:05 GMT`.
    pub expires: Option<String>,
    #[serde(alias = "maxAge")]
    pub max_age: Option<i64>,
    pub secure: bool,
    #[serde(alias = "httpOnly")]
    pub http_only: bool,
}

#[derive(Debug, Clone)]
struct StoredCookie {
    name: String,
    value: String,
    domain: String,
    host_only: bool,
    path: String,
    secure: bool,
    expires: Option<DateTime<Utc>>,
    created: u64,
}

impl StoredCookie {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }

    fn visible_at(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            domain_match(&host, &self.domain)
        };
        domain_ok && path_match(url.path(), &self.path) && (!self.secure || url.scheme() == "https")
    }

    fn same_slot(&self, other: &StoredCookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }
}

#[derive(Default)]
struct JarState {
    cookies: Vec<StoredCookie>,
    next_created: u64,
}

/// Shared cookie store. Clones share the same underlying jar; all access is
/// serialized internally so concurrent batch items can use one jar.
#[derive(Clone, Default)]
pub struct CookieJar {
    inner: Arc<RwLock<JarState>>,
}

impl fmt::Debug for CookieJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieJar")
            .field("cookies", &self.read().cookies.len())
            .finish()
    }
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when both handles point at the same store.
    pub fn same_jar(&self, other: &CookieJar) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Unexpired cookies visible to `url`, name → values in send order.
    pub fn cookies_for_url(&self, url: &str) -> Result<BTreeMap<String, Vec<String>>, Error> {
        let url = parse_url(url)?;
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in self.matching(&url) {
            out.entry(name).or_default().push(value);
        }
        Ok(out)
    }

    /// Store a cookie as if `url` had answered with the equivalent `Set-Cookie`.
    pub fn set(
        &self,
        url: &str,
        name: &str,
        value: &str,
        options: CookieOptions,
    ) -> Result<(), Error> {
        let url = parse_url(url)?;
        let mut cookie = Cookie::new(name, value);
        cookie.domain = options.domain;
        cookie.path = options.path;
        cookie.max_age = options.max_age;
        cookie.secure = options.secure;
        cookie.http_only = options.http_only;
        if let Some(raw) = options.expires {
            cookie.expires = Some(parse_cookie_expires(&raw).ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidArgument,
                    format!("unable to parse expires '{raw}'"),
                )
            })?);
        }
        self.store(&url, [cookie]);
        Ok(())
    }

    /// Expire every cookie visible to `url`.
    pub fn clear(&self, url: &str) -> Result<(), Error> {
        let url = parse_url(url)?;
        self.write().cookies.retain(|c| !c.visible_at(&url));
        Ok(())
    }

    /// Expire the cookies named `name` that are visible to `url`.
    pub fn delete(&self, url: &str, name: &str) -> Result<(), Error> {
        let url = parse_url(url)?;
        self.write()
            .cookies
            .retain(|c| !(c.name == name && c.visible_at(&url)));
        Ok(())
    }

    /// `(name, value)` pairs for a request to `url`: longest path first, then oldest.
    pub(crate) fn matching(&self, url: &Url) -> Vec<(String, String)> {
        let now = Utc::now();
        let state = self.read();
        let mut hits: Vec<&StoredCookie> = state
            .cookies
            .iter()
            .filter(|c| !c.expired(now) && c.visible_at(url))
            .collect();
        hits.sort_by(|a, b| {
            b.path
                .len()
                .cmp(&a.path.len())
                .then(a.created.cmp(&b.created))
        });
        hits.into_iter()
            .map(|c| (c.name.clone(), c.value.clone()))
            .collect()
    }

    /// Ingest every `Set-Cookie` header of a response received from `url`.
    pub(crate) fn ingest(&self, url: &Url, headers: &HeaderMap) {
        let cookies = cookies_from_headers(headers);
        if !cookies.is_empty() {
            self.store(url, cookies);
        }
    }

    pub(crate) fn store(&self, url: &Url, cookies: impl IntoIterator<Item = Cookie>) {
        let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
            return;
        };
        let now = Utc::now();
        let mut state = self.write();
        for cookie in cookies {
            let Some(mut stored) = to_stored(&host, url, cookie, now) else {
                continue;
            };
            let existing = state.cookies.iter().position(|c| c.same_slot(&stored));
            if stored.expired(now) {
                if let Some(idx) = existing {
                    state.cookies.remove(idx);
                }
                continue;
            }
            match existing {
                Some(idx) => {
                    stored.created = state.cookies[idx].created;
                    state.cookies[idx] = stored;
                }
                None => {
                    stored.created = state.next_created;
                    state.next_created += 1;
                    state.cookies.push(stored);
                }
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, JarState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, JarState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A cookie on an outgoing request, with the override flag it was sent under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OutgoingCookie {
    pub name: String,
    pub value: String,
    pub replace: bool,
}

/// Combine jar cookies with per-request overrides.
///
/// `replace: true` swaps out every jar cookie of that name for this request
/// only; otherwise the override is sent alongside the jar's cookies.
pub(crate) fn merge_cookies(
    jar_cookies: Vec<(String, String)>,
    overrides: &BTreeMap<String, CookieParam>,
) -> Vec<OutgoingCookie> {
    let mut groups: Vec<(String, Vec<OutgoingCookie>)> = Vec::new();
    for (name, value) in jar_cookies {
        let cookie = OutgoingCookie {
            name: name.clone(),
            value,
            replace: false,
        };
        match groups.iter_mut().find(|(n, _)| *n == name) {
            Some((_, list)) => list.push(cookie),
            None => groups.push((name, vec![cookie])),
        }
    }
    for (name, param) in overrides {
        let cookie = OutgoingCookie {
            name: name.clone(),
            value: param.value().to_string(),
            replace: param.replaces(),
        };
        match groups.iter_mut().find(|(n, _)| *n == *name) {
            Some((_, list)) if param.replaces() => *list = vec![cookie],
            Some((_, list)) => list.push(cookie),
            None => groups.push((name.clone(), vec![cookie])),
        }
    }
    groups.into_iter().flat_map(|(_, list)| list).collect()
}

fn to_stored(host: &str, url: &Url, cookie: Cookie, now: DateTime<Utc>) -> Option<StoredCookie> {
    let (domain, host_only) = match cookie.domain.as_deref().map(normalize_domain) {
        Some(domain) if !domain.is_empty() => {
            if !domain_match(host, &domain) {
                log::debug!("rejecting cookie {} for {host}: domain {domain}", cookie.name);
                return None;
            }
            (domain, false)
        }
        _ => (host.to_string(), true),
    };
    let path = match cookie.path {
        Some(path) if path.starts_with('/') => path,
        _ => default_path(url.path()),
    };
    let expires = match cookie.max_age {
        Some(secs) if secs <= 0 => Some(DateTime::<Utc>::MIN_UTC),
        Some(secs) => Some(now + ChronoDuration::seconds(secs)),
        None => cookie.expires,
    };
    Some(StoredCookie {
        name: cookie.name,
        value: cookie.value,
        domain,
        host_only,
        path,
        secure: cookie.secure,
        expires,
        created: 0,
    })
}

fn normalize_domain(raw: &str) -> String {
    raw.trim().trim_start_matches('.').to_ascii_lowercase()
}

fn domain_match(host: &str, domain: &str) -> bool {
    if host == domain {
        return true;
    }
    host.parse::<IpAddr>().is_err()
        && host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn path_match(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/'))
}

fn default_path(request_path: &str) -> String {
    match request_path.rfind('/') {
        Some(idx) if idx > 0 && request_path.starts_with('/') => request_path[..idx].to_string(),
        _ => "/".to_string(),
    }
}

fn parse_url(raw: &str) -> Result<Url, Error> {
    Url::parse(raw).map_err(|e| {
        Error::new(ErrorKind::InvalidArgument, format!("invalid cookie URL '{raw}': {e}"))
    })
}
