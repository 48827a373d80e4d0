use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use serde_json::Value;

use crate::errors::{Error, ErrorKind};
use crate::http_client::cookie_jar::CookieJar;

pub const DEFAULT_MAX_REDIRECTS: u32 = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_BATCH: usize = 20;
pub const DEFAULT_BATCH_PER_HOST: usize = 6;

/// Tag keys the engine attaches to samples on its own.
pub const SYSTEM_TAG_KEYS: &[&str] = &[
    "proto",
    "status",
    "method",
    "url",
    "name",
    "group",
    "error",
    "error_code",
    "tls_version",
    "ocsp_status",
    "vu",
    "iter",
];

/// Run-wide options shared by every virtual user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    pub max_redirects: u32,
    pub throw: bool,
    pub user_agent: String,
    pub batch: usize,
    pub batch_per_host: usize,
    pub discard_response_bodies: bool,
    pub http_debug: HttpDebug,
    #[serde(rename = "insecureSkipTLSVerify")]
    pub insecure_skip_tls_verify: bool,
    pub system_tags: SystemTags,
    pub run_tags: BTreeMap<String, String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
            throw: false,
            user_agent: format!("volley/{}", env!("CARGO_PKG_VERSION")),
            batch: DEFAULT_BATCH,
            batch_per_host: DEFAULT_BATCH_PER_HOST,
            discard_response_bodies: false,
            http_debug: HttpDebug::Off,
            insecure_skip_tls_verify: false,
            system_tags: SystemTags::default(),
            run_tags: BTreeMap::new(),
        }
    }
}

impl Options {
    pub fn from_value(value: &Value) -> Result<Self, Error> {
        Options::deserialize(value).map_err(|e| {
            Error::new(ErrorKind::InvalidArgument, format!("invalid options: {e}"))
        })
    }
}

/// Request/response dumping level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HttpDebug {
    #[default]
    Off,
    Headers,
    Full,
}

impl<'de> Deserialize<'de> for HttpDebug {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DebugVisitor;

        impl Visitor<'_> for DebugVisitor {
            type Value = HttpDebug;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("\"\", \"headers\", \"full\" or a boolean")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<HttpDebug, E> {
                Ok(if v { HttpDebug::Headers } else { HttpDebug::Off })
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<HttpDebug, E> {
                match v.trim().to_ascii_lowercase().as_str() {
                    "" | "off" | "false" => Ok(HttpDebug::Off),
                    "headers" | "true" => Ok(HttpDebug::Headers),
                    "full" => Ok(HttpDebug::Full),
                    other => Err(E::custom(format!("unknown httpDebug level '{other}'"))),
                }
            }

            fn visit_unit<E: de::Error>(self) -> Result<HttpDebug, E> {
                Ok(HttpDebug::Off)
            }
        }

        deserializer.deserialize_any(DebugVisitor)
    }
}

/// Enabled system tag keys. Disabled keys are never emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemTags(BTreeSet<String>);

impl Default for SystemTags {
    fn default() -> Self {
        Self(SYSTEM_TAG_KEYS.iter().map(|k| k.to_string()).collect())
    }
}

impl SystemTags {
    pub fn only<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keys.into_iter().map(Into::into).collect())
    }

    pub fn enabled(&self, key: &str) -> bool {
        self.0.contains(key)
    }
}

impl<'de> Deserialize<'de> for SystemTags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let keys = Vec::<String>::deserialize(deserializer)?;
        Ok(SystemTags::only(keys))
    }
}

/// Per-request options. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Params {
    #[serde(deserialize_with = "scalar_map")]
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, CookieParam>,
    /// Explicit jar for this call, bypassing the ambient one.
    #[serde(skip)]
    pub jar: Option<CookieJar>,
    /// `None` defers to [`Options::max_redirects`].
    pub redirects: Option<u32>,
    #[serde(deserialize_with = "scalar_map")]
    pub tags: BTreeMap<String, String>,
    #[serde(deserialize_with = "timeout_value")]
    pub timeout: Option<Duration>,
    pub throw: Option<bool>,
    pub compression: Option<String>,
    pub response_type: Option<ResponseType>,
    pub auth: Option<AuthMode>,
}

impl Params {
    pub fn from_value(value: &Value) -> Result<Self, Error> {
        if value.is_null() {
            return Ok(Params::default());
        }
        Params::deserialize(value)
            .map_err(|e| Error::new(ErrorKind::InvalidArgument, format!("invalid params: {e}")))
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: CookieParam) -> Self {
        self.cookies.insert(name.into(), value);
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn jar(mut self, jar: CookieJar) -> Self {
        self.jar = Some(jar);
        self
    }

    pub fn redirects(mut self, limit: u32) -> Self {
        self.redirects = Some(limit);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn throw(mut self, throw: bool) -> Self {
        self.throw = Some(throw);
        self
    }

    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }

    pub fn auth(mut self, auth: AuthMode) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn compression(mut self, algorithms: impl Into<String>) -> Self {
        self.compression = Some(algorithms.into());
        self
    }
}

/// A per-request cookie: either a bare value (appended) or `{value, replace}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CookieParam {
    Value(String),
    Detailed {
        value: String,
        #[serde(default)]
        replace: bool,
    },
}

impl CookieParam {
    pub fn replace(value: impl Into<String>) -> Self {
        CookieParam::Detailed {
            value: value.into(),
            replace: true,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            CookieParam::Value(v) => v,
            CookieParam::Detailed { value, .. } => value,
        }
    }

    pub fn replaces(&self) -> bool {
        matches!(self, CookieParam::Detailed { replace: true, .. })
    }
}

impl From<&str> for CookieParam {
    fn from(value: &str) -> Self {
        CookieParam::Value(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    #[default]
    Text,
    Binary,
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Credentials in the URL become a Basic header.
    #[default]
    Basic,
    Digest,
    Ntlm,
}

/// Accept a map whose values are strings, numbers or booleans.
fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    raw.into_iter()
        .map(|(key, value)| match value {
            Value::String(s) => Ok((key, s)),
            Value::Number(n) => Ok((key, n.to_string())),
            Value::Bool(b) => Ok((key, b.to_string())),
            other => Err(de::Error::custom(format!(
                "value for '{key}' must be a string, got {other}"
            ))),
        })
        .collect()
}

/// Milliseconds as a number, or a duration string such as `"1.5s"` / `"250ms"`.
fn timeout_value<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            let ms = n
                .as_f64()
                .filter(|ms| ms.is_finite() && *ms >= 0.0)
                .ok_or_else(|| de::Error::custom("timeout must be a non-negative number"))?;
            Duration::try_from_secs_f64(ms / 1000.0)
                .map(Some)
                .map_err(|e| de::Error::custom(format!("invalid timeout {n}: {e}")))
        }
        Some(Value::String(s)) => parse_timeout(&s).map(Some).map_err(de::Error::custom),
        Some(other) => Err(de::Error::custom(format!("invalid timeout {other}"))),
    }
}

pub(crate) fn parse_timeout(raw: &str) -> Result<Duration, String> {
    let trimmed = raw.trim();
    if let Ok(ms) = trimmed.parse::<f64>() {
        return Duration::try_from_secs_f64(ms / 1000.0)
            .map_err(|e| format!("invalid timeout '{raw}': {e}"));
    }
    if let Some(fractional) = fractional_duration(trimmed) {
        return Ok(fractional);
    }
    humantime::parse_duration(trimmed).map_err(|e| format!("invalid timeout '{raw}': {e}"))
}

/// humantime rejects fractional units such as `1.5s`; handle the single-unit case.
fn fractional_duration(raw: &str) -> Option<Duration> {
    let unit_start = raw.find(|c: char| c.is_ascii_alphabetic())?;
    let (number, unit) = raw.split_at(unit_start);
    if !number.contains('.') {
        return None;
    }
    let value: f64 = number.parse().ok()?;
    let scale = match unit {
        "ms" => 0.001,
        "s" => 1.0,
        "m" => 60.0,
        "h" => 3600.0,
        _ => return None,
    };
    Duration::try_from_secs_f64(value * scale).ok()
}

#[cfg(test)]
mod tests {
    use super::{AuthMode, CookieParam, HttpDebug, Options, Params, ResponseType};
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn options_have_documented_defaults() {
        let o = Options::default();
        assert_eq!(o.max_redirects, 10);
        assert_eq!(o.batch, 20);
        assert_eq!(o.batch_per_host, 6);
        assert!(!o.throw);
        assert!(o.user_agent.starts_with("volley/"));
        assert!(o.system_tags.enabled("name"));
        assert!(o.system_tags.enabled("ocsp_status"));
    }

    #[test]
    fn options_parse_camel_case_keys() {
        let o = Options::from_value(&json!({
            "maxRedirects": 3,
            "throw": true,
            "batchPerHost": 2,
            "httpDebug": "full",
            "insecureSkipTLSVerify": true,
            "systemTags": ["status", "method"],
        }))
        .unwrap();
        assert_eq!(o.max_redirects, 3);
        assert!(o.throw);
        assert_eq!(o.batch, 20);
        assert_eq!(o.batch_per_host, 2);
        assert_eq!(o.http_debug, HttpDebug::Full);
        assert!(o.insecure_skip_tls_verify);
        assert!(o.system_tags.enabled("status"));
        assert!(!o.system_tags.enabled("url"));
    }

    #[test]
    fn params_accept_both_cookie_forms_and_ignore_unknown_keys() {
        let p = Params::from_value(&json!({
            "headers": {"X-Num": 5, "Accept": "text/plain"},
            "cookies": {"a": "1", "b": {"value": "2", "replace": true}, "c": {"value": "3"}},
            "tags": {"name": "login"},
            "redirects": 0,
            "responseType": "binary",
            "auth": "ntlm",
            "somethingElse": [1, 2, 3],
        }))
        .unwrap();
        assert_eq!(p.headers.get("X-Num").map(String::as_str), Some("5"));
        assert_eq!(p.cookies["a"], CookieParam::Value("1".into()));
        assert!(p.cookies["b"].replaces());
        assert!(!p.cookies["c"].replaces());
        assert_eq!(p.cookies["c"].value(), "3");
        assert_eq!(p.redirects, Some(0));
        assert_eq!(p.response_type, Some(ResponseType::Binary));
        assert_eq!(p.auth, Some(AuthMode::Ntlm));
        assert!(p.jar.is_none());
    }

    #[test]
    fn timeout_accepts_milliseconds_and_duration_strings() {
        let ms = Params::from_value(&json!({"timeout": 1500})).unwrap();
        assert_eq!(ms.timeout, Some(Duration::from_millis(1500)));

        let text = Params::from_value(&json!({"timeout": "2s"})).unwrap();
        assert_eq!(text.timeout, Some(Duration::from_secs(2)));

        let frac = Params::from_value(&json!({"timeout": "1.5s"})).unwrap();
        assert_eq!(frac.timeout, Some(Duration::from_millis(1500)));

        let compound = Params::from_value(&json!({"timeout": "1m 30s"})).unwrap();
        assert_eq!(compound.timeout, Some(Duration::from_secs(90)));

        let digits = Params::from_value(&json!({"timeout": "250"})).unwrap();
        assert_eq!(digits.timeout, Some(Duration::from_millis(250)));

        assert!(Params::from_value(&json!({"timeout": "soon"})).is_err());
        assert!(Params::from_value(&json!({"timeout": -1})).is_err());
    }

    #[test]
    fn oversized_timeouts_are_rejected() {
        assert!(Params::from_value(&json!({"timeout": 1e300})).is_err());
        assert!(Params::from_value(&json!({"timeout": "1e300"})).is_err());
        assert!(Params::from_value(&json!({"timeout": "99999999999999999999999.5h"})).is_err());
        assert!(Params::from_value(&json!({"timeout": "-2"})).is_err());
    }

    #[test]
    fn null_params_are_defaults() {
        let p = Params::from_value(&serde_json::Value::Null).unwrap();
        assert!(p.headers.is_empty());
        assert!(p.timeout.is_none());
    }
}
