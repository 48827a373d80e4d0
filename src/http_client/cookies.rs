use chrono::{DateTime, NaiveDateTime, Utc};
use http::HeaderMap;

use crate::http_client::response::Cookie;

/// Parse a single `Set-Cookie` header value into a [`Cookie`].
/// Unknown attributes and malformed attribute values are ignored.
pub(crate) fn parse_set_cookie_header(header_value: &str) -> Option<Cookie> {
    let mut segments = header_value.split(';').map(str::trim);
    let (name, value) = split_pair(segments.next()?);
    if name.is_empty() {
        return None;
    }
    let mut cookie = Cookie::new(name, value);

    for segment in segments.filter(|s| !s.is_empty()) {
        let (key, val) = split_pair(segment);
        match key.to_ascii_lowercase().as_str() {
            "secure" => cookie.secure = true,
            "httponly" => cookie.http_only = true,
            _ if val.is_empty() => {}
            "domain" => cookie.domain = Some(val.to_string()),
            "path" => cookie.path = Some(val.to_string()),
            "expires" => cookie.expires = parse_cookie_expires(val),
            "max-age" => cookie.max_age = val.parse::<i64>().ok(),
            "samesite" => {
                cookie.same_site = Some(match val.to_ascii_lowercase().as_str() {
                    "lax" => "Lax".to_string(),
                    "strict" => "Strict".to_string(),
                    "none" => "None".to_string(),
                    other => other.to_string(),
                })
            }
            _ => {}
        }
    }
    Some(cookie)
}

fn split_pair(segment: &str) -> (&str, &str) {
    match segment.split_once('=') {
        Some((key, value)) => (key.trim(), value.trim()),
        None => (segment.trim(), ""),
    }
}

/// All parseable `Set-Cookie` values of a header map, in header order.
pub(crate) fn cookies_from_headers(headers: &HeaderMap) -> Vec<Cookie> {
    headers
        .get_all(http::header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(parse_set_cookie_header)
        .collect()
}

/// Render `name=value` pairs as a single `Cookie` request header value.
pub(crate) fn format_cookie_header<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parse common cookie Expires formats and return UTC timestamp.
pub(crate) fn parse_cookie_expires(s: &str) -> Option<DateTime<Utc>> {
    const FMT_NETSCAPE: &str = "%a, %d-%b-%Y %H:%M:%S GMT";
    const FMT_RFC1123: &str = "%a, %d %b %Y %H:%M:%S GMT";
    const FMT_RFC850: &str = "%A, %d-%b-%y %H:%M:%S GMT";
    const FMT_ASCTIME: &str = "%a %b %e %H:%M:%S %Y";

    for fmt in [FMT_NETSCAPE, FMT_RFC1123, FMT_RFC850] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
        }
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, FMT_ASCTIME) {
        return Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::{
        cookies_from_headers, format_cookie_header, parse_cookie_expires,
        parse_set_cookie_header,
    };
    use chrono::{Datelike, Timelike};
    use http::{HeaderMap, HeaderValue};

    #[test]
    fn parses_basic_cookie_with_attrs() {
        let header = "sessionId=abc123; Domain=example.com; Path=/; Max-Age=3600; Secure; HttpOnly; SameSite=Lax; Expires=Wed, 21 Oct 2015 07:28:00 GMT";
        let c = parse_set_cookie_header(header).expect("cookie parsed");
        assert_eq!(c.name, "sessionId");
        assert_eq!(c.value, "abc123");
        assert_eq!(c.domain.as_deref(), Some("example.com"));
        assert_eq!(c.path.as_deref(), Some("/"));
        assert_eq!(c.max_age, Some(3600));
        assert!(c.secure);
        assert!(c.http_only);
        assert_eq!(c.same_site.as_deref(), Some("Lax"));
        let expires = c.expires.expect("expires parsed");
        assert_eq!((expires.year(), expires.month(), expires.day()), (2015, 10, 21));
        assert_eq!(expires.hour(), 7);
    }

    #[test]
    fn ignores_unknown_attributes_and_empty_pairs() {
        let header = "a=b; Foo=Bar; ; Baz; qux= ; SameSite=None";
        let c = parse_set_cookie_header(header).expect("cookie parsed");
        assert_eq!(c.name, "a");
        assert_eq!(c.value, "b");
        assert_eq!(c.same_site.as_deref(), Some("None"));
        assert_eq!(c.domain, None);
        assert_eq!(c.path, None);
    }

    #[test]
    fn parse_cookie_expires_multiple_formats() {
        let formats = [
            "Wed, 21 Oct 2015 07:28:00 GMT",     // RFC1123
            "Wed, 21-Oct-2015 07:28:00 GMT",     // Netscape
            "Wednesday, 21-Oct-15 07:28:00 GMT", // RFC850
            "Wed Oct 21 07:28:00 2015",          // asctime
            "Wed, 21 Oct 2015 07:28:00 +0000",   // RFC2822
            "2015-10-21T07:28:00Z",              // RFC3339
        ];
        for s in formats {
            assert!(parse_cookie_expires(s).is_some(), "failed to parse: {s}");
        }
    }

    #[test]
    fn rejects_empty_name_and_handles_trailing_semicolons() {
        assert!(parse_set_cookie_header("=value").is_none());
        let header = "foo=bar;;; SameSite=STRICT ; ";
        let c = parse_set_cookie_header(header).expect("cookie parsed");
        assert_eq!(c.name, "foo");
        assert_eq!(c.value, "bar");
        assert_eq!(c.same_site.as_deref(), Some("Strict"));
    }

    #[test]
    fn malformed_attribute_values_are_dropped() {
        let c = parse_set_cookie_header("a=b; Max-Age=soon; Expires=never; Secure").unwrap();
        assert_eq!(c.max_age, None);
        assert_eq!(c.expires, None);
        assert!(c.secure);
        assert!(!c.http_only);

        let negative = parse_set_cookie_header("gone=; Max-Age=-1").unwrap();
        assert_eq!(negative.value, "");
        assert_eq!(negative.max_age, Some(-1));
    }

    #[test]
    fn collects_every_set_cookie_header_in_order() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1; Path=/"));
        headers.append("set-cookie", HeaderValue::from_static("=broken"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        let names: Vec<String> = cookies_from_headers(&headers)
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn formats_request_cookie_header() {
        assert_eq!(format_cookie_header([("a", "1"), ("b", "2")]), "a=1; b=2");
        assert_eq!(format_cookie_header(Vec::<(&str, &str)>::new()), "");
    }
}
