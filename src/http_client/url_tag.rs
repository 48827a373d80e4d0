use std::fmt;

use serde::Serialize;

/// Token substituted for every dynamic piece of a templated URL.
pub const PLACEHOLDER: &str = "${}";

/// A templated URL: the literal URL hits the wire, the name goes into the
/// `name` tag so `/users/123` and `/users/456` aggregate as `/users/${}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlTag {
    pub name: String,
    pub url: String,
}

impl UrlTag {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }

    /// Interleave literal `parts` with dynamic `pieces`, the way a template
    /// literal tag receives them: `parts.len() == pieces.len() + 1`. Extra
    /// parts or pieces are appended in order.
    pub fn from_template<P: fmt::Display>(parts: &[&str], pieces: &[P]) -> Self {
        let mut name = String::new();
        let mut url = String::new();
        let longest = parts.len().max(pieces.len());
        for i in 0..longest {
            if let Some(part) = parts.get(i) {
                name.push_str(part);
                url.push_str(part);
            }
            if let Some(piece) = pieces.get(i) {
                name.push_str(PLACEHOLDER);
                url.push_str(&piece.to_string());
            }
        }
        Self { name, url }
    }
}

impl fmt::Display for UrlTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Either a plain URL string or a templated [`UrlTag`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlArg {
    Literal(String),
    Templated(UrlTag),
}

impl UrlArg {
    /// The URL sent on the wire.
    pub fn url(&self) -> &str {
        match self {
            UrlArg::Literal(url) => url,
            UrlArg::Templated(tag) => &tag.url,
        }
    }

    /// The templated name, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            UrlArg::Literal(_) => None,
            UrlArg::Templated(tag) => Some(&tag.name),
        }
    }
}

impl From<&str> for UrlArg {
    fn from(value: &str) -> Self {
        UrlArg::Literal(value.to_string())
    }
}

impl From<String> for UrlArg {
    fn from(value: String) -> Self {
        UrlArg::Literal(value)
    }
}

impl From<&String> for UrlArg {
    fn from(value: &String) -> Self {
        UrlArg::Literal(value.clone())
    }
}

impl From<UrlTag> for UrlArg {
    fn from(value: UrlTag) -> Self {
        UrlArg::Templated(value)
    }
}

/// Formats as [`PLACEHOLDER`] under both `{}` and `{:?}`; stands in for every
/// argument when [`url_tag!`](crate::url_tag) renders the name.
#[doc(hidden)]
#[derive(Clone, Copy)]
pub struct Hole;

impl fmt::Display for Hole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(PLACEHOLDER)
    }
}

impl fmt::Debug for Hole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(PLACEHOLDER)
    }
}

/// Build a [`UrlTag`] from a format string whose holes are the dynamic pieces.
///
/// The name is rendered from the same format string with every listed
/// argument replaced by the placeholder, so positional holes (`{0}`), `{:?}`
/// and escaped braces (`{{`, `}}`) line up with the URL. Pieces are evaluated
/// once. Holes may only use `Display` or `Debug` formatting. Inline captures
/// such as `{id}` are not arguments and end up verbatim in both the URL and
/// the name, so pass them positionally instead.
///
/// ```
/// let tag = volley::url_tag!("http://example.com/users/{}", 40 + 2);
/// assert_eq!(tag.url, "http://example.com/users/42");
/// assert_eq!(tag.name, "http://example.com/users/${}");
/// ```
#[macro_export]
macro_rules! url_tag {
    ($fmt:literal $(, $piece:expr)* $(,)?) => {
        $crate::http_client::url_tag::UrlTag::new(
            format!($fmt $(, { let _ = stringify!($piece); $crate::http_client::url_tag::Hole })*),
            format!($fmt $(, $piece)*),
        )
    };
}

#[cfg(test)]
mod tests {
    use super::{UrlArg, UrlTag};

    #[test]
    fn template_pieces_become_placeholders_in_name_only() {
        let tag = UrlTag::from_template(&["http://httpbin.org/anything/", ""], &[1 + 1]);
        assert_eq!(tag.url, "http://httpbin.org/anything/2");
        assert_eq!(tag.name, "http://httpbin.org/anything/${}");
    }

    #[test]
    fn several_pieces_are_interleaved() {
        let tag = UrlTag::from_template(&["http://h/", "/posts/", "?x=1"], &["u7", "99"]);
        assert_eq!(tag.url, "http://h/u7/posts/99?x=1");
        assert_eq!(tag.name, "http://h/${}/posts/${}?x=1");
    }

    #[test]
    fn template_without_pieces_is_its_own_name() {
        let tag = UrlTag::from_template::<String>(&["http://h/static"], &[]);
        assert_eq!(tag.name, tag.url);
    }

    #[test]
    fn macro_matches_from_template() {
        let id = 456;
        let tag = crate::url_tag!("http://h/users/{}/x", id);
        assert_eq!(tag, UrlTag::from_template(&["http://h/users/", "/x"], &[id]));
    }

    #[test]
    fn macro_handles_positional_debug_and_escaped_holes() {
        let tag = crate::url_tag!("http://h/{0}/again/{0}?q={{x}}", 7);
        assert_eq!(tag.url, "http://h/7/again/7?q={x}");
        assert_eq!(tag.name, "http://h/${}/again/${}?q={x}");

        let tag = crate::url_tag!("http://h/{:?}", "a");
        assert_eq!(tag.url, "http://h/\"a\"");
        assert_eq!(tag.name, "http://h/${}");
    }

    #[test]
    fn url_arg_resolves_literal_and_templated_forms() {
        let literal = UrlArg::from("http://h/a");
        assert_eq!(literal.url(), "http://h/a");
        assert_eq!(literal.name(), None);

        let templated = UrlArg::from(UrlTag::new("http://h/${}", "http://h/1"));
        assert_eq!(templated.url(), "http://h/1");
        assert_eq!(templated.name(), Some("http://h/${}"));
    }
}
