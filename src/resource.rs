//! Rewrites resource references in attribute values against an origin.
//!
//! Capture side: relative `src`/`href` values are made absolute against the
//! recorded page, so a log can be replayed somewhere else. Replay side:
//! whatever is still not absolute is rebased against the session location,
//! including `url(...)` references embedded in other attribute values.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use url::Url;

static CSS_URL: OnceLock<Option<Regex>> = OnceLock::new();

fn css_url_pattern() -> Option<&'static Regex> {
    CSS_URL
        .get_or_init(|| Regex::new(r#"url\(\s*(['"]?)([^'")]+)(['"]?)\s*\)"#).ok())
        .as_ref()
}

/// Attributes whose whole value is a resource reference.
pub fn is_url_attribute(name: &str) -> bool {
    name.eq_ignore_ascii_case("src") || name.eq_ignore_ascii_case("href")
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Origin {
    scheme: String,
    /// `scheme://host[:port]`
    serialized: String,
}

/// Normaliser bound to one page location.
///
/// A location without a tuple origin (`about:blank`, `data:` documents, or an
/// unparsable string) makes every operation the identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNormalizer {
    origin: Option<Origin>,
}

impl ResourceNormalizer {
    pub fn new(location: &str) -> Self {
        let origin = Url::parse(location).ok().and_then(|url| {
            let origin = url.origin();
            origin.is_tuple().then(|| Origin {
                scheme: url.scheme().to_string(),
                serialized: origin.ascii_serialization(),
            })
        });
        Self { origin }
    }

    /// Make a value captured from a live attribute absolute.
    pub fn capture_url(&self, value: &str) -> String {
        let Some(origin) = self.origin.as_ref().filter(|_| !is_left_alone(value)) else {
            return value.to_string();
        };
        if value.starts_with("//") {
            format!("{}:{}", origin.scheme, value)
        } else if !value.contains("http") {
            if value.starts_with('/') {
                format!("{}{}", origin.serialized, value)
            } else {
                format!("{}/{}", origin.serialized, value)
            }
        } else {
            value.to_string()
        }
    }

    /// Rebase a recorded value against the session location before applying it.
    pub fn rebase_url(&self, value: &str) -> String {
        let Some(origin) = self.origin.as_ref().filter(|_| !is_left_alone(value)) else {
            return value.to_string();
        };
        if value.starts_with("//") {
            format!("{}:{}", origin.scheme, value)
        } else if value.starts_with('/') {
            format!("{}{}", origin.serialized, value)
        } else if !value.starts_with("http") {
            format!("{}://{}", origin.scheme, value)
        } else {
            value.to_string()
        }
    }

    /// Rebase every `url(...)` reference inside an attribute value, keeping quotes.
    pub fn rewrite_css_urls(&self, value: &str) -> String {
        let Some(pattern) = css_url_pattern() else {
            return value.to_string();
        };
        if self.origin.is_none() {
            return value.to_string();
        }
        pattern
            .replace_all(value, |caps: &Captures<'_>| {
                format!(
                    "url({}{}{})",
                    &caps[1],
                    self.rebase_url(caps[2].trim()),
                    &caps[3]
                )
            })
            .into_owned()
    }
}

/// Empty values, fragments and non-http schemes (`data:`, `blob:`, `mailto:`,
/// `javascript:` ...) are never rewritten.
fn is_left_alone(value: &str) -> bool {
    if value.is_empty() || value.starts_with('#') {
        return true;
    }
    match scheme_of(value) {
        Some(scheme) => !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https"),
        None => false,
    }
}

fn scheme_of(value: &str) -> Option<&str> {
    let (scheme, _) = value.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    (first.is_ascii_alphabetic() && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')))
        .then_some(scheme)
}
