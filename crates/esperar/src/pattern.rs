//! Pattern matching for observed network exchanges.
//!
//! A [`RequestPattern`] decides whether an observed [`Exchange`] satisfies a
//! declared expectation. Matching is pure: given the same pattern and exchange
//! it always returns the same result.

use crate::exchange::Exchange;
use crate::result::{EsperarError, EsperarResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// HTTP METHOD
// =============================================================================

/// HTTP methods for request matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    /// GET request
    Get,
    /// POST request
    Post,
    /// PUT request
    Put,
    /// DELETE request
    Delete,
    /// PATCH request
    Patch,
    /// HEAD request
    Head,
    /// OPTIONS request
    Options,
    /// Any method
    Any,
}

impl HttpMethod {
    /// Parse from string (case-insensitive; unknown verbs map to `Any`)
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "PATCH" => Self::Patch,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            _ => Self::Any,
        }
    }

    /// Convert to string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Any => "*",
        }
    }

    /// Check if this method matches another
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        *self == Self::Any || *other == Self::Any || *self == *other
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// URL PATTERN
// =============================================================================

/// Pattern for matching exchange URLs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UrlPattern {
    /// Exact URL match
    Exact(String),
    /// Prefix match
    Prefix(String),
    /// Contains substring
    Contains(String),
    /// Glob over the URL path: `*` matches one path segment, a trailing `**`
    /// matches the rest of the path. Patterns starting with `/` match against
    /// the URL's path component, so `/api/v1/tags/name/*` matches
    /// `https://host/api/v1/tags/name/PII` but never `https://host/api/v1/tags`.
    Glob(String),
    /// Regex match over the full URL
    Regex(String),
    /// Match any URL
    Any,
}

impl UrlPattern {
    /// Check that the pattern is well-formed
    pub fn validate(&self) -> EsperarResult<()> {
        match self {
            Self::Exact(s) | Self::Prefix(s) | Self::Contains(s) | Self::Glob(s) => {
                if s.is_empty() {
                    return Err(EsperarError::InvalidPattern {
                        message: "empty URL".to_string(),
                    });
                }
                Ok(())
            }
            Self::Regex(s) => {
                if s.is_empty() {
                    return Err(EsperarError::InvalidPattern {
                        message: "empty URL".to_string(),
                    });
                }
                regex::Regex::new(s)
                    .map(|_| ())
                    .map_err(|e| EsperarError::InvalidPattern {
                        message: format!("invalid regex: {e}"),
                    })
            }
            Self::Any => Ok(()),
        }
    }

    /// Check if a URL matches this pattern
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Exact(pattern) => url == pattern,
            Self::Prefix(pattern) => url.starts_with(pattern),
            Self::Contains(pattern) => url.contains(pattern),
            Self::Glob(pattern) => glob_matches(pattern, url),
            Self::Regex(pattern) => regex::Regex::new(pattern)
                .map(|re| re.is_match(url))
                .unwrap_or(false),
            Self::Any => true,
        }
    }
}

impl std::fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(s) | Self::Prefix(s) | Self::Contains(s) | Self::Regex(s) | Self::Glob(s) => {
                write!(f, "{}", s)
            }
            Self::Any => write!(f, "*"),
        }
    }
}

/// Split a URL or pattern at its query string
fn split_query(s: &str) -> (&str, Option<&str>) {
    match s.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (s, None),
    }
}

/// Extract the path component from an absolute or relative URL
fn path_of(url: &str) -> &str {
    if let Some(idx) = url.find("://") {
        let rest = &url[idx + 3..];
        match rest.find('/') {
            Some(slash) => &rest[slash..],
            None => "",
        }
    } else {
        url
    }
}

/// Glob matching over URLs, segment-aware on the path portion
fn glob_matches(pattern: &str, url: &str) -> bool {
    let (pat_path, pat_query) = split_query(pattern);
    let (url_path, url_query) = split_query(url);

    // A pattern rooted at `/` matches the URL's path regardless of host
    let url_path = if pat_path.starts_with('/') {
        path_of(url_path)
    } else {
        url_path
    };

    if !path_glob(pat_path, url_path) {
        return false;
    }

    match pat_query {
        None => true,
        Some(pq) => infix_glob(pq, url_query.unwrap_or("")),
    }
}

/// Segment-wise path glob: `*` as a whole segment matches exactly one
/// non-empty segment, a final `**` matches any remainder (including nothing),
/// and a `*` inside a segment (`classifications*`) matches within that
/// segment only. Otherwise segment counts must agree, so `/tags` never
/// matches `/tags/name/*`.
fn path_glob(pattern: &str, path: &str) -> bool {
    let pat_segs: Vec<&str> = pattern.split('/').collect();
    let path_segs: Vec<&str> = path.split('/').collect();

    let (pat_segs, open_ended) = match pat_segs.last() {
        Some(&"**") => (&pat_segs[..pat_segs.len() - 1], true),
        _ => (&pat_segs[..], false),
    };

    if open_ended {
        if path_segs.len() < pat_segs.len() {
            return false;
        }
    } else if path_segs.len() != pat_segs.len() {
        return false;
    }

    pat_segs.iter().zip(path_segs.iter()).all(|(pat, seg)| {
        if *pat == "*" {
            !seg.is_empty()
        } else if pat.contains('*') {
            infix_glob(pat, seg)
        } else {
            pat == seg
        }
    })
}

/// Infix glob for query strings: `*`-separated parts found left to right
fn infix_glob(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.is_empty() {
        return text.is_empty();
    }

    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if let Some(found) = text[pos..].find(part) {
            if i == 0 && found != 0 {
                return false;
            }
            pos += found + part.len();
        } else {
            return false;
        }
    }

    pattern.ends_with('*') || pos == text.len()
}

/// Check whether a URL's query string contains `key=value`, independent of
/// key ordering and of unrelated keys
#[must_use]
pub fn has_query_pair(url: &str, key: &str, value: &str) -> bool {
    let (_, query) = split_query(url);
    let Some(query) = query else {
        return false;
    };
    query.split('&').any(|pair| {
        pair.split_once('=')
            .is_some_and(|(k, v)| k == key && v == value)
    })
}

// =============================================================================
// REQUEST PATTERN
// =============================================================================

/// Predicate over a request body snapshot
#[derive(Clone)]
pub struct BodyPredicate(Arc<dyn Fn(&[u8]) -> bool + Send + Sync>);

impl std::fmt::Debug for BodyPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyPredicate").finish_non_exhaustive()
    }
}

impl BodyPredicate {
    /// Wrap a predicate function
    pub fn new(func: impl Fn(&[u8]) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(func))
    }

    /// Evaluate the predicate
    #[must_use]
    pub fn check(&self, body: &[u8]) -> bool {
        (self.0)(body)
    }
}

/// Matcher describing which request/response exchange an expectation waits for
#[derive(Debug, Clone)]
pub struct RequestPattern {
    /// HTTP method to match (`Any` by default)
    method: HttpMethod,
    /// URL pattern to match
    url: UrlPattern,
    /// Query pairs that must all be present in the exchange URL
    query: Vec<(String, String)>,
    /// Optional predicate over the request body snapshot
    body: Option<BodyPredicate>,
}

impl RequestPattern {
    /// Create a pattern from a method and URL pattern
    #[must_use]
    pub fn new(method: HttpMethod, url: UrlPattern) -> Self {
        Self {
            method,
            url,
            query: Vec::new(),
            body: None,
        }
    }

    /// Glob pattern matched by any method
    #[must_use]
    pub fn any(glob: impl Into<String>) -> Self {
        Self::new(HttpMethod::Any, UrlPattern::Glob(glob.into()))
    }

    /// GET glob pattern
    #[must_use]
    pub fn get(glob: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, UrlPattern::Glob(glob.into()))
    }

    /// POST glob pattern
    #[must_use]
    pub fn post(glob: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, UrlPattern::Glob(glob.into()))
    }

    /// PUT glob pattern
    #[must_use]
    pub fn put(glob: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, UrlPattern::Glob(glob.into()))
    }

    /// PATCH glob pattern
    #[must_use]
    pub fn patch(glob: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, UrlPattern::Glob(glob.into()))
    }

    /// DELETE glob pattern
    #[must_use]
    pub fn delete(glob: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, UrlPattern::Glob(glob.into()))
    }

    /// Require a `key=value` pair in the exchange's query string
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Require the request body snapshot to satisfy a predicate. An absent
    /// body is presented to the predicate as an empty slice.
    #[must_use]
    pub fn with_body(mut self, func: impl Fn(&[u8]) -> bool + Send + Sync + 'static) -> Self {
        self.body = Some(BodyPredicate::new(func));
        self
    }

    /// The method this pattern matches
    #[must_use]
    pub const fn method(&self) -> HttpMethod {
        self.method
    }

    /// The URL pattern
    #[must_use]
    pub const fn url(&self) -> &UrlPattern {
        &self.url
    }

    /// Check that the pattern is well-formed
    pub fn validate(&self) -> EsperarResult<()> {
        self.url.validate()?;
        for (key, _) in &self.query {
            if key.is_empty() {
                return Err(EsperarError::InvalidPattern {
                    message: "empty query key".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Check whether an observed exchange satisfies this pattern
    #[must_use]
    pub fn matches(&self, exchange: &Exchange) -> bool {
        if !self.method.matches(&exchange.method) {
            return false;
        }
        if !self.url.matches(&exchange.url) {
            return false;
        }
        if !self
            .query
            .iter()
            .all(|(key, value)| has_query_pair(&exchange.url, key, value))
        {
            return false;
        }
        match &self.body {
            Some(predicate) => {
                predicate.check(exchange.request_body.as_deref().unwrap_or_default())
            }
            None => true,
        }
    }
}

impl std::fmt::Display for RequestPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)?;
        for (key, value) in &self.query {
            write!(f, " ?{key}={value}")?;
        }
        Ok(())
    }
}
