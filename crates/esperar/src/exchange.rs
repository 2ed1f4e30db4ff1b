//! Observed network exchanges and their settlement summaries.

use crate::pattern::HttpMethod;
use crate::result::EsperarResult;
use serde::{Deserialize, Serialize};

/// An observed network request/response pair surfaced by the automation
/// layer. Read-only once observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    /// HTTP method of the request
    pub method: HttpMethod,
    /// Full request URL
    pub url: String,
    /// Response status code
    pub status: u16,
    /// Request body snapshot
    pub request_body: Option<Vec<u8>>,
    /// Response body
    pub response_body: Option<Vec<u8>>,
    /// Milliseconds since session start when the response was observed
    pub observed_at_ms: u64,
}

impl Exchange {
    /// Create a new observed exchange
    #[must_use]
    pub fn new(method: HttpMethod, url: impl Into<String>, status: u16) -> Self {
        Self {
            method,
            url: url.into(),
            status,
            request_body: None,
            response_body: None,
            observed_at_ms: 0,
        }
    }

    /// Set the request body snapshot
    #[must_use]
    pub fn with_request_body(mut self, body: Vec<u8>) -> Self {
        self.request_body = Some(body);
        self
    }

    /// Set the response body
    #[must_use]
    pub fn with_response_body(mut self, body: Vec<u8>) -> Self {
        self.response_body = Some(body);
        self
    }

    /// Set the observation timestamp
    #[must_use]
    pub const fn with_observed_at(mut self, observed_at_ms: u64) -> Self {
        self.observed_at_ms = observed_at_ms;
        self
    }

    /// Get the response body as a string
    #[must_use]
    pub fn body_string(&self) -> Option<String> {
        self.response_body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).to_string())
    }

    /// Parse the response body as JSON. An absent body parses as empty input
    /// and surfaces the resulting JSON error.
    pub fn body_json<T: for<'de> Deserialize<'de>>(&self) -> EsperarResult<T> {
        let body = self.response_body.as_deref().unwrap_or_default();
        let data = serde_json::from_slice(body)?;
        Ok(data)
    }

    /// Reduce the exchange to the summary carried by a settled expectation
    #[must_use]
    pub fn summary(&self) -> ExchangeSummary {
        ExchangeSummary {
            method: self.method,
            url: self.url.clone(),
            status: self.status,
            body: self.response_body.clone(),
        }
    }
}

/// The matched exchange's summary, delivered when an expectation settles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSummary {
    /// HTTP method of the matched request
    pub method: HttpMethod,
    /// Full URL of the matched request
    pub url: String,
    /// Response status code
    pub status: u16,
    /// Response body, if captured
    pub body: Option<Vec<u8>>,
}

impl ExchangeSummary {
    /// Get the response body as a string
    #[must_use]
    pub fn body_string(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).to_string())
    }

    /// Parse the response body as JSON. An absent body parses as empty input
    /// and surfaces the resulting JSON error.
    pub fn body_json<T: for<'de> Deserialize<'de>>(&self) -> EsperarResult<T> {
        let body = self.body.as_deref().unwrap_or_default();
        let data = serde_json::from_slice(body)?;
        Ok(data)
    }
}
