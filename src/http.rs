//! Request and response types for intercepted traffic
//!
//! These are the values the host hands to the cache manager and gets back. They
//! are transport-agnostic: the `fetch` module turns them into real HTTP calls.

use bytes::Bytes;
use reqwest::Method;
use tokio::sync::watch;

/// Where a request's response will be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// A top-level navigation (document load)
    Document,
    /// Any sub-resource: scripts, styles, images, API calls
    Subresource,
}

/// Caller side of an abort signal
#[derive(Debug)]
pub struct AbortHandle(watch::Sender<bool>);

impl AbortHandle {
    /// Marks the associated request as no longer needed
    pub fn abort(&self) {
        self.0.send_replace(true);
    }
}

/// Observes whether the originating caller gave up on a request
#[derive(Debug, Clone)]
pub struct AbortSignal(watch::Receiver<bool>);

impl AbortSignal {
    /// Returns true once the caller has aborted
    pub fn is_aborted(&self) -> bool {
        *self.0.borrow()
    }
}

/// Creates a connected abort handle and signal
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle(tx), AbortSignal(rx))
}

/// An outbound request issued by the hosting application
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method
    pub method: Method,
    /// Request URL, absolute or relative to the configured origin
    pub url: String,
    /// Navigation or sub-resource
    pub destination: Destination,
    /// Request headers in insertion order
    pub headers: Vec<(String, String)>,
    /// Request body (empty for GET)
    pub body: Bytes,
    /// Optional signal raised when the caller no longer needs the response
    pub abort: Option<AbortSignal>,
}

impl Request {
    /// Creates a sub-resource request with the given method
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            destination: Destination::Subresource,
            headers: Vec::new(),
            body: Bytes::new(),
            abort: None,
        }
    }

    /// Creates a sub-resource GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Creates a navigation (document) GET request
    pub fn navigate(url: impl Into<String>) -> Self {
        Self {
            destination: Destination::Document,
            ..Self::get(url)
        }
    }

    /// Adds a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the request body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Attaches an abort signal
    pub fn with_abort(mut self, signal: AbortSignal) -> Self {
        self.abort = Some(signal);
        self
    }

    /// Returns true if the caller has aborted this request
    pub fn is_aborted(&self) -> bool {
        self.abort.as_ref().is_some_and(AbortSignal::is_aborted)
    }
}

/// A response returned to the hosting application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response headers in insertion order
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Bytes,
}

impl Response {
    /// Creates a response with no headers
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Adds a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Looks up a header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns true for 2xx statuses
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigate_sets_document_destination() {
        let request = Request::navigate("/");
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.destination, Destination::Document);
    }

    #[test]
    fn test_abort_signal_observes_handle() {
        let (handle, signal) = abort_pair();
        let request = Request::get("/app.js").with_abort(signal.clone());
        assert!(!request.is_aborted());

        handle.abort();

        assert!(signal.is_aborted());
        assert!(request.is_aborted());
    }

    #[test]
    fn test_request_without_signal_is_never_aborted() {
        assert!(!Request::get("/").is_aborted());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = Response::new(200, "ok").with_header("Content-Type", "text/plain");
        assert_eq!(response.header("content-type"), Some("text/plain"));
        assert_eq!(response.header("x-missing"), None);
    }

    #[test]
    fn test_is_success_covers_2xx_only() {
        assert!(Response::new(200, "").is_success());
        assert!(Response::new(204, "").is_success());
        assert!(!Response::new(304, "").is_success());
        assert!(!Response::new(503, "").is_success());
    }
}
