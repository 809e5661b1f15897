//! HTTP response value with a fluent builder API.

use bytes::Bytes;

use super::{Headers, StatusCode};

/// An HTTP response.
///
/// The body is an immutable, reference-counted [`Bytes`] buffer, so
/// [`Clone`] is cheap and every clone is independent: consuming one clone's
/// body with [`into_body`](Self::into_body) leaves the others intact. The
/// response cache relies on this to hand out copies of a stored response.
///
/// # Examples
///
/// ```
/// use strata::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let copy = response.clone();
/// assert_eq!(response.into_body(), *copy.body_ref());
/// assert_eq!(copy.headers().get("content-type"), Some("application/json"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replaces the whole header map.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Appends a header in-place. Intended for middleware pipelines that receive
    /// a `Response` from downstream and need to decorate it without consuming it.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Replaces every value of a header in-place, leaving a single entry.
    ///
    /// Use this instead of [`add_header`](Self::add_header) when a layer must
    /// own a header outright, whatever downstream set.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Sets the response body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Bytes::from(body.into());
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the response body without consuming it.
    pub fn body_ref(&self) -> &Bytes {
        &self.body
    }

    /// Consumes the response, yielding its body.
    pub fn into_body(self) -> Bytes {
        self.body
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_ok_response() {
        let r = Response::new(StatusCode::Ok).body("Hello");
        assert_eq!(r.status(), StatusCode::Ok);
        assert_eq!(&r.body_ref()[..], b"Hello");
    }

    #[test]
    fn custom_header() {
        let r = Response::new(StatusCode::Ok)
            .header("X-Request-Id", "abc-123")
            .body("ok");
        assert_eq!(r.headers().get("x-request-id"), Some("abc-123"));
    }

    #[test]
    fn consuming_a_clone_leaves_original_intact() {
        let original = Response::new(StatusCode::Ok).body("payload");
        let copy = original.clone();
        let consumed = copy.into_body();
        assert_eq!(&consumed[..], b"payload");
        assert_eq!(&original.body_ref()[..], b"payload");
    }

    #[test]
    fn with_headers_replaces() {
        let mut headers = Headers::new();
        headers.insert("ETag", "\"abc\"");
        let r = Response::new(StatusCode::NotModified)
            .header("X-Old", "1")
            .with_headers(headers);
        assert!(!r.headers().contains("x-old"));
        assert_eq!(r.headers().get("etag"), Some("\"abc\""));
        assert!(r.body_ref().is_empty());
    }

    #[test]
    fn set_header_overrides_downstream_values() {
        let mut r = Response::new(StatusCode::Ok)
            .header("Cache-Control", "no-store")
            .header("cache-control", "private");
        r.set_header("Cache-Control", "max-age=60");
        let values: Vec<_> = r.headers().get_all("cache-control").collect();
        assert_eq!(values, vec!["max-age=60"]);
    }

    #[test]
    fn default_is_empty_ok() {
        let r = Response::default();
        assert_eq!(r.status(), StatusCode::Ok);
        assert!(r.headers().is_empty());
    }
}
