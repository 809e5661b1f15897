//! HTTP value types the pipeline operates on.
//!
//! [`Method`], [`StatusCode`], [`Headers`], [`Request`], and [`Response`] are
//! plain owned values. Transport is someone else's job: a request arrives
//! here already read off the wire, and a response leaves as a value.

use std::{fmt, str::FromStr};

pub mod headers;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use request::Request;
pub use response::Response;

macro_rules! status_codes {
    ($($(#[$doc:meta])* $name:ident = $code:literal, $reason:literal;)+) => {
        /// An HTTP response status code.
        ///
        /// # Examples
        ///
        /// ```
        /// use strata::http::StatusCode;
        ///
        /// let status = StatusCode::Ok;
        /// assert_eq!(status.as_u16(), 200);
        /// assert_eq!(status.canonical_reason(), "OK");
        /// assert!(status.is_success());
        /// assert_eq!(StatusCode::try_from(304_u16), Ok(StatusCode::NotModified));
        /// ```
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum StatusCode {
            $($(#[$doc])* $name = $code,)+
        }

        impl StatusCode {
            /// Returns the canonical reason phrase for this status code.
            pub fn canonical_reason(self) -> &'static str {
                match self {
                    $(Self::$name => $reason,)+
                }
            }
        }

        impl TryFrom<u16> for StatusCode {
            type Error = u16;

            /// Fails with the input for codes this type has no variant for.
            fn try_from(code: u16) -> Result<Self, Self::Error> {
                match code {
                    $($code => Ok(Self::$name),)+
                    other => Err(other),
                }
            }
        }
    };
}

status_codes! {
    Ok = 200, "OK";
    Created = 201, "Created";
    Accepted = 202, "Accepted";
    NoContent = 204, "No Content";
    MovedPermanently = 301, "Moved Permanently";
    Found = 302, "Found";
    /// Sent by the response cache when `If-None-Match` matches the stored `ETag`.
    NotModified = 304, "Not Modified";
    TemporaryRedirect = 307, "Temporary Redirect";
    PermanentRedirect = 308, "Permanent Redirect";
    BadRequest = 400, "Bad Request";
    Unauthorized = 401, "Unauthorized";
    Forbidden = 403, "Forbidden";
    NotFound = 404, "Not Found";
    MethodNotAllowed = 405, "Method Not Allowed";
    Conflict = 409, "Conflict";
    Gone = 410, "Gone";
    UnprocessableEntity = 422, "Unprocessable Entity";
    TooManyRequests = 429, "Too Many Requests";
    InternalServerError = 500, "Internal Server Error";
    NotImplemented = 501, "Not Implemented";
    BadGateway = 502, "Bad Gateway";
    ServiceUnavailable = 503, "Service Unavailable";
    GatewayTimeout = 504, "Gateway Timeout";
}

impl StatusCode {
    /// Returns the numeric status code as a `u16`.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.as_u16())
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.canonical_reason())
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> u16 {
        code.as_u16()
    }
}

/// An HTTP request method.
///
/// Non-standard methods are kept verbatim in [`Method::Custom`].
///
/// # Examples
///
/// ```
/// use strata::http::Method;
///
/// let method: Method = "GET".parse().unwrap();
/// assert_eq!(method, Method::Get);
/// assert_eq!(method.as_str(), "GET");
///
/// let custom: Method = "PURGE".parse().unwrap();
/// assert_eq!(custom, Method::Custom("PURGE".to_owned()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Connect,
    Trace,
    Custom(String),
}

impl Method {
    /// Returns the method as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Connect => "CONNECT",
            Self::Trace => "TRACE",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            "PATCH" => Self::Patch,
            "CONNECT" => Self::Connect,
            "TRACE" => Self::Trace,
            other => Self::Custom(other.to_owned()),
        })
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_u16() {
        for code in [200_u16, 304, 404, 500] {
            let status = StatusCode::try_from(code).unwrap();
            assert_eq!(u16::from(status), code);
        }
        assert_eq!(StatusCode::try_from(299_u16), Err(299));
    }

    #[test]
    fn status_display() {
        assert_eq!(StatusCode::NotModified.to_string(), "304 Not Modified");
        assert!(!StatusCode::NotModified.is_success());
        assert!(StatusCode::NoContent.is_success());
    }

    #[test]
    fn method_names() {
        for name in ["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "CONNECT", "TRACE"] {
            let method: Method = name.parse().unwrap();
            assert!(!matches!(method, Method::Custom(_)), "{name}");
            assert_eq!(method.to_string(), name);
        }
    }

    #[test]
    fn method_is_case_sensitive() {
        let method: Method = "get".parse().unwrap();
        assert_eq!(method, Method::Custom("get".to_owned()));
        assert_eq!(method.as_str(), "get");
    }
}
