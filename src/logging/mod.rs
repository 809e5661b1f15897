//! Request and error logging that stays off the response path.
//!
//! [`RequestLogger`] turns a finished request (or a failure) into an
//! [`Event`] and hands it to an injected [`LogSink`] on a spawned task. Sink
//! failures are reported through `tracing` and go no further: logging can
//! never fail a request or change its response.
//!
//! The [`RequestLog`] and [`Recover`] middleware wire the logger into a
//! [`Chain`](crate::middleware::Chain).

use std::{fmt, sync::Arc, time::Duration};

use serde::{Serialize, Serializer};
use serde_json::{Value, json};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::task::JoinHandle;
use tracing::error;

use crate::{StatusCode, context::RequestContext};

mod middleware;
mod sink;

pub use middleware::{Recover, RequestLog};
pub use sink::{LogSink, TracingSink};

/// Kind of a logged [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Request,
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Request => "request",
            Self::Error => "error",
        })
    }
}

/// An immutable log record.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub date: OffsetDateTime,
    pub data: Value,
}

fn serialize_rfc3339<S>(date: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_date(*date))
}

// Falls back to the unix timestamp if the date is outside RFC 3339's range.
fn format_date(date: OffsetDateTime) -> String {
    date.format(&Rfc3339)
        .unwrap_or_else(|_| date.unix_timestamp().to_string())
}

impl Event {
    /// Builds a `request` event.
    ///
    /// The id is `"{METHOD}-{url}-{date}"`; `data` carries the status, the
    /// response time as `"{n}ms"`, and the request's method, url, and headers.
    pub fn request(
        ctx: &RequestContext,
        status: StatusCode,
        start: OffsetDateTime,
        response_time: Duration,
    ) -> Self {
        let request = ctx.request();
        let url = request.url();
        let date = start;

        Self {
            id: format!("{}-{}-{}", request.method(), url, format_date(date)),
            kind: EventKind::Request,
            date,
            data: json!({
                "status": status.as_u16(),
                "responseTime": format!("{}ms", response_time.as_millis()),
                "request": {
                    "method": request.method().as_str(),
                    "url": url,
                    "headers": request.headers(),
                },
            }),
        }
    }

    /// Builds an `error` event with id `"ERROR-{id}-{date}"`.
    pub fn error(id: &str, error: impl fmt::Display, date: OffsetDateTime) -> Self {
        Self {
            id: format!("ERROR-{}-{}", id, format_date(date)),
            kind: EventKind::Error,
            date,
            data: json!({ "error": error.to_string() }),
        }
    }

    /// The one-line access log form:
    /// `[{date}] {status} {METHOD} {url} {n}ms`.
    ///
    /// Only meaningful for `request` events; other kinds render whatever
    /// fields they have.
    pub fn access_line(&self) -> String {
        let request = &self.data["request"];
        format!(
            "[{}] {} {} {} {}",
            format_date(self.date),
            self.data["status"],
            request["method"].as_str().unwrap_or_default(),
            request["url"].as_str().unwrap_or_default(),
            self.data["responseTime"].as_str().unwrap_or_default(),
        )
    }
}

/// Fire-and-forget request and error logger.
///
/// Both entry points build their [`Event`] immediately (so the context is only
/// borrowed for the duration of the call) and return the [`JoinHandle`] of the
/// task that talks to the sink. Dropping the handle is the normal way to use
/// it.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use strata::logging::{RequestLogger, TracingSink};
/// use strata::{Method, Request, RequestContext, StatusCode};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let logger = RequestLogger::new(TracingSink);
/// let ctx = RequestContext::new(Request::new(Method::Get, "/health"));
///
/// let start = time::OffsetDateTime::now_utc();
/// logger
///     .log_request(&ctx, StatusCode::Ok, start, Duration::from_millis(3))
///     .await
///     .unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct RequestLogger {
    sink: Arc<dyn LogSink>,
}

impl fmt::Debug for RequestLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestLogger").finish_non_exhaustive()
    }
}

impl Default for RequestLogger {
    fn default() -> Self {
        Self::new(TracingSink)
    }
}

impl RequestLogger {
    /// Creates a logger that owns `sink`.
    ///
    /// # Arguments
    ///
    /// - `sink` — where access lines and events are written. Every call to it
    ///   happens on a spawned task.
    pub fn new<S>(sink: S) -> Self
    where
        S: LogSink + 'static,
    {
        Self::from_arc(Arc::new(sink))
    }

    /// Creates a logger over an already shared sink, so the caller can keep a
    /// handle to it.
    pub fn from_arc(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    /// Logs a completed request: one access line and one `request` event.
    ///
    /// The two sink calls are independent; if one fails the other still runs.
    pub fn log_request(
        &self,
        ctx: &RequestContext,
        status: StatusCode,
        start: OffsetDateTime,
        response_time: Duration,
    ) -> JoinHandle<()> {
        let event = Event::request(ctx, status, start, response_time);
        let sink = Arc::clone(&self.sink);

        tokio::spawn(async move {
            let line = event.access_line();
            if let Err(e) = sink.log_line(&line).await {
                error!(error = %e, id = %event.id, "log sink rejected access line");
            }
            if let Err(e) = sink.log_event(&event).await {
                error!(error = %e, id = %event.id, "log sink rejected request event");
            }
        })
    }

    /// Logs a failure as an `error` event.
    pub fn log_error(
        &self,
        id: &str,
        error: impl fmt::Display,
        date: OffsetDateTime,
    ) -> JoinHandle<()> {
        let event = Event::error(id, error, date);
        let sink = Arc::clone(&self.sink);

        tokio::spawn(async move {
            if let Err(e) = sink.log_event(&event).await {
                error!(error = %e, id = %event.id, "log sink rejected error event");
            }
        })
    }
}
