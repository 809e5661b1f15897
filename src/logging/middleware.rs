//! Middleware that connect a chain to a [`RequestLogger`].
//!
//! - [`RequestLog`] — times the rest of the chain and logs every completed
//!   request.
//! - [`Recover`] — turns chain errors into responses and logs them as error
//!   events.
//!
//! Put `RequestLog` outside `Recover` so recovered failures are request-logged
//! with their error status:
//!
//! ```
//! use std::sync::Arc;
//! use strata::logging::{Recover, RequestLog, RequestLogger};
//! use strata::middleware::{compose, handler_fn};
//! use strata::{Response, StatusCode};
//!
//! let logger = RequestLogger::default();
//! let chain = compose(
//!     vec![
//!         Arc::new(RequestLog::new(logger.clone())),
//!         Arc::new(Recover::new(logger)),
//!     ],
//!     handler_fn(|_ctx| Box::pin(async { Ok(Response::new(StatusCode::Ok)) })),
//! );
//! assert_eq!(chain.len(), 2);
//! ```

use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::debug;

use crate::{
    context::RequestContext,
    middleware::{BoxFuture, HandlerResult, Middleware, Next},
};

use super::RequestLogger;

/// Built-in middleware that logs each request's method, url, status, and
/// duration through a [`RequestLogger`].
///
/// Never short-circuits and never alters the response. Errors from
/// downstream pass through untouched and are not request-logged here; pair it
/// with [`Recover`] for that.
#[derive(Debug, Clone)]
pub struct RequestLog {
    logger: RequestLogger,
}

impl RequestLog {
    /// Creates the middleware over a shared [`RequestLogger`].
    pub fn new(logger: RequestLogger) -> Self {
        Self { logger }
    }
}

impl Middleware for RequestLog {
    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let started_at = OffsetDateTime::now_utc();
            let start = Instant::now();

            let response = next.run(ctx).await?;

            // The log task is detached; the response goes out without waiting on it.
            drop(
                self.logger
                    .log_request(ctx, response.status(), started_at, start.elapsed()),
            );
            Ok(response)
        })
    }
}

/// Converts chain errors into responses and records them as error events.
///
/// The event id is `"{METHOD}-{url}"`; the response is
/// [`HandlerError::into_response`](crate::HandlerError::into_response).
#[derive(Debug, Clone)]
pub struct Recover {
    logger: RequestLogger,
}

impl Recover {
    /// Creates the middleware. Recovered errors are logged through `logger`.
    pub fn new(logger: RequestLogger) -> Self {
        Self { logger }
    }
}

impl Middleware for Recover {
    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            match next.run(ctx).await {
                Ok(response) => Ok(response),
                Err(err) => {
                    let request = ctx.request();
                    let id = format!("{}-{}", request.method(), request.url());
                    debug!(id = %id, status = %err.status_code(), "recovering from chain error");

                    drop(self.logger.log_error(&id, &err, OffsetDateTime::now_utc()));
                    Ok(err.into_response())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        HandlerError, Method, Request, Response, StatusCode,
        logging::{EventKind, tests::MemorySink},
        middleware::{Handler, compose, handler_fn},
    };

    fn ctx(url: &str) -> RequestContext {
        RequestContext::new(Request::new(Method::Get, url))
    }

    // Lets the detached log tasks run.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn request_log_records_status_and_timing() {
        let sink = Arc::new(MemorySink::default());
        let logger = RequestLogger::from_arc(sink.clone());
        let chain = compose(
            vec![Arc::new(RequestLog::new(logger))],
            handler_fn(|_ctx| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(Response::new(StatusCode::Created).body("made"))
                })
            }),
        );

        let response = chain.call(&mut ctx("/items")).await.unwrap();
        assert_eq!(response.status(), StatusCode::Created);
        settle().await;

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("201 GET /items"), "{}", lines[0]);

        let events = sink.events();
        assert_eq!(events[0].kind, EventKind::Request);
        assert_eq!(events[0].data["status"], 201);
    }

    #[tokio::test]
    async fn request_log_passes_errors_through() {
        let sink = Arc::new(MemorySink::default());
        let chain = compose(
            vec![Arc::new(RequestLog::new(RequestLogger::from_arc(sink.clone())))],
            handler_fn(|_ctx| Box::pin(async { Err(HandlerError::internal("boom")) })),
        );

        assert!(chain.call(&mut ctx("/x")).await.is_err());
        settle().await;
        assert!(sink.lines().is_empty());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn recover_converts_and_logs_errors() {
        let sink = Arc::new(MemorySink::default());
        let logger = RequestLogger::from_arc(sink.clone());
        let chain = compose(
            vec![
                Arc::new(RequestLog::new(logger.clone())),
                Arc::new(Recover::new(logger)),
            ],
            handler_fn(|_ctx| {
                Box::pin(async { Err(HandlerError::status(StatusCode::NotFound, "no post")) })
            }),
        );

        let response = chain.call(&mut ctx("/posts/9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NotFound);
        assert_eq!(&response.body_ref()[..], b"no post");
        settle().await;

        let events = sink.events();
        let error = events
            .iter()
            .find(|e| e.kind == EventKind::Error)
            .expect("error event");
        assert!(error.id.starts_with("ERROR-GET-/posts/9-"), "{}", error.id);
        assert_eq!(error.data["error"], "404 Not Found: no post");

        let request = events
            .iter()
            .find(|e| e.kind == EventKind::Request)
            .expect("request event");
        assert_eq!(request.data["status"], 404);
    }

    #[tokio::test]
    async fn recover_leaves_successes_alone() {
        let sink = Arc::new(MemorySink::default());
        let chain = compose(
            vec![Arc::new(Recover::new(RequestLogger::from_arc(sink.clone())))],
            handler_fn(|_ctx| Box::pin(async { Ok(Response::new(StatusCode::Ok).body("fine")) })),
        );

        let response = chain.call(&mut ctx("/")).await.unwrap();
        assert_eq!(&response.body_ref()[..], b"fine");
        settle().await;
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn failing_sink_never_fails_the_request() {
        let sink = Arc::new(MemorySink {
            fail_lines: true,
            fail_events: true,
            ..MemorySink::default()
        });
        let logger = RequestLogger::from_arc(sink.clone());
        let chain = compose(
            vec![
                Arc::new(RequestLog::new(logger.clone())),
                Arc::new(Recover::new(logger)),
            ],
            handler_fn(|ctx| {
                Box::pin(async move {
                    if ctx.request().path() == "/fail" {
                        Err(HandlerError::internal("handler broke"))
                    } else {
                        Ok(Response::new(StatusCode::Ok).body("ok"))
                    }
                })
            }),
        );

        let (ok, failed) = tokio::join!(
            async { chain.call(&mut ctx("/ok")).await },
            async { chain.call(&mut ctx("/fail")).await },
        );
        assert_eq!(ok.unwrap().status(), StatusCode::Ok);
        assert_eq!(failed.unwrap().status(), StatusCode::InternalServerError);
        settle().await;
    }
}
