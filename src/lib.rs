//! # strata
//!
//! A composable async middleware pipeline with response memoization and
//! request logging.
//!
//! Routing, transport, and static files live elsewhere: they hand this crate a
//! [`RequestContext`] and get a [`Response`] back.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::{sync::Arc, time::Duration};
//!
//! use strata::cache::{CacheOptions, ResponseCache};
//! use strata::logging::{Recover, RequestLog, RequestLogger};
//! use strata::middleware::{compose, handler_fn, Handler};
//! use strata::{Method, Request, RequestContext, Response, StatusCode};
//!
//! #[tokio::main]
//! async fn main() {
//!     let logger = RequestLogger::default();
//!     let cache = ResponseCache::new(CacheOptions::new().lifetime(Duration::from_secs(30)));
//!
//!     let app = compose(
//!         vec![
//!             Arc::new(RequestLog::new(logger.clone())),
//!             Arc::new(Recover::new(logger)),
//!         ],
//!         cache.memoize(handler_fn(|_ctx| {
//!             Box::pin(async { Ok(Response::new(StatusCode::Ok).body("Hello, World!")) })
//!         })),
//!     );
//!
//!     let mut ctx = RequestContext::new(Request::new(Method::Get, "/"));
//!     let response = app.call(&mut ctx).await.unwrap();
//!     assert_eq!(response.status(), StatusCode::Ok);
//! }
//! ```

pub mod cache;
pub mod context;
pub mod error;
pub mod http;
pub mod logging;
pub mod middleware;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use context::RequestContext;
pub use error::{BoxError, HandlerError};
pub use http::{Headers, Method, Request, Response, StatusCode};
