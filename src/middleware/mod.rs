//! Middleware pipeline — composable before/after request handler logic.
//!
//! This module defines the core types for building an ordered middleware stack
//! around a terminal [`Handler`]. Each middleware wraps the next layer, so it
//! can inspect the request, short-circuit with its own response, or decorate
//! the downstream response after the fact.
//!
//! ## Core types
//!
//! - [`Handler`] — the terminal request → response function.
//! - [`Middleware`] — trait implemented by all middleware.
//! - [`Next`] — cursor into the remaining middleware chain; call [`Next::run`] to
//!   advance to the next layer.
//! - [`Chain`] — the composed pipeline, built by [`compose`]. A `Chain` is
//!   itself a [`Handler`], so chains nest.
//! - [`handler_fn`] / [`middleware_fn`] — adapt closures into the traits.
//!
//! ## Ordering
//!
//! Code before `next.run(ctx)` runs in declared order; code after it runs in
//! reverse order:
//!
//! ```text
//! m1 pre → m2 pre → handler → m2 post → m1 post
//! ```

use std::{future::Future, pin::Pin, sync::Arc};

use crate::{Response, context::RequestContext, error::HandlerError};

/// A heap-allocated, type-erased future borrowing from `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The outcome of running a handler or middleware.
pub type HandlerResult = Result<Response, HandlerError>;

/// The terminal step of a pipeline: turns a request context into a response.
///
/// Implemented by [`Chain`], by [`Memoized`](crate::cache::Memoized) handlers,
/// and by anything built with [`handler_fn`].
pub trait Handler: Send + Sync {
    /// Produce a response for `ctx`.
    ///
    /// # Errors
    ///
    /// Any [`HandlerError`]; it propagates unchanged to the caller.
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, HandlerResult>;
}

impl<H> Handler for Arc<H>
where
    H: Handler + ?Sized,
{
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, HandlerResult> {
        (**self).call(ctx)
    }
}

/// The core trait for all middleware.
///
/// Implementors receive the [`RequestContext`] and a [`Next`] cursor. They may:
///
/// - **Pass through** — `next.run(ctx).await`.
/// - **Short-circuit** — return a response without calling `next`; nothing
///   downstream runs.
/// - **Decorate** — call `next.run(ctx).await`, then inspect or modify the
///   response and the context.
///
/// # Contract
///
/// - `next` is consumed by [`Next::run`], so it runs at most once.
/// - Errors from `next` arrive as `Err`; return them (with `?`) to keep
///   propagating, or turn them into a response to recover.
/// - Implementations must be `Send + Sync`; one instance serves every
///   concurrent request.
///
/// # Examples
///
/// ```
/// use strata::middleware::{BoxFuture, HandlerResult, Middleware, Next};
/// use strata::RequestContext;
///
/// struct PoweredBy;
///
/// impl Middleware for PoweredBy {
///     fn handle<'a>(
///         &'a self,
///         ctx: &'a mut RequestContext,
///         next: Next<'a>,
///     ) -> BoxFuture<'a, HandlerResult> {
///         Box::pin(async move {
///             let mut response = next.run(ctx).await?;
///             response.add_header("X-Powered-By", "strata");
///             Ok(response)
///         })
///     }
/// }
/// ```
pub trait Middleware: Send + Sync {
    /// Handle the request and optionally delegate to the rest of the chain.
    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult>;
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` only borrows the chain, so a request's traversal uses nothing but
/// request-local state and any number of requests can run the same [`Chain`]
/// concurrently.
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    handler: &'a dyn Handler,
    // Position of the middleware `run` will invoke.
    index: usize,
}

impl<'a> Next<'a> {
    fn new(middlewares: &'a [Arc<dyn Middleware>], handler: &'a dyn Handler) -> Self {
        Self {
            middlewares,
            handler,
            index: 0,
        }
    }

    /// Invokes the rest of the chain and returns its result.
    ///
    /// Runs the middleware at the cursor with a `Next` advanced by one, or the
    /// terminal handler once every middleware has been entered. The context is
    /// only reborrowed, so the caller can keep using it after the returned
    /// future completes.
    pub fn run<'b>(self, ctx: &'b mut RequestContext) -> BoxFuture<'b, HandlerResult>
    where
        'a: 'b,
    {
        match self.middlewares.get(self.index) {
            Some(middleware) => {
                let next = Next {
                    middlewares: self.middlewares,
                    handler: self.handler,
                    index: self.index + 1,
                };
                middleware.handle(ctx, next)
            }
            None => self.handler.call(ctx),
        }
    }

    /// Number of middleware still ahead of the terminal handler.
    pub fn remaining(&self) -> usize {
        self.middlewares.len().saturating_sub(self.index)
    }
}

/// An ordered middleware stack composed around a terminal handler.
///
/// Cloning is cheap: the stack and handler are shared behind [`Arc`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use strata::middleware::{compose, handler_fn, Handler, Middleware};
/// use strata::{Method, Request, RequestContext, Response, StatusCode};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let handler = handler_fn(|_ctx| Box::pin(async { Ok(Response::new(StatusCode::Ok).body("hi")) }));
/// let chain = compose(Vec::<Arc<dyn Middleware>>::new(), handler);
///
/// let mut ctx = RequestContext::new(Request::new(Method::Get, "/"));
/// let response = chain.call(&mut ctx).await.unwrap();
/// assert_eq!(&response.body_ref()[..], b"hi");
/// # }
/// ```
#[derive(Clone)]
pub struct Chain {
    middlewares: Arc<[Arc<dyn Middleware>]>,
    handler: Arc<dyn Handler>,
}

/// Composes `middlewares` (outermost first) around `handler`.
pub fn compose<H>(middlewares: Vec<Arc<dyn Middleware>>, handler: H) -> Chain
where
    H: Handler + 'static,
{
    Chain {
        middlewares: middlewares.into(),
        handler: Arc::new(handler),
    }
}

impl Chain {
    /// Number of middleware in the stack.
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Returns `true` if the chain is just the terminal handler.
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

impl Handler for Chain {
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, HandlerResult> {
        Next::new(&self.middlewares, self.handler.as_ref()).run(ctx)
    }
}

/// A [`Handler`] backed by a closure. Built with [`handler_fn`].
pub struct FnHandler<F>(F);

/// Adapts a closure returning a boxed future into a [`Handler`].
///
/// ```
/// use strata::middleware::handler_fn;
/// use strata::{Response, StatusCode};
///
/// let handler = handler_fn(|ctx| {
///     Box::pin(async move {
///         let path = ctx.request().path().to_owned();
///         Ok(Response::new(StatusCode::Ok).body(path))
///     })
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HandlerResult> + Send + Sync,
{
    FnHandler(f)
}

impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HandlerResult> + Send + Sync,
{
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, HandlerResult> {
        (self.0)(ctx)
    }
}

/// A [`Middleware`] backed by a closure. Built with [`middleware_fn`].
pub struct FnMiddleware<F>(F);

/// Adapts a closure returning a boxed future into a [`Middleware`].
pub fn middleware_fn<F>(f: F) -> FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut RequestContext, Next<'a>) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync,
{
    FnMiddleware(f)
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut RequestContext, Next<'a>) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync,
{
    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        (self.0)(ctx, next)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{Method, Request, StatusCode};

    const TRACE: &str = "trace";

    fn ctx() -> RequestContext {
        RequestContext::new(Request::new(Method::Get, "/trace"))
    }

    fn trace(ctx: &RequestContext) -> Vec<String> {
        ctx.state()
            .get::<Vec<String>>(TRACE)
            .cloned()
            .unwrap_or_default()
    }

    // Appends `<name>:pre` before and `<name>:post` after the rest of the chain.
    struct Tracer(&'static str);

    impl Middleware for Tracer {
        fn handle<'a>(
            &'a self,
            ctx: &'a mut RequestContext,
            next: Next<'a>,
        ) -> BoxFuture<'a, HandlerResult> {
            Box::pin(async move {
                ctx.state_mut()
                    .get_or_default::<Vec<String>>(TRACE)
                    .push(format!("{}:pre", self.0));
                tokio::task::yield_now().await;

                let result = next.run(ctx).await;

                ctx.state_mut()
                    .get_or_default::<Vec<String>>(TRACE)
                    .push(format!("{}:post", self.0));
                result
            })
        }
    }

    // Counts invocations and records itself in the trace.
    struct CountingHandler {
        calls: Arc<AtomicUsize>,
    }

    impl Handler for CountingHandler {
        fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, HandlerResult> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                ctx.state_mut()
                    .get_or_default::<Vec<String>>(TRACE)
                    .push("handler".to_owned());
                Ok(Response::new(StatusCode::Ok).body("from handler"))
            })
        }
    }

    struct ShortCircuit;

    impl Middleware for ShortCircuit {
        fn handle<'a>(
            &'a self,
            _ctx: &'a mut RequestContext,
            _next: Next<'a>,
        ) -> BoxFuture<'a, HandlerResult> {
            Box::pin(async { Ok(Response::new(StatusCode::Unauthorized).body("denied")) })
        }
    }

    fn counting() -> (CountingHandler, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            CountingHandler {
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }

    #[tokio::test]
    async fn nested_pre_and_post_order() {
        let (handler, calls) = counting();
        let chain = compose(
            vec![
                Arc::new(Tracer("m1")),
                Arc::new(Tracer("m2")),
                Arc::new(Tracer("m3")),
            ],
            handler,
        );

        let mut ctx = ctx();
        let response = chain.call(&mut ctx).await.unwrap();

        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            trace(&ctx),
            vec![
                "m1:pre", "m2:pre", "m3:pre", "handler", "m3:post", "m2:post", "m1:post"
            ]
        );
    }

    #[tokio::test]
    async fn short_circuit_skips_downstream() {
        let (handler, calls) = counting();
        let chain = compose(
            vec![
                Arc::new(Tracer("outer")),
                Arc::new(ShortCircuit),
                Arc::new(Tracer("inner")),
            ],
            handler,
        );

        let mut ctx = ctx();
        let response = chain.call(&mut ctx).await.unwrap();

        assert_eq!(response.status(), StatusCode::Unauthorized);
        assert_eq!(&response.body_ref()[..], b"denied");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(trace(&ctx), vec!["outer:pre", "outer:post"]);
    }

    #[tokio::test]
    async fn empty_chain_returns_handler_result() {
        let (handler, calls) = counting();
        let chain = compose(Vec::new(), handler);
        assert!(chain.is_empty());

        let mut ctx = ctx();
        let response = chain.call(&mut ctx).await.unwrap();
        assert_eq!(&response.body_ref()[..], b"from handler");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn outermost_return_value_wins() {
        let rewrite = middleware_fn(|ctx, next| {
            Box::pin(async move {
                next.run(ctx).await?;
                Ok(Response::new(StatusCode::Accepted).body("rewritten"))
            })
        });
        let (handler, _) = counting();
        let chain = compose(vec![Arc::new(rewrite), Arc::new(Tracer("m"))], handler);
        assert_eq!(chain.len(), 2);

        let response = chain.call(&mut ctx()).await.unwrap();
        assert_eq!(response.status(), StatusCode::Accepted);
        assert_eq!(&response.body_ref()[..], b"rewritten");
    }

    #[tokio::test]
    async fn errors_propagate_through_next() {
        let failing = handler_fn(|_ctx| {
            Box::pin(async { Err(HandlerError::status(StatusCode::Conflict, "stale write")) })
        });
        let chain = compose(vec![Arc::new(Tracer("m1")), Arc::new(Tracer("m2"))], failing);

        let mut ctx = ctx();
        let err = chain.call(&mut ctx).await.unwrap_err();

        assert_eq!(err.status_code(), StatusCode::Conflict);
        // post-logic still ran on the way out
        assert_eq!(trace(&ctx), vec!["m1:pre", "m2:pre", "m2:post", "m1:post"]);
    }

    #[tokio::test]
    async fn middleware_can_recover_from_error() {
        let recover = middleware_fn(|ctx, next| {
            Box::pin(async move {
                match next.run(ctx).await {
                    Ok(response) => Ok(response),
                    Err(err) => Ok(err.into_response()),
                }
            })
        });
        let failing = handler_fn(|_ctx| Box::pin(async { Err(HandlerError::internal("boom")) }));
        let chain = compose(vec![Arc::new(recover)], failing);

        let response = chain.call(&mut ctx()).await.unwrap();
        assert_eq!(response.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn later_middleware_reads_earlier_state() {
        let stamp = middleware_fn(|ctx, next| {
            Box::pin(async move {
                ctx.state_mut().insert("user", "ada".to_owned());
                next.run(ctx).await
            })
        });
        let echo = handler_fn(|ctx| {
            Box::pin(async move {
                let user = ctx.state().get::<String>("user").cloned().unwrap_or_default();
                Ok(Response::new(StatusCode::Ok).body(user))
            })
        });
        let chain = compose(vec![Arc::new(stamp)], echo);

        let response = chain.call(&mut ctx()).await.unwrap();
        assert_eq!(&response.body_ref()[..], b"ada");
    }

    #[tokio::test]
    async fn next_reports_remaining() {
        let probe = middleware_fn(|ctx, next| {
            Box::pin(async move {
                let remaining = next.remaining();
                let mut response = next.run(ctx).await?;
                response.add_header("X-Remaining", remaining.to_string());
                Ok(response)
            })
        });
        let (handler, _) = counting();
        let chain = compose(vec![Arc::new(probe), Arc::new(Tracer("a")), Arc::new(Tracer("b"))], handler);

        let response = chain.call(&mut ctx()).await.unwrap();
        assert_eq!(response.headers().get("x-remaining"), Some("2"));
    }

    #[tokio::test]
    async fn chains_nest_and_run_concurrently() {
        let (handler, calls) = counting();
        let inner = compose(vec![Arc::new(Tracer("inner"))], handler);
        let outer = compose(vec![Arc::new(Tracer("outer"))], inner.clone());

        let mut a = ctx();
        let mut b = ctx();
        let (ra, rb) = tokio::join!(outer.call(&mut a), outer.call(&mut b));

        assert!(ra.is_ok() && rb.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        for ctx in [&a, &b] {
            assert_eq!(
                trace(ctx),
                vec!["outer:pre", "inner:pre", "handler", "inner:post", "outer:post"]
            );
        }
    }
}
