//! Runs a logged, memoized pipeline in-process.
//!
//! ```text
//! RUST_LOG=strata=debug cargo run --example cached_pipeline
//! ```

use std::{sync::Arc, time::Duration};

use serde_json::json;
use strata::cache::{CacheOptions, ResponseCache};
use strata::logging::{Recover, RequestLog, RequestLogger};
use strata::middleware::{Handler, compose, handler_fn, middleware_fn};
use strata::{HandlerError, Request, RequestContext, Response, StatusCode};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let logger = RequestLogger::default();
    let cache = ResponseCache::new(
        CacheOptions::new()
            .lifetime(Duration::from_secs(5))
            .debug(true),
    );

    let report = cache.memoize(handler_fn(|ctx| {
        Box::pin(async move {
            let Some(page) = ctx.data().get("page").and_then(|p| p.as_u64()) else {
                return Err(HandlerError::status(StatusCode::BadRequest, "missing page"));
            };
            // stand-in for an expensive render
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Response::new(StatusCode::Ok)
                .header("Content-Type", "application/json")
                .header("ETag", format!("\"report-{page}\""))
                .body(json!({ "page": page, "rows": page * 10 }).to_string()))
        })
    }));

    let served_by = middleware_fn(|ctx, next| {
        Box::pin(async move {
            let mut response = next.run(ctx).await?;
            response.set_header("X-Served-By", "cached_pipeline");
            Ok(response)
        })
    });

    let app = compose(
        vec![
            Arc::new(RequestLog::new(logger.clone())),
            Arc::new(Recover::new(logger)),
            Arc::new(served_by),
        ],
        report,
    );

    // Raw requests as a transport would hand them over, plus the route's page.
    let requests: [(&[u8], Option<u64>); 5] = [
        (b"GET /report HTTP/1.1\r\nHost: localhost\r\n\r\n", Some(1)),
        (b"GET /report HTTP/1.1\r\nHost: localhost\r\n\r\n", Some(1)),
        (
            b"GET /report HTTP/1.1\r\nHost: localhost\r\nIf-None-Match: \"report-1\"\r\n\r\n",
            Some(1),
        ),
        (b"GET /report HTTP/1.1\r\nHost: localhost\r\n\r\n", Some(2)),
        (b"GET /report HTTP/1.1\r\nHost: localhost\r\n\r\n", None),
    ];

    for (raw, page) in requests {
        let request = match Request::parse(raw) {
            Ok(request) => request,
            Err(err) => {
                eprintln!("skipping malformed request: {err}");
                continue;
            }
        };
        let url = request.url();

        let mut data = strata::context::RouteData::new();
        if let Some(page) = page {
            data.insert("page".to_owned(), json!(page));
        }

        let mut ctx = RequestContext::with_data(request, data);
        match app.call(&mut ctx).await {
            Ok(response) => println!(
                "{url} page={page:?} -> {} ({} bytes)",
                response.status(),
                response.body_ref().len()
            ),
            Err(err) => println!("{url} page={page:?} -> unhandled: {err}"),
        }

        // let the background cache store land before the next request
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
