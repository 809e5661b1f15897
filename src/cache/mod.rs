//! Response memoization: a key-addressed, time-bounded response cache.
//!
//! [`ResponseCache::memoize`] wraps a [`Handler`] so repeated requests for the
//! same URL and route data are answered from a stored response instead of
//! re-running the handler.
//!
//! - Keys are `"{url}-{route data as JSON}"`, so differing route parameters
//!   (pagination, ids) never share an entry.
//! - Entries expire lazily: validity is checked at read time against the
//!   configured lifetime. Nothing sweeps the store.
//! - A request whose `If-None-Match` header contains the stored `ETag` gets a
//!   bodiless `304 Not Modified` carrying the stored headers.
//! - On a miss the fresh response is stored by a spawned task, so the caller
//!   never waits on the cache.
//!
//! Concurrent misses for the same cold key are not coalesced: each one runs
//! the handler, and the last store wins.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use strata::cache::{CacheOptions, ResponseCache};
//! use strata::middleware::{handler_fn, Handler};
//! use strata::{Method, Request, RequestContext, Response, StatusCode};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = ResponseCache::new(CacheOptions::new().lifetime(Duration::from_secs(60)));
//! let handler = cache.memoize(handler_fn(|_ctx| {
//!     Box::pin(async { Ok(Response::new(StatusCode::Ok).header("ETag", "\"v1\"").body("expensive")) })
//! }));
//!
//! let mut ctx = RequestContext::new(Request::new(Method::Get, "/report"));
//! let response = handler.call(&mut ctx).await.unwrap();
//! assert_eq!(&response.body_ref()[..], b"expensive");
//! # }
//! ```

use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::{Deserialize, Deserializer};
use tokio::{sync::RwLock, time::Instant};
use tracing::{debug, trace, warn};

use crate::{
    Headers, Response, StatusCode,
    context::RequestContext,
    middleware::{BoxFuture, Handler, HandlerResult},
};

/// Cache configuration.
///
/// Deserializes from `{ "lifetime": <milliseconds>, "debug": <bool> }`; both
/// fields are optional. A lifetime of `0` means unbounded, the same as leaving
/// it out.
///
/// ```
/// use std::time::Duration;
/// use strata::cache::CacheOptions;
///
/// let options: CacheOptions = serde_json::from_str(r#"{ "lifetime": 1500 }"#).unwrap();
/// assert_eq!(options.lifetime, Some(Duration::from_millis(1500)));
/// assert!(!options.debug);
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// How long an entry stays valid after it is stored. `None` (or a zero
    /// duration) never expires.
    #[serde(deserialize_with = "deserialize_millis")]
    pub lifetime: Option<Duration>,
    /// Emit a `debug` record for every hit, miss, and store.
    pub debug: bool,
}

impl CacheOptions {
    /// Unbounded lifetime, debug records off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long stored responses stay valid.
    ///
    /// # Arguments
    ///
    /// - `lifetime` — time from store to expiry. [`Duration::ZERO`] clears the
    ///   bound, so entries never expire.
    #[must_use]
    pub fn lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = bounded(lifetime);
        self
    }

    /// Turns `debug`-level hit, miss, and store records on or off. With it
    /// off they are emitted at `trace`.
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

fn deserialize_millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?
        .map(Duration::from_millis)
        .and_then(bounded))
}

// A zero lifetime is treated as no lifetime at all.
fn bounded(lifetime: Duration) -> Option<Duration> {
    (!lifetime.is_zero()).then_some(lifetime)
}

/// One stored response.
#[derive(Debug, Clone)]
pub struct CacheItem {
    pub key: String,
    /// The stored response. Only ever handed out as a clone.
    pub value: Response,
    /// When the entry was stored.
    pub dob: Instant,
}

impl CacheItem {
    fn is_valid(&self, lifetime: Option<Duration>) -> bool {
        match lifetime {
            Some(lifetime) if !lifetime.is_zero() => self.dob.elapsed() < lifetime,
            _ => true,
        }
    }
}

/// A shared response cache.
///
/// Cloning yields another handle to the same store, so one cache can
/// memoize several handlers.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    entries: Arc<RwLock<HashMap<String, CacheItem>>>,
    options: Arc<CacheOptions>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(CacheOptions::default())
    }
}

impl ResponseCache {
    /// Creates an empty cache.
    ///
    /// # Arguments
    ///
    /// - `options` — lifetime and debug settings shared by every handler this
    ///   cache memoizes.
    pub fn new(options: CacheOptions) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            options: Arc::new(options),
        }
    }

    /// Returns the options this cache was created with.
    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Wraps `handler` so its responses are served from this cache.
    ///
    /// # Returns
    ///
    /// A [`Memoized`] handler. It shares this cache's store, so entries it
    /// writes are visible through [`len`](Self::len) and
    /// [`invalidate`](Self::invalidate).
    pub fn memoize<H>(&self, handler: H) -> Memoized<H>
    where
        H: Handler,
    {
        Memoized {
            cache: self.clone(),
            handler,
        }
    }

    /// Derives the cache key for `ctx`, or `None` if its route data cannot be
    /// serialized.
    pub fn key_for(ctx: &RequestContext) -> Option<String> {
        match serde_json::to_string(ctx.data()) {
            Ok(data) => Some(format!("{}-{}", ctx.request().url(), data)),
            Err(e) => {
                warn!(url = %ctx.request().url(), error = %e, "route data not serializable, bypassing cache");
                None
            }
        }
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drops the entry for `key`. Returns `true` if one was stored.
    pub async fn invalidate(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Drops every entry.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    // Answers from the store, or `None` when there is no valid entry.
    async fn lookup(&self, key: &str, request_headers: &Headers) -> Option<Response> {
        let entries = self.entries.read().await;
        let item = entries
            .get(key)
            .filter(|item| item.is_valid(self.options.lifetime))?;

        // Repeated `If-None-Match` fields count as one comma-joined list.
        let not_modified = item
            .value
            .headers()
            .get("etag")
            .filter(|etag| !etag.is_empty())
            .is_some_and(|etag| {
                request_headers
                    .get_all("if-none-match")
                    .any(|candidates| candidates.contains(etag))
            });
        if not_modified {
            self.record(key, "hit: etag matched, not modified");
            return Some(
                Response::new(StatusCode::NotModified).with_headers(item.value.headers().clone()),
            );
        }

        self.record(key, "hit");
        Some(item.value.clone())
    }

    // Replaces the entry for `key` on a background task; the caller does not wait.
    fn store(&self, key: String, value: Response) {
        let entries = Arc::clone(&self.entries);
        let debug = self.options.debug;

        tokio::spawn(async move {
            let mut entries = entries.write().await;
            if debug {
                debug!(key = %key, replaced = entries.contains_key(&key), "cache store");
            }
            let item = CacheItem {
                key: key.clone(),
                value,
                dob: Instant::now(),
            };
            entries.insert(key, item);
        });
    }

    fn record(&self, key: &str, outcome: &'static str) {
        if self.options.debug {
            debug!(key = %key, outcome, "cache lookup");
        } else {
            trace!(key = %key, outcome, "cache lookup");
        }
    }
}

/// A handler whose responses are memoized by a [`ResponseCache`].
pub struct Memoized<H> {
    cache: ResponseCache,
    handler: H,
}

impl<H> Memoized<H> {
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }
}

impl<H> Handler for Memoized<H>
where
    H: Handler,
{
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let Some(key) = ResponseCache::key_for(ctx) else {
                return self.handler.call(ctx).await;
            };

            if let Some(response) = self.cache.lookup(&key, ctx.request().headers()).await {
                return Ok(response);
            }

            self.cache.record(&key, "miss");
            let response = self.handler.call(ctx).await?;
            self.cache.store(key, response.clone());
            Ok(response)
        })
    }
}
