//! Per-request context — the record every middleware and handler shares.
//!
//! A [`RequestContext`] holds three things:
//!
//! - the immutable inbound [`Request`],
//! - route data supplied once at dispatch ([`RouteData`], read-only),
//! - a string-keyed [`State`] bag middleware use to pass values along the
//!   chain (timings, principals, traces).

use std::{any::Any, collections::HashMap};

use serde_json::Value;

use crate::Request;

/// Route-supplied parameters.
///
/// A JSON object with sorted keys, so two contexts with the same parameters
/// always serialize to the same string.
pub type RouteData = serde_json::Map<String, Value>;

/// Type-erased, string-keyed per-request state.
///
/// Each middleware owns the keys it writes. Nothing stops a later middleware
/// from reading (or overwriting) an earlier one's key.
#[derive(Default)]
pub struct State {
    map: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl State {
    /// Create a new empty state map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value under `key`, replacing whatever was there
    pub fn insert<T>(&mut self, key: impl Into<String>, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(key.into(), Box::new(value));
    }

    /// Get the value under `key` if it exists and has type `T`
    pub fn get<T>(&self, key: &str) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(key)
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Get a mutable reference to the value under `key` if it has type `T`
    pub fn get_mut<T>(&mut self, key: &str) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get_mut(key)
            .and_then(|value| value.downcast_mut::<T>())
    }

    /// Get the value under `key`, inserting `T::default()` first if the key
    /// is absent or holds a different type
    pub fn get_or_default<T>(&mut self, key: &str) -> &mut T
    where
        T: Default + Send + Sync + 'static,
    {
        let slot = self
            .map
            .entry(key.to_owned())
            .or_insert_with(|| Box::new(T::default()));
        if !slot.is::<T>() {
            *slot = Box::new(T::default());
        }
        match slot.downcast_mut::<T>() {
            Some(value) => value,
            None => unreachable!("slot was just checked to hold T"),
        }
    }

    /// Remove the value under `key` if it has type `T`
    pub fn remove<T>(&mut self, key: &str) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        if !self.map.get(key)?.is::<T>() {
            return None;
        }
        self.map
            .remove(key)
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    /// Returns `true` if something is stored under `key`
    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Per-request context threaded through the middleware chain.
///
/// Created by whoever matched the route, borrowed mutably by the chain for the
/// duration of the request, and dropped once the response is out.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use strata::{Method, Request, RequestContext};
///
/// let data = json!({ "page": 2 }).as_object().cloned().unwrap_or_default();
/// let mut ctx = RequestContext::with_data(Request::new(Method::Get, "/posts"), data);
///
/// ctx.state_mut().insert("user", String::from("ada"));
/// assert_eq!(ctx.state().get::<String>("user").map(String::as_str), Some("ada"));
/// assert_eq!(ctx.data()["page"], 2);
/// ```
pub struct RequestContext {
    request: Request,
    data: RouteData,
    state: State,
}

impl RequestContext {
    /// Create a context with no route data
    pub fn new(request: Request) -> Self {
        Self::with_data(request, RouteData::new())
    }

    /// Create a context carrying the route's parameters
    pub fn with_data(request: Request, data: RouteData) -> Self {
        Self {
            request,
            data,
            state: State::new(),
        }
    }

    /// Returns the inbound request. It cannot be changed once the context
    /// exists.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Returns the route data supplied at construction.
    ///
    /// This is what the response cache serializes into its keys, next to the
    /// request URL.
    pub fn data(&self) -> &RouteData {
        &self.data
    }

    /// Returns the per-request state bag.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Returns the per-request state bag for writing.
    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }
}
