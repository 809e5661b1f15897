//! Log sinks: where request lines and events end up.

use crate::{error::BoxError, middleware::BoxFuture};

use super::Event;

/// Destination for request log lines and structured events.
///
/// Both operations may fail; [`RequestLogger`](super::RequestLogger) catches
/// and reports every failure, so a sink never has to worry about breaking a
/// request.
pub trait LogSink: Send + Sync {
    /// Write one human-readable line.
    fn log_line<'a>(&'a self, line: &'a str) -> BoxFuture<'a, Result<(), BoxError>>;

    /// Record one structured event.
    fn log_event<'a>(&'a self, event: &'a Event) -> BoxFuture<'a, Result<(), BoxError>>;
}

/// The default sink: lines and JSON-encoded events go to `tracing` at `INFO`
/// under the `strata::access` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log_line<'a>(&'a self, line: &'a str) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async move {
            tracing::info!(target: "strata::access", "{line}");
            Ok(())
        })
    }

    fn log_event<'a>(&'a self, event: &'a Event) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async move {
            let json = serde_json::to_string(event)?;
            tracing::info!(target: "strata::access", id = %event.id, kind = %event.kind, event = %json);
            Ok(())
        })
    }
}
