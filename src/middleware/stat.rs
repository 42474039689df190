//! Access log.

use std::time::Instant;

use tracing::{info, warn};

use crate::config::StatConfig;
use crate::context::Context;
use crate::middleware::{Middleware, Next, has_prefix};
use crate::request::Request;
use crate::response::ResponseWriter;

/// Logs one line per request: method, path, status, body size, duration.
///
/// Client and server errors (status ≥ 400) are logged at `WARN`, always.
/// Everything else is logged at `INFO` unless the path starts with one of the
/// ignored prefixes, which keeps health checks and static files out of the log.
#[derive(Debug, Clone, Default)]
pub struct StatWare {
    ignored_prefixes: Vec<String>,
}

impl StatWare {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &StatConfig) -> Self {
        Self { ignored_prefixes: config.ignored_prefixes.clone() }
    }

    /// Skips successful requests whose path starts with `prefix`.
    pub fn ignore(mut self, prefix: impl Into<String>) -> Self {
        self.ignored_prefixes.push(prefix.into());
        self
    }
}

impl Middleware for StatWare {
    fn serve(&self, ctx: Context, w: &mut ResponseWriter<'_>, req: &Request, next: Next<'_>) -> Context {
        let start = Instant::now();
        let ctx = next.run(ctx, w, req);
        let elapsed = start.elapsed();
        let status = w.status().as_u16();

        if status >= 400 {
            warn!(
                method = %req.method(), path = req.path(), status, size = w.size(), duration = ?elapsed,
                "request failed"
            );
        } else if !has_prefix(&self.ignored_prefixes, req.path()) {
            info!(
                method = %req.method(), path = req.path(), status, size = w.size(), duration = ?elapsed,
                "request served"
            );
        }
        ctx
    }
}
