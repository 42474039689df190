//! In-memory sink for driving routers and middleware without a socket.
//!
//! ```rust
//! use strata::{Context, Request, ResponseWriter, Router};
//! use strata::testing::Recorder;
//!
//! fn hello(ctx: Context, w: &mut ResponseWriter<'_>, _req: &Request) -> Context {
//!     let _ = w.text("hi");
//!     ctx
//! }
//!
//! let router = Router::new().get("/", "home", hello);
//! let mut rec = Recorder::new();
//! router.dispatch(&Request::get("/"), &mut rec);
//! assert_eq!(rec.body_str(), "hi");
//! ```

use std::borrow::Cow;
use std::io;

use http::{HeaderMap, StatusCode};

use crate::context::Context;
use crate::response::{ResponseSink, ResponseWriter};

/// Captures the head and body a handler produced.
#[derive(Debug, Default)]
pub struct Recorder {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
    heads: usize,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> Option<StatusCode> { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    pub fn body_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// How many times a head reached this sink. Anything but 1 is a bug.
    pub fn heads_sent(&self) -> usize {
        self.heads
    }
}

impl ResponseSink for Recorder {
    fn send_head(&mut self, status: StatusCode, headers: HeaderMap) {
        self.heads += 1;
        self.status = Some(status);
        self.headers = headers;
    }

    fn write_body(&mut self, chunk: &[u8]) -> io::Result<usize> {
        self.body.extend_from_slice(chunk);
        Ok(chunk.len())
    }
}

/// Runs `f` against a fresh writer over a [`Recorder`] and finishes the
/// response, returning what was captured and the context `f` produced.
pub fn record<F>(f: F) -> (Recorder, Context)
where
    F: FnOnce(&mut ResponseWriter<'_>) -> Context,
{
    let mut rec = Recorder::new();
    let mut w = ResponseWriter::new(&mut rec);
    let ctx = f(&mut w);
    w.finish();
    (rec, ctx)
}

/// Log capture for unit tests.
#[cfg(test)]
pub(crate) mod logs {
    use std::fmt;
    use std::sync::{Arc, Mutex};

    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};

    /// Collects `(level, message)` for every event emitted while installed.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<(Level, String)>>>);

    struct MessageVisitor(String);

    impl Visit for MessageVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{value:?}");
            }
        }
    }

    impl<S: Subscriber> Layer<S> for Captured {
        fn on_event(&self, event: &Event<'_>, _ctx: LayerContext<'_, S>) {
            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            self.0.lock().unwrap().push((*event.metadata().level(), visitor.0));
        }
    }

    /// Runs `f` with a capturing subscriber on this thread.
    pub(crate) fn capture<R>(f: impl FnOnce() -> R) -> (R, Vec<(Level, String)>) {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::registry().with(captured.clone());
        let out = tracing::subscriber::with_default(subscriber, f);
        let events = captured.0.lock().unwrap().clone();
        (out, events)
    }

    /// Events at exactly `level`.
    pub(crate) fn at(events: &[(Level, String)], level: Level) -> Vec<&str> {
        events.iter().filter(|(l, _)| *l == level).map(|(_, m)| m.as_str()).collect()
    }
}
