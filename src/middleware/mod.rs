//! Middleware onion.
//!
//! Middleware is the right place for cross-cutting concerns: panic
//! isolation, access logging, metrics, header and context augmentation.
//! Each route owns one [`Onion`]: its middleware list, in registration
//! order, with the route's handler as the innermost layer.
//!
//! ```text
//!  request ──► recovery ──► stat ──► auth ──► handler
//!  response ◄─ recovery ◄── stat ◄── auth ◄───┘
//! ```
//!
//! The first middleware registered is the outermost layer: it runs first on
//! the way in and last on the way out, so it sees the final status and size
//! that every inner layer produced.
//!
//! A layer continues the chain by calling [`Next::run`], optionally with a
//! derived context. Returning without calling it short-circuits: no inner
//! layer and no handler runs, and the response is whatever this layer wrote.
//!
//! `Next` is `Copy`, so nothing stops a layer from calling it twice. Doing so
//! runs every inner layer and the handler twice against the same response;
//! the outcome is unspecified and the built-ins never do it.

mod recovery;
mod runtime;
mod stat;

use std::sync::Arc;

use crate::context::Context;
use crate::request::Request;
use crate::response::ResponseWriter;

pub use recovery::RecoveryWare;
pub use runtime::{RuntimeSnapshot, RuntimeStats, RuntimeWare};
pub use stat::StatWare;

/// One layer of the onion.
pub trait Middleware: Send + Sync + 'static {
    /// Handles the request, calling `next` zero or one times.
    fn serve(&self, ctx: Context, w: &mut ResponseWriter<'_>, req: &Request, next: Next<'_>) -> Context;
}

impl<M: Middleware + ?Sized> Middleware for Arc<M> {
    fn serve(&self, ctx: Context, w: &mut ResponseWriter<'_>, req: &Request, next: Next<'_>) -> Context {
        (**self).serve(ctx, w, req, next)
    }
}

/// A middleware built from a function. See [`from_fn`].
pub struct MiddleFn<F>(F);

/// Adapts a function or closure into a [`Middleware`].
///
/// ```rust
/// use strata::StatusCode;
/// use strata::middleware::from_fn;
///
/// let deny_anonymous = from_fn(|ctx, w, req, next| {
///     if req.header("authorization").is_none() {
///         w.set_status(StatusCode::UNAUTHORIZED);
///         return ctx;
///     }
///     next.run(ctx, w, req)
/// });
/// ```
pub fn from_fn<F>(f: F) -> MiddleFn<F>
where
    F: Fn(Context, &mut ResponseWriter<'_>, &Request, Next<'_>) -> Context + Send + Sync + 'static,
{
    MiddleFn(f)
}

impl<F> Middleware for MiddleFn<F>
where
    F: Fn(Context, &mut ResponseWriter<'_>, &Request, Next<'_>) -> Context + Send + Sync + 'static,
{
    fn serve(&self, ctx: Context, w: &mut ResponseWriter<'_>, req: &Request, next: Next<'_>) -> Context {
        (self.0)(ctx, w, req, next)
    }
}

// ── Onion ─────────────────────────────────────────────────────────────────────

enum Layer {
    Ware { ware: Arc<dyn Middleware>, next: Box<Layer> },
    /// Sentinel past the innermost layer: hands its context straight back.
    Hollow,
}

impl Layer {
    fn serve(&self, ctx: Context, w: &mut ResponseWriter<'_>, req: &Request) -> Context {
        match self {
            Layer::Ware { ware, next } => ware.serve(ctx, w, req, Next { layer: next }),
            Layer::Hollow => ctx,
        }
    }
}

/// An immutable chain of middleware, composed once and shared by every
/// request on a route.
pub struct Onion {
    outer: Layer,
    depth: usize,
}

impl Onion {
    /// Composes `wares` front to back: the first element is the outermost layer.
    pub fn new(wares: impl IntoIterator<Item = Arc<dyn Middleware>>) -> Self {
        let wares: Vec<_> = wares.into_iter().collect();
        let depth = wares.len();
        let outer = wares
            .into_iter()
            .rev()
            .fold(Layer::Hollow, |next, ware| Layer::Ware { ware, next: Box::new(next) });
        Self { outer, depth }
    }

    /// Runs the request through every layer.
    pub fn serve(&self, ctx: Context, w: &mut ResponseWriter<'_>, req: &Request) -> Context {
        self.outer.serve(ctx, w, req)
    }

    /// Number of layers, the sentinel excluded.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Handle on the layers inside the current one.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    layer: &'a Layer,
}

impl Next<'_> {
    /// Continues the chain with `ctx`, returning the context the inner
    /// layers handed back.
    pub fn run(self, ctx: Context, w: &mut ResponseWriter<'_>, req: &Request) -> Context {
        self.layer.serve(ctx, w, req)
    }
}

/// Whether `path` begins with any of `prefixes`.
pub(crate) fn has_prefix(prefixes: &[String], path: &str) -> bool {
    prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use http::StatusCode;

    use super::*;
    use crate::context::ContextKey;
    use crate::handler::Terminal;
    use crate::testing::record;

    type Trace = Arc<Mutex<Vec<String>>>;

    fn tracing_ware(name: &'static str, trace: &Trace) -> Arc<dyn Middleware> {
        let trace = Arc::clone(trace);
        Arc::new(from_fn(move |ctx, w, req, next| {
            trace.lock().unwrap().push(format!("{name} in"));
            let ctx = next.run(ctx, w, req);
            trace.lock().unwrap().push(format!("{name} out {}", w.status().as_u16()));
            ctx
        }))
    }

    fn terminal(trace: &Trace) -> Arc<dyn Middleware> {
        let trace = Arc::clone(trace);
        Arc::new(from_fn(move |ctx, w, _req, _next| {
            trace.lock().unwrap().push("handler".to_owned());
            w.set_status(StatusCode::CREATED);
            ctx
        }))
    }

    #[test]
    fn layers_run_in_registration_order_and_unwind_in_reverse() {
        let trace = Trace::default();
        let onion = Onion::new([
            tracing_ware("a", &trace),
            tracing_ware("b", &trace),
            tracing_ware("c", &trace),
            terminal(&trace),
        ]);
        assert_eq!(onion.depth(), 4);

        let (rec, _) = record(|w| onion.serve(Context::background(), w, &Request::get("/")));

        assert_eq!(rec.status(), Some(StatusCode::CREATED));
        assert_eq!(*trace.lock().unwrap(), [
            "a in", "b in", "c in", "handler", "c out 201", "b out 201", "a out 201",
        ]);
    }

    #[test]
    fn short_circuit_skips_inner_layers_and_handler() {
        let trace = Trace::default();
        let deny: Arc<dyn Middleware> = Arc::new(from_fn(|ctx, w, _req, _next| {
            w.set_status(StatusCode::UNAUTHORIZED);
            ctx
        }));
        let onion = Onion::new([tracing_ware("outer", &trace), deny, tracing_ware("inner", &trace), terminal(&trace)]);

        let (rec, _) = record(|w| onion.serve(Context::background(), w, &Request::get("/")));

        assert_eq!(rec.status(), Some(StatusCode::UNAUTHORIZED));
        assert!(rec.body().is_empty());
        assert_eq!(*trace.lock().unwrap(), ["outer in", "outer out 401"]);
    }

    #[test]
    fn context_flows_inward_and_back_out() {
        const USER: ContextKey = ContextKey::new("user");
        const SEEN: ContextKey = ContextKey::new("seen");

        fn remember_user(ctx: Context, _w: &mut ResponseWriter<'_>, _req: &Request) -> Context {
            let user = *ctx.value::<&str>(&USER).unwrap_or(&"nobody");
            ctx.with_value(SEEN, user)
        }

        let login: Arc<dyn Middleware> =
            Arc::new(from_fn(|ctx: Context, w, req, next| next.run(ctx.with_value(USER, "alice"), w, req)));
        let onion = Onion::new([login, Arc::new(Terminal(remember_user))]);

        let base = Context::background();
        let (_, ctx) = record(|w| onion.serve(base.clone(), w, &Request::get("/")));

        assert_eq!(ctx.value::<&str>(&SEEN), Some(&"alice"));
        assert!(!base.contains(&USER));
    }

    #[test]
    fn empty_onion_is_a_pass_through() {
        let onion = Onion::new(Vec::new());
        let ctx = Context::background().with_value(ContextKey::new("k"), 1_u8);

        let (rec, out) = record(|w| onion.serve(ctx.clone(), w, &Request::get("/")));

        assert_eq!(out.value::<u8>(&ContextKey::new("k")), Some(&1));
        assert_eq!(rec.status(), Some(StatusCode::OK));
    }

    #[test]
    fn prefixes_match_from_the_start_of_the_path() {
        let prefixes = vec!["/static".to_owned(), "/healthz".to_owned()];
        assert!(has_prefix(&prefixes, "/static/app.js"));
        assert!(!has_prefix(&prefixes, "/api/static"));
        assert!(!has_prefix(&[], "/anything"));
    }
}
