//! Terminal handlers.
//!
//! A handler is the innermost layer of a route's onion. It receives the
//! request context, the response observer and the request, writes its
//! response, and hands back the (possibly extended) context:
//!
//! ```text
//! fn hello(ctx: Context, w: &mut ResponseWriter<'_>, req: &Request) -> Context
//! ```
//!
//! Any `fn` item or closure with that shape is a [`Handler`]. Structs that
//! need state implement the trait directly.
//!
//! # How handlers are stored
//!
//! The router holds handlers of many concrete types. Each one is boxed into
//! a `Terminal` adapter, which is a [`Middleware`] that never calls `next`,
//! and the adapter becomes the last layer of the route's onion:
//!
//! ```text
//! router.get("/hello/:name", "hello", hello)
//!        ↓
//! Arc::new(Terminal(hello))        ← Arc<dyn Middleware>
//!        ↓
//! Onion::new([recovery, stat, …, terminal])
//! ```

use http::header::{CONTENT_TYPE, HeaderValue};
use http::StatusCode;

use crate::context::Context;
use crate::middleware::{Middleware, Next};
use crate::request::Request;
use crate::response::{ContentType, ResponseWriter};

/// Implemented for every valid route handler.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, ctx: Context, w: &mut ResponseWriter<'_>, req: &Request) -> Context;
}

impl<F> Handler for F
where
    F: Fn(Context, &mut ResponseWriter<'_>, &Request) -> Context + Send + Sync + 'static,
{
    fn call(&self, ctx: Context, w: &mut ResponseWriter<'_>, req: &Request) -> Context {
        self(ctx, w, req)
    }
}

/// Adapts a [`Handler`] into the last layer of an onion. Ignores `next`.
pub(crate) struct Terminal<H>(pub(crate) H);

impl<H: Handler> Middleware for Terminal<H> {
    fn serve(&self, ctx: Context, w: &mut ResponseWriter<'_>, req: &Request, _next: Next<'_>) -> Context {
        self.0.call(ctx, w, req)
    }
}

/// Default not-found handler: `404` with a short plain-text body.
pub(crate) fn not_found(ctx: Context, w: &mut ResponseWriter<'_>, _req: &Request) -> Context {
    w.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(ContentType::Text.as_str()));
    w.set_status(StatusCode::NOT_FOUND);
    let _ = w.write(b"404 page not found\n");
    ctx
}
