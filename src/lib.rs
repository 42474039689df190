//! # strata
//!
//! A layered HTTP request pipeline: an onion of middleware around a
//! terminal handler, threaded by an immutable request context.
//!
//! ## The model
//!
//! Every route owns one [`middleware::Onion`]. A request enters the
//! outermost layer, which may act, call the next layer, and act again on the
//! way out. Each layer receives a [`Context`] and returns one; values added by
//! an inner layer travel back out to the layers that wrapped it. The
//! [`ResponseWriter`] records what reaches the client (the latched status and
//! the byte count) so outer layers can observe the outcome.
//!
//! ```text
//!   request ──▶ Recovery ──▶ Stat ──▶ Runtime ──▶ handler
//!   response ◀─────────────────────────────────────┘
//! ```
//!
//! Three layers ship built in:
//!
//! - [`RecoveryWare`](middleware::RecoveryWare) turns a panic into a `500`
//!   and logs it with a backtrace.
//! - [`StatWare`](middleware::StatWare) logs one line per request.
//! - [`RuntimeWare`](middleware::RuntimeWare) keeps rolling counters and
//!   latency samples, and exports them through `metrics`.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use strata::middleware::{RecoveryWare, StatWare};
//! use strata::{Context, Request, ResponseWriter, Router, Server, param, reverse};
//!
//! fn user(ctx: Context, w: &mut ResponseWriter<'_>, _req: &Request) -> Context {
//!     let _ = w.text(&format!("user {}", param(&ctx, "id")));
//!     ctx
//! }
//!
//! fn home(ctx: Context, w: &mut ResponseWriter<'_>, _req: &Request) -> Context {
//!     let _ = w.text(&reverse(&ctx, "user", &[&42]));
//!     ctx
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), strata::Error> {
//!     let app = Router::new()
//!         .middleware(RecoveryWare::new())
//!         .middleware(StatWare::new())
//!         .get("/", "home", home)
//!         .get("/users/:id", "user", user);
//!
//!     Server::bind("0.0.0.0:3000")?.serve(app).await
//! }
//! ```

mod context;
mod error;
mod handler;
mod request;
mod response;
mod reverse;
mod router;
mod server;

pub mod config;
pub mod health;
pub mod middleware;
pub mod testing;

pub use context::{Context, ContextKey, ValueError};
pub use error::Error;
pub use handler::Handler;
pub use http::{Method, StatusCode};
pub use request::Request;
pub use response::{ContentType, ResponseSink, ResponseWriter};
pub use reverse::{FALLBACK_PATH, NamedRoutes, clean_path};
pub use router::{Params, Router, assets, param, params, reverse};
pub use server::{Server, serve_with_shutdown};
