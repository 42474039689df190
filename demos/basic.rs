//! Minimal strata app: the built-in middleware, named routes, a panicking
//! route and the runtime stats endpoint.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/hello/alice
//!   curl http://localhost:3000/
//!   curl http://localhost:3000/boom
//!   curl http://localhost:3000/debug/vars
//!   curl http://localhost:3000/healthz

use std::sync::Arc;

use strata::middleware::{RecoveryWare, RuntimeStats, RuntimeWare, StatWare};
use strata::{Context, ContextKey, Request, ResponseWriter, Router, Server, health, param, reverse};

const GREETING: ContextKey = ContextKey::new("greeting");

#[tokio::main]
async fn main() -> Result<(), strata::Error> {
    tracing_subscriber::fmt::init();

    let runtime = Arc::new(RuntimeWare::new().ignore("/debug"));
    let base = Context::background().with_value(GREETING, "Hello");

    let app = Router::with_context(base)
        .middleware(RecoveryWare::new().print_stack(true))
        .middleware(StatWare::new().ignore("/healthz").ignore("/readyz"))
        .middleware(Arc::clone(&runtime))
        .get("/", "index", index)
        .get("/hello/:name", "hello", hello)
        .get("/boom", "boom", boom)
        .get("/debug/vars", "vars", RuntimeStats::new(runtime))
        .get("/healthz", "healthz", health::liveness)
        .get("/readyz", "readyz", health::readiness);

    Server::bind("0.0.0.0:3000")?.serve(app).await
}

// GET /
fn index(ctx: Context, w: &mut ResponseWriter<'_>, _req: &Request) -> Context {
    let link = reverse(&ctx, "hello", &[&"world"]);
    let _ = w.text(&format!("try {link}\n"));
    ctx
}

// GET /hello/:name
fn hello(ctx: Context, w: &mut ResponseWriter<'_>, _req: &Request) -> Context {
    let greeting = ctx.value::<&str>(&GREETING).copied().unwrap_or("Hi");
    let _ = w.text(&format!("{greeting}, {}!\n", param(&ctx, "name")));
    ctx
}

// GET /boom → 500 with the panic and its trace in the body
fn boom(_ctx: Context, _w: &mut ResponseWriter<'_>, _req: &Request) -> Context {
    panic!("boom");
}
