//! Panic isolation.
//!
//! [`RecoveryWare`] runs the rest of the onion inside
//! [`std::panic::catch_unwind`]. A panicking handler becomes a `500` response
//! and an error log entry instead of a dead connection.
//!
//! By the time `catch_unwind` returns, the stack that panicked is gone, so the
//! trace is captured earlier: a process-wide panic hook, installed the first
//! time a `RecoveryWare` is built, records a backtrace into a thread-local
//! whenever the panicking thread is inside a recovery region. Panics outside
//! any region go to whichever hook was installed before.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use http::StatusCode;
use tracing::error;

use crate::config::RecoveryConfig;
use crate::context::Context;
use crate::middleware::{Middleware, Next};
use crate::request::Request;
use crate::response::ResponseWriter;

/// Upper bound on the captured trace, in bytes.
const STACK_SIZE: usize = 8 * 1024;

/// Frame that marks the boundary between the request and the worker thread.
const BOUNDARY_FRAME: &str = "panic::catch_unwind";

thread_local! {
    static REGIONS: Cell<usize> = const { Cell::new(0) };
    static CAPTURED: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

fn install_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if REGIONS.with(Cell::get) == 0 {
                previous(info);
                return;
            }
            let trace = match info.location() {
                Some(loc) => format!("panicked at {loc}\n{}", Backtrace::force_capture()),
                None => Backtrace::force_capture().to_string(),
            };
            CAPTURED.with(|slot| *slot.borrow_mut() = Some(trace));
        }));
    });
}

/// Marks the current thread as inside a recovery region until dropped.
struct Region;

impl Region {
    fn enter() -> Self {
        REGIONS.with(|n| n.set(n.get() + 1));
        CAPTURED.with(|slot| slot.borrow_mut().take());
        Region
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        REGIONS.with(|n| n.set(n.get().saturating_sub(1)));
    }
}

/// Turns panics anywhere inside it into `500 Internal Server Error`.
///
/// Register it first so that it wraps every other layer.
///
/// * `print_stack`: also write the panic message and trace into the
///   response body. Useful in development; leaks internals in production.
/// * `stack_all`: keep the whole thread's trace, including the worker
///   pool frames outside the request, instead of cutting it at the recovery
///   boundary.
///
/// The cut is best effort. It looks for the `catch_unwind` frame by name, and
/// optimised builds may inline that frame away or strip symbols; the whole
/// trace is then kept, as with `stack_all`. Either way the trace is logged at
/// error level and never exceeds 8 KiB.
#[derive(Debug, Clone)]
pub struct RecoveryWare {
    print_stack: bool,
    stack_all: bool,
    stack_size: usize,
}

impl RecoveryWare {
    pub fn new() -> Self {
        install_hook();
        Self { print_stack: false, stack_all: false, stack_size: STACK_SIZE }
    }

    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self::new().print_stack(config.print_stack).stack_all(config.stack_all)
    }

    pub fn print_stack(mut self, yes: bool) -> Self {
        self.print_stack = yes;
        self
    }

    pub fn stack_all(mut self, yes: bool) -> Self {
        self.stack_all = yes;
        self
    }

    fn take_stack(&self) -> String {
        let trace = CAPTURED
            .with(|slot| slot.borrow_mut().take())
            .unwrap_or_else(|| Backtrace::force_capture().to_string());
        let trace = if self.stack_all { trace } else { cut_at_boundary(trace) };
        truncate(trace, self.stack_size)
    }
}

impl Default for RecoveryWare {
    fn default() -> Self { Self::new() }
}

impl Middleware for RecoveryWare {
    fn serve(&self, ctx: Context, w: &mut ResponseWriter<'_>, req: &Request, next: Next<'_>) -> Context {
        let region = Region::enter();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| next.run(ctx.clone(), w, req)));
        let payload = match outcome {
            Ok(ctx) => return ctx,
            Err(payload) => payload,
        };

        let fault = describe(payload.as_ref());
        let stack = self.take_stack();
        drop(region);

        error!(method = %req.method(), path = req.path(), "PANIC: {fault}\n{stack}");
        w.set_status(StatusCode::INTERNAL_SERVER_ERROR);
        if self.print_stack {
            let _ = write!(w, "PANIC: {fault}\n{stack}");
        }
        ctx
    }
}

/// The panic message, when the payload is one of the two string types
/// `panic!` produces.
fn describe(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Drops every frame from the recovery boundary outwards. A trace without
/// the boundary frame comes back whole.
fn cut_at_boundary(trace: String) -> String {
    let mut kept = String::with_capacity(trace.len());
    for line in trace.lines() {
        if line.contains(BOUNDARY_FRAME) {
            break;
        }
        kept.push_str(line);
        kept.push('\n');
    }
    kept
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::middleware::{Onion, from_fn};
    use crate::testing::record;

    fn boom(_ctx: Context, _w: &mut ResponseWriter<'_>, _req: &Request) -> Context {
        panic!("boom");
    }

    fn onion(recovery: RecoveryWare) -> Onion {
        Onion::new([
            Arc::new(recovery) as Arc<dyn Middleware>,
            Arc::new(crate::handler::Terminal(boom)),
        ])
    }

    #[test]
    fn panic_becomes_500_with_stack_in_body() {
        let onion = onion(RecoveryWare::new().print_stack(true));
        let (rec, _) = record(|w| onion.serve(Context::background(), w, &Request::get("/")));

        assert_eq!(rec.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(rec.body_str().starts_with("PANIC: boom\n"));
        assert!(rec.body().len() <= "PANIC: boom\n".len() + STACK_SIZE);
    }

    #[test]
    fn panic_body_stays_empty_without_print_stack() {
        let onion = onion(RecoveryWare::new());
        let (rec, _) = record(|w| onion.serve(Context::background(), w, &Request::get("/")));

        assert_eq!(rec.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(rec.body().is_empty());
    }

    #[test]
    fn status_already_sent_is_kept() {
        let late_panic: Arc<dyn Middleware> = Arc::new(from_fn(|_ctx, w, _req, _next| {
            let _ = w.text("partial");
            panic!("after write");
        }));
        let onion = Onion::new([Arc::new(RecoveryWare::new()) as Arc<dyn Middleware>, late_panic]);
        let (rec, _) = record(|w| onion.serve(Context::background(), w, &Request::get("/")));

        assert_eq!(rec.status(), Some(StatusCode::OK));
        assert_eq!(rec.body_str(), "partial");
        assert_eq!(rec.heads_sent(), 1);
    }

    #[test]
    fn returns_the_incoming_context_after_a_panic() {
        let key = crate::context::ContextKey::new("k");
        let ctx = Context::background().with_value(key.clone(), 3_u8);
        let onion = onion(RecoveryWare::new());
        let (_, out) = record(|w| onion.serve(ctx.clone(), w, &Request::get("/")));

        assert_eq!(out.value::<u8>(&key), Some(&3));
    }

    #[test]
    fn region_counter_unwinds_with_the_guard() {
        let onion = onion(RecoveryWare::new());
        let _ = record(|w| onion.serve(Context::background(), w, &Request::get("/")));

        assert_eq!(REGIONS.with(Cell::get), 0);
    }

    #[test]
    fn non_string_payloads_are_described() {
        assert_eq!(describe(&42_u32), "non-string panic payload");
        assert_eq!(describe(&"static"), "static");
        assert_eq!(describe(&String::from("owned")), "owned");
    }

    #[test]
    fn trace_is_cut_at_boundary_and_capped() {
        let trace = "0: handler\n1: std::panic::catch_unwind\n2: tokio worker\n".to_owned();
        assert_eq!(cut_at_boundary(trace), "0: handler\n");

        let long = "é".repeat(10);
        let cut = truncate(long, 5);
        assert_eq!(cut, "éé");
    }

    #[test]
    fn trace_without_boundary_frame_is_kept_whole() {
        let trace = "0: handler\n1: <inlined>\n2: tokio worker\n".to_owned();
        assert_eq!(cut_at_boundary(trace.clone()), trace);
    }
}
