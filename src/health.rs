//! Kubernetes health-check handlers.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/healthz` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/readyz` | Can the pod serve traffic? Failure → pulled from load-balancer. |
//!
//! ```rust,no_run
//! use strata::{Router, health};
//!
//! let app = Router::new()
//!     .get("/healthz", "healthz", health::liveness)
//!     .get("/readyz", "readyz", health::readiness);
//! ```
//!
//! Gate readiness on your own dependencies by registering a handler that
//! checks them and answers `503` while they are down.

use crate::{Context, Request, ResponseWriter};

/// Always `200 ok`. Anything that can answer HTTP is alive.
pub fn liveness(ctx: Context, w: &mut ResponseWriter<'_>, _req: &Request) -> Context {
    let _ = w.text("ok");
    ctx
}

/// `200 ready`. Replace it when start-up needs a warm-up period.
pub fn readiness(ctx: Context, w: &mut ResponseWriter<'_>, _req: &Request) -> Context {
    let _ = w.text("ready");
    ctx
}
