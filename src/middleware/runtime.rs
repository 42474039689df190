//! Runtime counters.
//!
//! [`RuntimeWare`] keeps a handful of operational numbers and publishes them
//! through the process-wide [`metrics`] recorder:
//!
//! | Metric | Kind | Meaning |
//! |---|---|---|
//! | `hits_per_minute` | gauge | requests over the last minute |
//! | `hits_4xx_per_5min` | gauge | client errors over the last five minutes |
//! | `hits_5xx_per_5min` | gauge | server errors over the last five minutes |
//! | `in_flight_requests` | gauge | requests currently inside this layer |
//! | `request_latency_seconds` | histogram | per-request latency |
//! | `server_start_time_seconds` | gauge | Unix time the layer was built |
//!
//! The same numbers, plus the last 20 latencies, are available as a
//! [`RuntimeSnapshot`] and can be served as JSON with [`RuntimeStats`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use http::header::{CONTENT_TYPE, HeaderValue};
use metrics::{describe_gauge, describe_histogram, gauge, histogram};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::config::RuntimeConfig;
use crate::context::Context;
use crate::handler::Handler;
use crate::middleware::{Middleware, Next, has_prefix};
use crate::request::Request;
use crate::response::{ContentType, ResponseWriter};

/// How many recent latencies the snapshot keeps.
const LATENCY_SAMPLES: usize = 20;

/// Resolution of every rate window.
const RATE_SLOTS: usize = 20;

// ── RateCounter ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Default)]
struct Slot {
    epoch: u64,
    hits: u64,
}

/// Hits over a rolling window, bucketed into `RATE_SLOTS` slots.
///
/// A slot is recycled the first time it is touched in a new epoch, so the
/// window slides in steps of `window / RATE_SLOTS`.
struct RateCounter {
    origin: Instant,
    slot: Duration,
    slots: Mutex<[Slot; RATE_SLOTS]>,
}

impl RateCounter {
    fn new(window: Duration) -> Self {
        Self {
            origin: Instant::now(),
            slot: (window / RATE_SLOTS as u32).max(Duration::from_millis(1)),
            slots: Mutex::new([Slot::default(); RATE_SLOTS]),
        }
    }

    fn epoch(&self) -> u64 {
        (self.origin.elapsed().as_nanos() / self.slot.as_nanos()) as u64
    }

    fn incr(&self) {
        let epoch = self.epoch();
        let mut slots = self.slots.lock();
        let slot = &mut slots[(epoch % RATE_SLOTS as u64) as usize];
        if slot.epoch != epoch {
            *slot = Slot { epoch, hits: 0 };
        }
        slot.hits += 1;
    }

    fn rate(&self) -> u64 {
        let now = self.epoch();
        self.slots
            .lock()
            .iter()
            .filter(|slot| now.saturating_sub(slot.epoch) < RATE_SLOTS as u64)
            .map(|slot| slot.hits)
            .sum()
    }
}

// ── RuntimeWare ───────────────────────────────────────────────────────────────

/// Point-in-time view of the runtime counters.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeSnapshot {
    pub server_start_unix: u64,
    pub hits_per_minute: u64,
    pub hits_4xx_per_5min: u64,
    pub hits_5xx_per_5min: u64,
    /// Most recent last.
    pub latency_ms: Vec<f64>,
    pub in_flight: usize,
}

/// Request-rate, error-rate, latency and concurrency counters.
///
/// Paths under an ignored prefix do not count towards `hits_per_minute` or
/// the latency samples, but their 4xx/5xx responses are still counted.
///
/// Keep an `Arc` to read the counters back:
///
/// ```rust
/// use std::sync::Arc;
/// use strata::Router;
/// use strata::middleware::{RuntimeStats, RuntimeWare};
///
/// let runtime = Arc::new(RuntimeWare::new().ignore("/debug"));
/// let router = Router::new()
///     .middleware(Arc::clone(&runtime))
///     .get("/debug/vars", "debug_vars", RuntimeStats::new(runtime));
/// ```
pub struct RuntimeWare {
    ignored_prefixes: Vec<String>,
    started_at: SystemTime,
    qps: RateCounter,
    c4xx: RateCounter,
    c5xx: RateCounter,
    latencies: Mutex<VecDeque<Duration>>,
    in_flight: AtomicUsize,
}

impl RuntimeWare {
    pub fn new() -> Self {
        describe_gauge!("hits_per_minute", "Requests served over the last minute");
        describe_gauge!("hits_4xx_per_5min", "4xx responses over the last five minutes");
        describe_gauge!("hits_5xx_per_5min", "5xx responses over the last five minutes");
        describe_gauge!("in_flight_requests", "Requests currently being handled");
        describe_gauge!("server_start_time_seconds", "Unix time the server started");
        describe_histogram!("request_latency_seconds", "Request latency in seconds");

        let started_at = SystemTime::now();
        let start_unix = started_at.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default();
        gauge!("server_start_time_seconds").set(start_unix as f64);

        Self {
            ignored_prefixes: Vec::new(),
            started_at,
            qps: RateCounter::new(Duration::from_secs(60)),
            c4xx: RateCounter::new(Duration::from_secs(5 * 60)),
            c5xx: RateCounter::new(Duration::from_secs(5 * 60)),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_SAMPLES)),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        config.ignored_prefixes.iter().fold(Self::new(), |ware, prefix| ware.ignore(prefix.clone()))
    }

    /// Excludes paths starting with `prefix` from the request rate.
    pub fn ignore(mut self, prefix: impl Into<String>) -> Self {
        self.ignored_prefixes.push(prefix.into());
        self
    }

    pub fn snapshot(&self) -> RuntimeSnapshot {
        RuntimeSnapshot {
            server_start_unix: self
                .started_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            hits_per_minute: self.qps.rate(),
            hits_4xx_per_5min: self.c4xx.rate(),
            hits_5xx_per_5min: self.c5xx.rate(),
            latency_ms: self.latencies.lock().iter().map(|d| d.as_secs_f64() * 1e3).collect(),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }

    fn record(&self, path: &str, status: u16, elapsed: Duration) {
        if status >= 500 {
            self.c5xx.incr();
            gauge!("hits_5xx_per_5min").set(self.c5xx.rate() as f64);
        } else if status >= 400 {
            self.c4xx.incr();
            gauge!("hits_4xx_per_5min").set(self.c4xx.rate() as f64);
        }

        if has_prefix(&self.ignored_prefixes, path) {
            return;
        }
        self.qps.incr();
        gauge!("hits_per_minute").set(self.qps.rate() as f64);
        histogram!("request_latency_seconds").record(elapsed.as_secs_f64());

        let mut latencies = self.latencies.lock();
        if latencies.len() == LATENCY_SAMPLES {
            latencies.pop_front();
        }
        latencies.push_back(elapsed);
    }
}

impl Default for RuntimeWare {
    fn default() -> Self { Self::new() }
}

/// Decrements the in-flight count however the inner layers exit.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!("in_flight_requests").set(now as f64);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let now = self.0.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        gauge!("in_flight_requests").set(now as f64);
    }
}

impl Middleware for RuntimeWare {
    fn serve(&self, ctx: Context, w: &mut ResponseWriter<'_>, req: &Request, next: Next<'_>) -> Context {
        let _in_flight = InFlight::enter(&self.in_flight);
        let start = Instant::now();
        let ctx = next.run(ctx, w, req);
        self.record(req.path(), w.status().as_u16(), start.elapsed());
        ctx
    }
}

/// Handler that serves a [`RuntimeWare`]'s snapshot as JSON.
pub struct RuntimeStats(Arc<RuntimeWare>);

impl RuntimeStats {
    pub fn new(runtime: Arc<RuntimeWare>) -> Self {
        Self(runtime)
    }
}

impl Handler for RuntimeStats {
    fn call(&self, ctx: Context, w: &mut ResponseWriter<'_>, _req: &Request) -> Context {
        match serde_json::to_vec(&self.0.snapshot()) {
            Ok(body) => {
                w.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(ContentType::Json.as_str()));
                let _ = w.write(&body);
            }
            Err(e) => {
                warn!("runtime snapshot not serialisable: {e}");
                w.set_status(http::StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
        ctx
    }
}
