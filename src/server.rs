//! HTTP listener and graceful shutdown.
//!
//! The accept loop is async; the pipeline is not. Each request's body is
//! collected, then the router runs it on tokio's blocking pool. The head and
//! body the handler writes travel back over channels, so the client starts
//! receiving bytes while the handler is still writing.
//!
//! ```text
//!   hyper conn task                 blocking pool
//!   ───────────────                 ─────────────
//!   collect body ──spawn_blocking──▶ router.dispatch(req, ChannelSink)
//!   await head   ◀──── oneshot ───── send_head(status, headers)
//!   stream body  ◀────── mpsc ────── write_body(chunk) …
//! ```
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C the server stops accepting, lets every in-flight
//! connection finish, then returns from [`Server::serve`]. Keep the pod's
//! `terminationGracePeriodSeconds` above your slowest request.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty};
use hyper::body::{Body, Frame, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::error::Error;
use crate::request::Request;
use crate::response::ResponseSink;
use crate::router::Router;

/// Body chunks buffered between a handler and its connection.
const BODY_CHANNEL_DEPTH: usize = 16;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust
    /// assert!(strata::Server::bind("0.0.0.0:3000").is_ok());
    /// assert!(strata::Server::bind("nonsense").is_err());
    /// ```
    pub fn bind(addr: &str) -> Result<Self, Error> {
        let addr = addr.parse().map_err(|source| Error::InvalidAddress { addr: addr.to_owned(), source })?;
        Ok(Self { addr })
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self, Error> {
        Self::bind(&config.addr)
    }

    /// Accepts connections until SIGTERM or Ctrl-C, then drains.
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        serve_with_shutdown(listener, router, shutdown_signal()).await
    }
}

/// Serves `router` on an already-bound listener until `signal` resolves,
/// then waits for in-flight connections to finish.
pub async fn serve_with_shutdown<S>(listener: TcpListener, router: Router, signal: S) -> Result<(), Error>
where
    S: Future<Output = ()>,
{
    let router = Arc::new(router);
    info!(addr = %listener.local_addr()?, "strata listening");

    let mut tasks = tokio::task::JoinSet::new();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            biased;

            () = &mut signal => {
                info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, peer) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let router = Arc::clone(&router);
                let io = TokioIo::new(stream);

                tasks.spawn(async move {
                    let svc = service_fn(move |req| dispatch(Arc::clone(&router), req));
                    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                        .serve_connection(io, svc)
                        .await
                    {
                        debug!(%peer, "connection error: {e}");
                    }
                });
            }

            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    while tasks.join_next().await.is_some() {}

    info!("strata stopped");
    Ok(())
}

// ── Request dispatch ──────────────────────────────────────────────────────────

type ResponseBody = BoxBody<Bytes, Infallible>;

async fn dispatch(router: Arc<Router>, req: hyper::Request<Incoming>) -> Result<http::Response<ResponseBody>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!(path = parts.uri.path(), "request body unreadable: {e}");
            return Ok(bare(StatusCode::BAD_REQUEST));
        }
    };
    let req = Request::from_parts(parts, body);

    let (head_tx, head_rx) = oneshot::channel();
    let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_DEPTH);
    let method = req.method().clone();
    let path = req.path().to_owned();

    let task = tokio::task::spawn_blocking(move || {
        let mut sink = ChannelSink { head: Some(head_tx), body: body_tx };
        router.dispatch(&req, &mut sink);
    });

    match head_rx.await {
        Ok((status, headers)) => {
            // The head is out; the pipeline's fate only matters to the logs now.
            tokio::spawn(async move {
                if let Err(e) = task.await {
                    error!(%method, path = %path, "request pipeline aborted after the head was sent: {e}");
                }
            });
            let mut res = http::Response::new(ChannelBody { rx: body_rx }.boxed());
            *res.status_mut() = status;
            *res.headers_mut() = headers;
            Ok(res)
        }
        Err(_) => {
            // The sink was dropped before a head went out: the pipeline panicked
            // with no recovery layer to catch it.
            if let Err(e) = task.await {
                error!(%method, path = %path, "request pipeline panicked: {e}");
            }
            Ok(bare(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

fn bare(status: StatusCode) -> http::Response<ResponseBody> {
    let mut res = http::Response::new(Empty::new().boxed());
    *res.status_mut() = status;
    res
}

/// [`ResponseSink`] that forwards the head and body to the connection task.
struct ChannelSink {
    head: Option<oneshot::Sender<(StatusCode, HeaderMap)>>,
    body: mpsc::Sender<Bytes>,
}

impl ResponseSink for ChannelSink {
    fn send_head(&mut self, status: StatusCode, headers: HeaderMap) {
        if let Some(tx) = self.head.take() {
            let _ = tx.send((status, headers));
        }
    }

    fn write_body(&mut self, chunk: &[u8]) -> io::Result<usize> {
        self.body
            .blocking_send(Bytes::copy_from_slice(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))?;
        Ok(chunk.len())
    }
}

/// Response body fed by a [`ChannelSink`]; ends when the sink is dropped.
struct ChannelBody {
    rx: mpsc::Receiver<Bytes>,
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        self.rx.poll_recv(cx).map(|chunk| chunk.map(|data| Ok(Frame::data(data))))
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM (Unix) or Ctrl-C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Ctrl-C handler unavailable: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("SIGTERM handler unavailable: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}
