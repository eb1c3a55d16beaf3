//! HTTP server and graceful shutdown.
//!
//! The server owns the sockets and nothing else: every request is handed
//! to the application's [`Dispatcher`], and connection-level failures that
//! surface after a chain has settled (a failed final flush, a peer reset)
//! are routed to the application's error hook rather than lost in a log
//! line.
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C the server:
//! 1. immediately stops accepting new connections,
//! 2. lets every in-flight connection task run to completion,
//! 3. returns from [`Server::serve`], letting `main` exit cleanly.
//!
//! Orchestrators that send SIGTERM before SIGKILL (Kubernetes being the
//! usual one) should allow a grace period longer than the slowest request.

use std::net::SocketAddr;

use http_body_util::BodyExt;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::app::Dispatcher;
use crate::error::{Error, Result};

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr.parse().expect("invalid socket address");
        Self { addr }
    }

    /// Starts accepting connections and feeding them to `dispatcher`.
    ///
    /// Returns only after a full graceful shutdown: a SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing.
    pub async fn serve(self, dispatcher: Dispatcher) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "allium listening");

        // JoinSet tracks every spawned connection task so we can wait for
        // them all to finish during graceful shutdown.
        let mut tasks = tokio::task::JoinSet::new();

        // Futures must not move in memory after the first poll; pin the
        // shutdown future on the stack so we can poll it in a loop.
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // `biased` checks arms top-to-bottom, so a shutdown signal
                // stops the accept loop even when connections are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let dispatcher = dispatcher.clone();
                    // TokioIo adapts tokio's AsyncRead/AsyncWrite to the
                    // hyper IO traits.
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        let svc_dispatcher = dispatcher.clone();
                        // The closure runs once per request on the
                        // connection, not once per connection.
                        let svc = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                            let dispatcher = svc_dispatcher.clone();
                            async move {
                                let req = req.map(|body| {
                                    body.map_err(std::io::Error::other).boxed_unsync()
                                });
                                let res = dispatcher.dispatch(req, Some(remote_addr)).await;
                                Ok::<_, std::convert::Infallible>(res)
                            }
                        });

                        // `auto::Builder` handles both HTTP/1.1 and HTTP/2,
                        // whatever the client negotiates.
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            // The chain may already have settled when the
                            // flush fails; this is the late-error path, and
                            // it belongs to the application's error hook.
                            dispatcher.app.emit_error(&Error::transport(e));
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not
                // grow without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Drain: wait for every in-flight connection before returning.
        while tasks.join_next().await.is_some() {}

        info!("allium stopped");
        Ok(())
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both SIGTERM (sent by orchestrators) and
/// SIGINT (Ctrl-C, for local dev). On Windows only Ctrl-C is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    // `pending()` never resolves; on non-Unix platforms the SIGTERM arm
    // is effectively disabled.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
