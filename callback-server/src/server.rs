//! HTTP server for receiving GENA event notifications.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use warp::http::{Method, StatusCode};
use warp::Filter;

use crate::error::{CallbackError, Result};
use crate::router::{EventRouter, NotificationHandler, NotifyRequest};

/// HTTP callback server for receiving GENA NOTIFY requests.
///
/// The server runs on a dedicated thread with its own single-threaded tokio
/// runtime, so callers do not need an async context. Every request, whatever
/// its path, is validated and routed through an [`EventRouter`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use callback_server::{CallbackServer, Notification};
///
/// let handler = |notification: Notification| {
///     println!("{} changed {} variables", notification.subscription_id, notification.properties.len());
///     true
/// };
/// let server = CallbackServer::start("0.0.0.0".parse().unwrap(), (0, 0), Arc::new(handler))?;
/// println!("listening on port {}", server.port());
/// server.shutdown();
/// # Ok::<(), callback_server::CallbackError>(())
/// ```
pub struct CallbackServer {
    local_addr: SocketAddr,
    shutdown_tx: Option<watch::Sender<bool>>,
    thread: Option<JoinHandle<()>>,
}

impl CallbackServer {
    /// Bind the first free port in `port_range` on `bind_address` and start serving.
    ///
    /// `(0, 0)` lets the operating system pick a port.
    pub fn start(
        bind_address: IpAddr,
        port_range: (u16, u16),
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<Self> {
        if port_range.0 > port_range.1 {
            return Err(CallbackError::Bind(format!(
                "invalid port range {}-{}",
                port_range.0, port_range.1
            )));
        }

        let router = EventRouter::new(handler);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<SocketAddr>>();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let thread = thread::Builder::new()
            .name("gena-callback".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(CallbackError::Runtime(e.to_string())));
                        return;
                    }
                };
                runtime.block_on(serve(bind_address, port_range, router, shutdown_rx, ready_tx));
            })
            .map_err(|e| CallbackError::Runtime(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(local_addr)) => {
                info!(%local_addr, "callback server listening");
                Ok(Self {
                    local_addr,
                    shutdown_tx: Some(shutdown_tx),
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(CallbackError::Runtime("server thread exited before binding".to_string()))
            }
        }
    }

    /// Get the port the server is bound to.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting requests and wait for in-flight ones to complete.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("callback server thread panicked");
            }
            debug!(local_addr = %self.local_addr, "callback server stopped");
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve(
    bind_address: IpAddr,
    port_range: (u16, u16),
    router: EventRouter,
    shutdown_rx: watch::Receiver<bool>,
    ready_tx: std::sync::mpsc::Sender<Result<SocketAddr>>,
) {
    let routes = notify_route(router);
    let mut last_error = String::from("empty port range");

    for port in port_range.0..=port_range.1 {
        let mut signal = shutdown_rx.clone();
        let bound = warp::serve(routes.clone()).try_bind_with_graceful_shutdown(
            SocketAddr::new(bind_address, port),
            async move {
                let _ = signal.changed().await;
            },
        );
        match bound {
            Ok((local_addr, server)) => {
                let _ = ready_tx.send(Ok(local_addr));
                server.await;
                return;
            }
            Err(e) => {
                debug!(port, error = %e, "callback port unavailable");
                last_error = e.to_string();
            }
        }
    }

    let _ = ready_tx.send(Err(CallbackError::Bind(format!(
        "no available port in range {}-{}: {}",
        port_range.0, port_range.1, last_error
    ))));
}

/// The catch-all NOTIFY endpoint.
fn notify_route(
    router: EventRouter,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone + Send + Sync + 'static {
    warp::method()
        .and(warp::header::optional::<String>("sid"))
        .and(warp::header::optional::<String>("seq"))
        .and(warp::header::optional::<String>("nt"))
        .and(warp::header::optional::<String>("nts"))
        .and(warp::body::bytes())
        .map(
            move |method: Method,
                  sid: Option<String>,
                  seq: Option<String>,
                  nt: Option<String>,
                  nts: Option<String>,
                  body: Bytes| {
                let outcome = router.route(&NotifyRequest {
                    method: method.as_str(),
                    sid: sid.as_deref(),
                    seq: seq.as_deref(),
                    nt: nt.as_deref(),
                    nts: nts.as_deref(),
                    body: &body,
                });
                let status = StatusCode::from_u16(outcome.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                warp::reply::with_status(warp::reply(), status)
            },
        )
}
