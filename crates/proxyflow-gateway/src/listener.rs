//! Accept loop and graceful shutdown

use crate::error::GatewayError;
use crate::handler::ConnectionHandler;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept so a persistent error (e.g. EMFILE) does
/// not spin
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Listener configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to listen on (IP or hostname)
    pub listen_addr: String,
    /// TCP port; 0 picks an ephemeral port
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// In-flight connection count with an idle notification
#[derive(Default)]
struct ActiveConnections {
    count: AtomicUsize,
    idle: Notify,
}

impl ActiveConnections {
    fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent last drop is not missed
            notified.as_mut().enable();

            if self.get() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// RAII guard to ensure the in-flight count is decremented
///
/// Held by each connection task; dropping it on any exit path, including
/// a panic in the handler, releases the slot.
struct ConnectionGuard {
    active: Arc<ActiveConnections>,
}

impl ConnectionGuard {
    fn new(active: Arc<ActiveConnections>) -> Self {
        active.count.fetch_add(1, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.active.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.active.idle.notify_waiters();
        }
    }
}

enum ListenerState {
    Idle,
    Running {
        shutdown_tx: oneshot::Sender<()>,
        accept_task: JoinHandle<()>,
    },
    /// Accept loop gone, in-flight connections still being awaited
    Draining,
    Stopped,
}

/// HTTP CONNECT gateway listener
///
/// [`start`](Self::start) binds and spawns the accept loop; every accepted
/// connection runs [`ConnectionHandler::handle`] on its own task.
/// [`stop`](Self::stop) closes the listening socket and waits, up to a
/// deadline, for in-flight connections to finish.
pub struct GatewayListener {
    config: GatewayConfig,
    handler: Arc<ConnectionHandler>,
    active: Arc<ActiveConnections>,
    local_addr: OnceLock<SocketAddr>,
    state: Mutex<ListenerState>,
}

impl GatewayListener {
    pub fn new(config: GatewayConfig, handler: Arc<ConnectionHandler>) -> Self {
        Self {
            config,
            handler,
            active: Arc::new(ActiveConnections::default()),
            local_addr: OnceLock::new(),
            state: Mutex::new(ListenerState::Idle),
        }
    }

    /// Bind and start accepting in the background
    ///
    /// Returns the bound address once the listener is accepting.
    pub async fn start(&self) -> Result<SocketAddr, GatewayError> {
        let mut state = self.state.lock().await;
        if !matches!(*state, ListenerState::Idle) {
            return Err(GatewayError::AlreadyStarted);
        }

        let listener = TcpListener::bind((self.config.listen_addr.as_str(), self.config.port))
            .await
            .map_err(|e| GatewayError::BindError {
                address: self.config.listen_addr.clone(),
                port: self.config.port,
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;
        let _ = self.local_addr.set(local_addr);

        info!("Gateway listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.handler.clone(),
            self.active.clone(),
            shutdown_rx,
        ));

        *state = ListenerState::Running {
            shutdown_tx,
            accept_task,
        };

        Ok(local_addr)
    }

    /// Stop accepting and wait up to `deadline` for in-flight connections
    ///
    /// Connections still running when the deadline passes are left alone
    /// and reported through [`GatewayError::ShutdownTimeout`]. A `stop`
    /// issued while another one is still draining waits on the same
    /// connections under its own deadline. Calling `stop` after a drain has
    /// finished, successfully or not, is a no-op.
    pub async fn stop(&self, deadline: Duration) -> Result<(), GatewayError> {
        let deadline = tokio::time::Instant::now() + deadline;

        let previous = {
            let mut state = self.state.lock().await;
            match *state {
                ListenerState::Idle => return Err(GatewayError::NotStarted),
                ListenerState::Stopped => {
                    debug!("Gateway listener already stopped");
                    return Ok(());
                }
                ListenerState::Draining => None,
                ListenerState::Running { .. } => Some(std::mem::replace(
                    &mut *state,
                    ListenerState::Draining,
                )),
            }
        };

        let Some(ListenerState::Running {
            shutdown_tx,
            accept_task,
        }) = previous
        else {
            debug!("Gateway listener already draining, waiting alongside");
            return self.drain(deadline).await;
        };

        let _ = shutdown_tx.send(());
        // The accept loop owns the socket; joining it means the port is closed
        if let Err(e) = accept_task.await {
            error!("Accept loop failed: {}", e);
        }

        let remaining = self.active.get();
        if remaining > 0 {
            info!("Waiting for {} active connection(s) to finish", remaining);
        }

        let result = self.drain(deadline).await;
        *self.state.lock().await = ListenerState::Stopped;
        result
    }

    async fn drain(&self, deadline: tokio::time::Instant) -> Result<(), GatewayError> {
        match tokio::time::timeout_at(deadline, self.active.wait_idle()).await {
            Ok(()) => {
                info!("All connections closed gracefully");
                Ok(())
            }
            Err(_) => {
                let remaining = self.active.get();
                warn!(
                    "Shutdown timeout, {} connection(s) may be aborted",
                    remaining
                );
                Err(GatewayError::ShutdownTimeout { remaining })
            }
        }
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Connections currently being handled
    pub fn active_connections(&self) -> usize {
        self.active.get()
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<ConnectionHandler>,
    active: Arc<ActiveConnections>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("Accept loop received stop signal");
                break;
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    let guard = ConnectionGuard::new(active.clone());
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let _guard = guard;
                        handler.handle(stream, peer_addr).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    if stop_requested_during_backoff(&mut shutdown_rx).await {
                        debug!("Accept loop received stop signal");
                        break;
                    }
                }
            }
        }
    }

    drop(listener);
    info!("Gateway stopped accepting connections");
}

/// Sleep out the accept backoff; true if a stop arrived meanwhile
async fn stop_requested_during_backoff(shutdown_rx: &mut oneshot::Receiver<()>) -> bool {
    tokio::select! {
        _ = shutdown_rx => true,
        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => false,
    }
}
