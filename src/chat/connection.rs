//! Push channel supervision.
//!
//! One socket per authenticated user carries `new_message` and `typing`
//! frames from the backend. A single supervisor task owns the socket: it
//! forwards parsed frames to the chat client, publishes the online flag and
//! reconnects after a fixed delay whenever the socket drops. Because the
//! supervisor is one sequential loop, at most one reconnect timer can be
//! pending at any time.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::config::ChatConfig;
use super::error::{ChatError, ChatResult};
use super::types::{PushFrame, UserId};

/// Boxed future type for socket operations.
pub type SocketFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An open push socket.
pub trait PushSocket: Send {
    /// Wait for the next text frame. `None` means the socket closed cleanly.
    fn next_frame(&mut self) -> SocketFuture<'_, Option<ChatResult<String>>>;

    /// Close the socket.
    fn close(&mut self) -> SocketFuture<'_, ()>;
}

/// Opens push sockets.
pub trait SocketTransport: Send + Sync {
    /// Open a socket to `url`.
    fn connect(&self, url: &Url) -> SocketFuture<'_, ChatResult<Box<dyn PushSocket>>>;
}

/// WebSocket transport built on `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsTransport;

impl SocketTransport for WsTransport {
    fn connect(&self, url: &Url) -> SocketFuture<'_, ChatResult<Box<dyn PushSocket>>> {
        let url = url.clone();
        Box::pin(async move {
            let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(classify_connect_error)?;
            Ok(Box::new(WsSocket { stream }) as Box<dyn PushSocket>)
        })
    }
}

/// Request-building failures are construction errors; everything else
/// (refused, unreachable, TLS, handshake) counts as a dropped socket.
fn classify_connect_error(err: WsError) -> ChatError {
    match err {
        WsError::Url(_) | WsError::HttpFormat(_) => ChatError::SocketConstruction(err.to_string()),
        other => ChatError::WebSocket(other.to_string()),
    }
}

struct WsSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl PushSocket for WsSocket {
    fn next_frame(&mut self) -> SocketFuture<'_, Option<ChatResult<String>>> {
        Box::pin(async move {
            loop {
                match self.stream.next().await? {
                    Ok(WsMessage::Text(text)) => return Some(Ok(text)),
                    Ok(WsMessage::Close(_)) => return None,
                    Ok(_) => {}
                    Err(err) => return Some(Err(ChatError::WebSocket(err.to_string()))),
                }
            }
        })
    }

    fn close(&mut self) -> SocketFuture<'_, ()> {
        Box::pin(async move {
            if let Err(err) = self.stream.close(None).await {
                debug!(%err, "Socket close failed");
            }
        })
    }
}

/// Observable state of the push channel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionState {
    /// Whether the socket is currently open.
    pub online: bool,
    /// Last connection failure, cleared on the next successful open.
    pub last_error: Option<String>,
}

/// How a socket session ended.
enum SessionEnd {
    Closed,
    Failed(ChatError),
    Shutdown,
    ReceiverGone,
}

struct Supervisor {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Everything the supervisor task needs, moved into it at spawn time.
struct SupervisorContext {
    transport: Arc<dyn SocketTransport>,
    url: Url,
    reconnect_delay: Duration,
    connect_error_delay: Duration,
    frames: mpsc::Sender<PushFrame>,
    state: Arc<watch::Sender<ConnectionState>>,
    pending_timers: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
    shutdown: Arc<Notify>,
}

/// Maintains one live push socket per authenticated user.
pub struct ConnectionManager {
    transport: Arc<dyn SocketTransport>,
    config: ChatConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    pending_timers: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl ConnectionManager {
    /// Create an idle manager.
    #[must_use]
    pub fn new(transport: Arc<dyn SocketTransport>, config: ChatConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            transport,
            config,
            state: Arc::new(state),
            pending_timers: Arc::new(AtomicUsize::new(0)),
            attempts: Arc::new(AtomicUsize::new(0)),
            supervisor: Mutex::new(None),
        }
    }

    /// Start supervising the push channel of `user_id`.
    ///
    /// Parsed frames are forwarded to `frames`. Calling this again replaces
    /// the previous supervisor, so reconnect loops never stack.
    ///
    /// # Errors
    /// Returns an error only if the socket URL cannot be built; connection
    /// failures are retried in the background.
    pub async fn connect(&self, user_id: &UserId, frames: mpsc::Sender<PushFrame>) -> ChatResult<()> {
        let url = self.config.socket_url(user_id)?;
        let mut slot = self.supervisor.lock().await;
        if let Some(previous) = slot.take() {
            stop(previous).await;
        }

        let shutdown = Arc::new(Notify::new());
        let context = SupervisorContext {
            transport: Arc::clone(&self.transport),
            url,
            reconnect_delay: self.config.reconnect_delay,
            connect_error_delay: self.config.connect_error_delay,
            frames,
            state: Arc::clone(&self.state),
            pending_timers: Arc::clone(&self.pending_timers),
            attempts: Arc::clone(&self.attempts),
            shutdown: Arc::clone(&shutdown),
        };
        info!(%user_id, "Starting push channel supervisor");
        let handle = tokio::spawn(supervise(context));
        *slot = Some(Supervisor { shutdown, handle });
        Ok(())
    }

    /// Stop the supervisor, cancel any pending reconnect and close the socket.
    pub async fn shutdown(&self) {
        if let Some(supervisor) = self.supervisor.lock().await.take() {
            stop(supervisor).await;
            info!("Push channel supervisor stopped");
        }
    }

    /// Whether the socket is currently open.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.state.borrow().online
    }

    /// Snapshot of the connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Number of reconnect timers currently pending (0 or 1).
    #[must_use]
    pub fn pending_reconnects(&self) -> usize {
        self.pending_timers.load(Ordering::Acquire)
    }

    /// Number of connection attempts made so far.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.attempts.load(Ordering::Acquire)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(supervisor) = self.supervisor.get_mut().take() {
            supervisor.shutdown.notify_one();
            supervisor.handle.abort();
        }
    }
}

async fn stop(supervisor: Supervisor) {
    // notify_one stores a permit, so the signal is not lost if the task is mid-connect.
    supervisor.shutdown.notify_one();
    if let Err(err) = supervisor.handle.await {
        if !err.is_cancelled() {
            warn!(%err, "Push channel supervisor panicked");
        }
    }
}

fn set_offline(state: &watch::Sender<ConnectionState>, error: Option<String>) {
    state.send_modify(|s| {
        s.online = false;
        if error.is_some() {
            s.last_error = error;
        }
    });
}

async fn supervise(ctx: SupervisorContext) {
    loop {
        ctx.attempts.fetch_add(1, Ordering::AcqRel);
        let connected = tokio::select! {
            result = ctx.transport.connect(&ctx.url) => result,
            () = ctx.shutdown.notified() => return,
        };

        let delay = match connected {
            Ok(mut socket) => {
                info!(url = %ctx.url, "Chat socket connected");
                ctx.state.send_modify(|s| {
                    s.online = true;
                    s.last_error = None;
                });

                match pump(&ctx, socket.as_mut()).await {
                    SessionEnd::Closed => {
                        info!("Chat socket disconnected");
                        set_offline(&ctx.state, None);
                        ctx.reconnect_delay
                    }
                    SessionEnd::Failed(err) => {
                        warn!(%err, "Chat socket error");
                        set_offline(&ctx.state, Some(err.to_string()));
                        ctx.reconnect_delay
                    }
                    SessionEnd::Shutdown | SessionEnd::ReceiverGone => {
                        socket.close().await;
                        set_offline(&ctx.state, None);
                        return;
                    }
                }
            }
            Err(err) => {
                warn!(%err, url = %ctx.url, "Could not open chat socket");
                let delay = if matches!(err, ChatError::SocketConstruction(_)) {
                    ctx.connect_error_delay
                } else {
                    ctx.reconnect_delay
                };
                set_offline(&ctx.state, Some(err.to_string()));
                delay
            }
        };

        debug!(?delay, "Scheduling reconnect");
        ctx.pending_timers.fetch_add(1, Ordering::AcqRel);
        let cancelled = tokio::select! {
            () = tokio::time::sleep(delay) => false,
            () = ctx.shutdown.notified() => true,
        };
        ctx.pending_timers.fetch_sub(1, Ordering::AcqRel);
        if cancelled {
            return;
        }
    }
}

/// Forward frames until the socket ends or shutdown is requested.
async fn pump(ctx: &SupervisorContext, socket: &mut dyn PushSocket) -> SessionEnd {
    loop {
        let next = tokio::select! {
            next = socket.next_frame() => next,
            () = ctx.shutdown.notified() => return SessionEnd::Shutdown,
        };

        let text = match next {
            None => return SessionEnd::Closed,
            Some(Err(err)) => return SessionEnd::Failed(err),
            Some(Ok(text)) => text,
        };

        match serde_json::from_str::<PushFrame>(&text) {
            Ok(frame) => {
                debug!(?frame, "Push frame received");
                if ctx.frames.send(frame).await.is_err() {
                    return SessionEnd::ReceiverGone;
                }
            }
            Err(err) => warn!(%err, "Dropping unparseable push frame"),
        }
    }
}
