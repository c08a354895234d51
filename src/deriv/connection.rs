// =============================================================================
// Connection Manager — session lifecycle over one WebSocket
// =============================================================================
//
//   Disconnected → Connecting → Authenticating → Live → Disconnected
//
// Connecting starts on an explicit connect with a token. The transport opening
// moves to Authenticating and sends the token; the authorize reply (handled by
// the router) moves to Live. A transport close or error returns to
// Disconnected. There is no automatic reconnection.
//
// Each session is one task that owns the socket, the keepalive timer and the
// receiving end of the outbox. Sessions carry an id; a session that has been
// superseded by a newer connect or an explicit disconnect never touches
// shared state on its way out.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::analysis::AnalysisQueue;
use crate::app_state::AppState;
use crate::deriv::subscriptions::SubscriptionRegistry;
use crate::deriv::{parse_message, OutboundRequest, Outbox};
use crate::log_feed::LogLevel;
use crate::market_data::symbols::is_supported_timeframe;
use crate::router::MessageRouter;
use crate::types::ConnectionState;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Session {
    id: u64,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Why a session loop ended.
#[derive(Debug)]
enum SessionEnd {
    Requested,
    Closed(String),
}

pub struct ConnectionManager {
    state: Arc<AppState>,
    outbox: Arc<Outbox>,
    router: Arc<MessageRouter>,
    queue: Arc<AnalysisQueue>,
    registry: Arc<SubscriptionRegistry>,
    session_seq: AtomicU64,
    session: Mutex<Option<Session>>,
    /// Delayed re-subscribe after a timeframe switch.
    resubscribe: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        state: Arc<AppState>,
        outbox: Arc<Outbox>,
        router: Arc<MessageRouter>,
        queue: Arc<AnalysisQueue>,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new(
            Arc::clone(&state),
            Arc::clone(&outbox),
            Arc::clone(&queue),
        ));
        Self {
            state,
            outbox,
            router,
            queue,
            registry,
            session_seq: AtomicU64::new(0),
            session: Mutex::new(None),
            resubscribe: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Open a new session authenticated with `token`, replacing any existing
    /// one. Returns once the transport is open and the token has been sent;
    /// authorisation completes asynchronously.
    pub async fn connect(self: &Arc<Self>, token: &str) -> Result<()> {
        let token = token.trim();
        if token.is_empty() {
            bail!("missing API token");
        }

        self.teardown();
        let id = self.session_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let url = self.state.runtime_config.read().session_url();
        self.state.set_connection_state(ConnectionState::Connecting);
        self.state.log(LogLevel::Info, "Connecting to market data session...");

        let socket = match connect_async(url.as_str()).await {
            Ok((socket, _response)) => socket,
            Err(e) => {
                if self.is_current(id) {
                    self.state.set_connection_state(ConnectionState::Disconnected);
                    self.state
                        .log(LogLevel::Error, format!("Connection failed: {e}"));
                }
                return Err(e).context("failed to open session WebSocket");
            }
        };

        if !self.is_current(id) {
            debug!(session = id, "session superseded while connecting");
            return Ok(());
        }

        info!(session = id, "session transport open");
        self.state.set_connection_state(ConnectionState::Authenticating);

        let (tx, rx) = mpsc::unbounded_channel();
        self.outbox.attach(tx);
        self.outbox.send(OutboundRequest::Authorize {
            token: token.to_string(),
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move { manager.run_session(id, socket, rx, shutdown_rx).await });

        *self.session.lock() = Some(Session {
            id,
            shutdown: shutdown_tx,
            task,
        });
        Ok(())
    }

    /// Close the current session, if any.
    pub fn disconnect(&self) {
        let had_session = self.teardown();
        if self.state.connection_state() != ConnectionState::Disconnected {
            self.state.set_connection_state(ConnectionState::Disconnected);
        }
        if had_session {
            self.state.log(LogLevel::Info, "Disconnected");
        }
    }

    /// `true` while a session task is running.
    pub fn has_session(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }

    /// Invalidate the current session and cancel session-scoped work.
    fn teardown(&self) -> bool {
        self.session_seq.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.resubscribe.lock().take() {
            handle.abort();
        }
        self.outbox.detach();
        self.queue.clear();

        match self.session.lock().take() {
            Some(session) => {
                debug!(session = session.id, "stopping session");
                let _ = session.shutdown.send(());
                true
            }
            None => false,
        }
    }

    fn is_current(&self, id: u64) -> bool {
        self.session_seq.load(Ordering::SeqCst) == id
    }

    async fn run_session(
        self: Arc<Self>,
        id: u64,
        socket: Socket,
        outbound: mpsc::UnboundedReceiver<OutboundRequest>,
        shutdown: oneshot::Receiver<()>,
    ) {
        let keepalive = Duration::from_secs(self.state.runtime_config.read().keepalive_secs.max(1));
        let end = session_loop(&self.state, &self.router, socket, outbound, shutdown, keepalive).await;

        if !self.is_current(id) {
            debug!(session = id, outcome = ?end, "superseded session ended");
            return;
        }

        self.outbox.detach();
        self.queue.clear();
        if let Some(handle) = self.resubscribe.lock().take() {
            handle.abort();
        }
        self.state.set_connection_state(ConnectionState::Disconnected);
        match end {
            Ok(SessionEnd::Requested) => {}
            Ok(SessionEnd::Closed(reason)) => self
                .state
                .log(LogLevel::Warning, format!("Connection closed: {reason}")),
            Err(e) => self
                .state
                .log(LogLevel::Error, format!("Connection lost: {e:#}")),
        }
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    pub fn add_symbol(&self, symbol: &str) -> Result<bool> {
        self.registry.add(symbol)
    }

    pub fn remove_symbol(&self, symbol: &str) -> bool {
        self.registry.remove(symbol)
    }

    /// Switch every stream to `seconds`. All stream state is cleared at once;
    /// while live, subscriptions are cancelled and re-issued after the settle
    /// delay. Returns `Ok(false)` if `seconds` is already selected.
    pub fn change_timeframe(self: &Arc<Self>, seconds: u32) -> Result<bool> {
        if !is_supported_timeframe(seconds) {
            bail!("unsupported timeframe: {seconds}s");
        }

        let settle_delay = {
            let mut config = self.state.runtime_config.write();
            if config.timeframe_secs == seconds {
                return Ok(false);
            }
            config.timeframe_secs = seconds;
            Duration::from_millis(config.settle_delay_ms)
        };

        self.state.aggregator.write().reset(seconds);
        self.queue.clear();
        self.state.log(
            LogLevel::Warning,
            format!("Switching timeframe to {} minutes", seconds / 60),
        );

        let mut pending = self.resubscribe.lock();
        if let Some(handle) = pending.take() {
            handle.abort();
        }
        if self.state.connection_state() == ConnectionState::Live {
            self.outbox.send(OutboundRequest::ForgetAllCandles);
            let manager = Arc::clone(self);
            *pending = Some(tokio::spawn(async move {
                tokio::time::sleep(settle_delay).await;
                if manager.state.connection_state() == ConnectionState::Live {
                    manager.registry.subscribe_all();
                }
            }));
        }
        Ok(true)
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state.connection_state())
            .field("session_seq", &self.session_seq.load(Ordering::SeqCst))
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Session loop
// -----------------------------------------------------------------------------

/// Pump frames both ways until the transport ends or shutdown is requested.
/// Keepalive pings are only sent while the session is live.
async fn session_loop(
    state: &AppState,
    router: &MessageRouter,
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<OutboundRequest>,
    mut shutdown: oneshot::Receiver<()>,
    keepalive_period: Duration,
) -> Result<SessionEnd> {
    let (mut sink, mut stream) = socket.split();
    let mut keepalive = interval_at(Instant::now() + keepalive_period, keepalive_period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(SessionEnd::Requested);
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match parse_message(&text) {
                        Ok(message) => router.handle(message),
                        Err(e) => warn!(error = %e, "malformed frame dropped"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        sink.send(Message::Pong(data))
                            .await
                            .context("failed to answer ping")?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("{} {}", f.code, f.reason))
                            .unwrap_or_else(|| "closed by server".to_string());
                        return Ok(SessionEnd::Closed(reason));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e).context("session transport error"),
                    None => return Ok(SessionEnd::Closed("stream ended".to_string())),
                }
            }

            Some(request) = outbound.recv() => {
                debug!(kind = request.kind(), "sending request");
                sink.send(Message::Text(request.to_json().to_string()))
                    .await
                    .with_context(|| format!("failed to send {} request", request.kind()))?;
            }

            _ = keepalive.tick() => {
                if state.connection_state() == ConnectionState::Live {
                    sink.send(Message::Text(OutboundRequest::Ping.to_json().to_string()))
                        .await
                        .context("failed to send keepalive")?;
                }
            }
        }
    }
}
