//! # Audio Relay Session
//!
//! Owns the pipeline for one live call: output device context, playback sink,
//! and the socket subscribed to the call's listen feed.
//!
//! ## Session Lifecycle:
//! 1. **Idle**: Nothing acquired, ready to start
//! 2. **Starting**: Opening the output device, attaching playback, connecting the socket
//! 3. **Active**: Binary frames flow from the socket to the playback sink
//! 4. **Stopping**: Tearing everything down
//!
//! ## Invariants:
//! - At most one session is active per [`RelaySession`]; `start` outside `Idle`
//!   is rejected with [`SessionError::AlreadyActive`] and changes nothing.
//! - The socket is opened last, so a failed device acquisition never touches the
//!   network.
//! - Teardown is total: every release step runs even when an earlier one fails,
//!   and the failures are logged together.
//! - A socket close or error while active tears the session down without the
//!   caller calling [`RelaySession::stop`]. There is no reconnect.

use crate::audio::playback::{AudioError, AudioOutput, CpalOutput, PlaybackFormat, PlaybackSink};
use crate::websocket::{self, FeedEnd};

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Current phase of the relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Audio is already playing")]
    AlreadyActive,

    #[error("Failed to acquire audio output: {0}")]
    Acquisition(#[from] AudioError),

    #[error("Failed to open listen feed: {0}")]
    Transport(String),

    #[error("Session start was cancelled by a stop request")]
    Cancelled,
}

struct SocketTask {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<FeedEnd>,
}

#[derive(Default)]
struct Resources {
    socket: Option<SocketTask>,
    sink: Option<PlaybackSink>,
}

struct Inner {
    state: SessionState,
    session_id: Option<Uuid>,
    listen_url: Option<String>,
    /// Set when `stop` arrives during `Starting`; honored once acquisition ends.
    stop_requested: bool,
    resources: Resources,
}

struct Shared {
    inner: Mutex<Inner>,
    output: AsyncMutex<Box<dyn AudioOutput>>,
    format: PlaybackFormat,
    state_tx: watch::Sender<SessionState>,
}

/// Handle to the relay pipeline. Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct RelaySession {
    shared: Arc<Shared>,
}

impl RelaySession {
    pub fn new(output: Box<dyn AudioOutput>, format: PlaybackFormat) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: SessionState::Idle,
                    session_id: None,
                    listen_url: None,
                    stop_requested: false,
                    resources: Resources::default(),
                }),
                output: AsyncMutex::new(output),
                format,
                state_tx,
            }),
        }
    }

    /// Session playing through the default output device.
    pub fn with_default_output(format: PlaybackFormat) -> Self {
        Self::new(Box::new(CpalOutput::new()), format)
    }

    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.shared.inner.lock().session_id
    }

    pub fn listen_url(&self) -> Option<String> {
        self.shared.inner.lock().listen_url.clone()
    }

    /// Start relaying the feed at `listen_url` to the output device.
    ///
    /// ## State Transition:
    /// Idle → Starting → Active, or back to Idle on any failure.
    pub async fn start(&self, listen_url: &str) -> Result<Uuid, SessionError> {
        let session_id = Uuid::new_v4();
        {
            let mut inner = self.shared.inner.lock();
            if inner.state != SessionState::Idle {
                warn!(state = inner.state.as_str(), "Audio is already playing.");
                return Err(SessionError::AlreadyActive);
            }
            inner.session_id = Some(session_id);
            inner.listen_url = Some(listen_url.to_string());
            inner.stop_requested = false;
            self.set_state(&mut inner, SessionState::Starting);
        }

        info!(%session_id, "Starting audio for listenUrl: {}", listen_url);

        match self.acquire(session_id, listen_url).await {
            Ok(()) => {
                info!(%session_id, "Audio session active");
                Ok(session_id)
            }
            Err(e) => {
                error!(%session_id, "Error starting audio: {}", e);
                let resources = {
                    let mut inner = self.shared.inner.lock();
                    self.set_state(&mut inner, SessionState::Stopping);
                    std::mem::take(&mut inner.resources)
                };
                self.release(Some(session_id), resources, true).await;
                Err(e)
            }
        }
    }

    /// Stop the session and release every resource.
    ///
    /// Idempotent: from `Idle` this does nothing. When a start or another stop is
    /// in flight, this waits until the session is back to `Idle`.
    pub async fn stop(&self) {
        let taken = {
            let mut inner = self.shared.inner.lock();
            match inner.state {
                SessionState::Idle => {
                    debug!("Stop requested while idle");
                    return;
                }
                SessionState::Starting => {
                    inner.stop_requested = true;
                    None
                }
                SessionState::Stopping => None,
                SessionState::Active => {
                    self.set_state(&mut inner, SessionState::Stopping);
                    Some((inner.session_id, std::mem::take(&mut inner.resources)))
                }
            }
        };

        match taken {
            Some((session_id, resources)) => {
                info!(?session_id, "Stopping audio.");
                self.release(session_id, resources, true).await;
            }
            None => self.wait_idle().await,
        }
    }

    /// Resolve once the session is `Idle`.
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.state_tx.subscribe();
        let _ = rx.wait_for(|state| *state == SessionState::Idle).await;
    }

    async fn acquire(&self, session_id: Uuid, listen_url: &str) -> Result<(), SessionError> {
        {
            let mut output = self.shared.output.lock().await;
            output.open(self.shared.format).await?;
            let sink = output.attach()?;
            self.shared.inner.lock().resources.sink = Some(sink);
        }

        if self.shared.inner.lock().stop_requested {
            return Err(SessionError::Cancelled);
        }

        let stream = websocket::connect(listen_url)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        let mut inner = self.shared.inner.lock();
        if inner.stop_requested {
            return Err(SessionError::Cancelled);
        }
        let sink = inner
            .resources
            .sink
            .clone()
            .ok_or(SessionError::Acquisition(AudioError::NotAttached))?;

        // Spawned under the lock so the feed task cannot observe `Starting`.
        let (shutdown, shutdown_rx) = oneshot::channel();
        let session = self.clone();
        let task = tokio::spawn(async move {
            let end = websocket::pump(stream, sink, shutdown_rx, session_id).await;
            if !matches!(end, FeedEnd::Shutdown(_)) {
                session.on_feed_end(session_id, &end).await;
            }
            end
        });

        inner.resources.socket = Some(SocketTask { shutdown, task });
        self.set_state(&mut inner, SessionState::Active);
        Ok(())
    }

    /// Automatic teardown after the remote side closed or broke the socket.
    async fn on_feed_end(&self, session_id: Uuid, end: &FeedEnd) {
        let resources = {
            let mut inner = self.shared.inner.lock();
            if inner.state != SessionState::Active || inner.session_id != Some(session_id) {
                return;
            }
            self.set_state(&mut inner, SessionState::Stopping);
            std::mem::take(&mut inner.resources)
        };

        match end {
            FeedEnd::Failed(reason) => {
                warn!(%session_id, "Listen feed failed ({}), stopping audio", reason)
            }
            _ => info!(%session_id, "Listen feed closed, stopping audio"),
        }
        // Called from inside the feed task, so its handle must not be awaited.
        self.release(Some(session_id), resources, false).await;
    }

    /// Best-effort release of everything a session holds, ending in `Idle`.
    async fn release(&self, session_id: Option<Uuid>, resources: Resources, join_socket: bool) {
        let mut failures: Vec<String> = Vec::new();

        if let Some(socket) = resources.socket {
            if join_socket {
                let _ = socket.shutdown.send(());
                match socket.task.await {
                    Ok(FeedEnd::Shutdown(Err(e))) => failures.push(format!("socket close: {}", e)),
                    Ok(_) => {}
                    Err(e) => failures.push(format!("socket task: {}", e)),
                }
            }
        }
        drop(resources.sink);

        {
            let mut output = self.shared.output.lock().await;
            if let Err(e) = output.detach() {
                failures.push(format!("pipeline detach: {}", e));
            }
            if let Err(e) = output.close().await {
                failures.push(format!("device close: {}", e));
            }
        }

        if failures.is_empty() {
            info!(?session_id, "Audio stopped");
        } else {
            warn!(
                ?session_id,
                ?failures,
                "Audio stopped with {} teardown error(s)",
                failures.len()
            );
        }

        let mut inner = self.shared.inner.lock();
        inner.session_id = None;
        inner.listen_url = None;
        inner.stop_requested = false;
        self.set_state(&mut inner, SessionState::Idle);
    }

    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        inner.state = state;
        self.shared.state_tx.send_replace(state);
    }
}
