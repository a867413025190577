//! The session object handed to handlers
//!
//! A [`Session`] is one "session" channel of an authenticated connection.
//! The connection loop feeds it requests (PTY, env, signals, stdin) and the
//! handler reads and writes through it. Both sides hold clones of the same
//! shared state.
//!
//! ```text
//! Opening --start--> Active --client EOF--> Closing --finish--> Closed
//!    |                  |                                        ^
//!    +------------------+---- close (either side) ---------------+
//! ```

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use gw_core::config::WindowLimits;
use gw_core::error::SessionError;
use gw_core::traits::{ChannelSink, PtyCallback};
use gw_core::{ConnectionId, Identity, Permissions, PublicKeyBytes, SessionId};
use gw_protocol::{ChannelId, Pty, Window};

use super::pty::PtyState;
use super::signal::{Delivery, SignalRouter, Signals};

/// Exit status reported when a handler panics without setting one
pub const PANIC_EXIT_STATUS: u32 = 255;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Channel open, handler not started
    Opening,
    /// Handler running
    Active,
    /// Client input finished or handler returned; output still flushing
    Closing,
    /// Channel closed; no further I/O
    Closed,
}

/// What the client asked the session to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launch {
    /// Interactive shell
    Shell,
    /// Single command
    Exec(String),
    /// Named subsystem, e.g. `sftp`
    Subsystem(String),
}

/// Connection-wide data every session of the connection shares
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub connection: ConnectionId,
    pub identity: Arc<Identity>,
    pub permissions: Arc<Permissions>,
    pub remote_addr: Arc<str>,
    pub sink: Arc<dyn ChannelSink>,
    pub limits: WindowLimits,
}

/// One interactive session
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    id: SessionId,
    channel: ChannelId,
    context: SessionContext,
    closed: CancellationToken,
    status: Mutex<Status>,
    pty: Mutex<PtyState>,
    signals: SignalRouter,
    stdin: AsyncMutex<mpsc::UnboundedReceiver<Bytes>>,
}

struct Status {
    state: SessionState,
    env: Vec<(String, String)>,
    launch: Option<Launch>,
    exit_status: Option<u32>,
    stdin: Option<mpsc::UnboundedSender<Bytes>>,
}

impl Session {
    pub(crate) fn new(channel: ChannelId, context: &SessionContext) -> Self {
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(Inner {
                id: SessionId::new(),
                channel,
                context: context.clone(),
                closed: CancellationToken::new(),
                status: Mutex::new(Status {
                    state: SessionState::Opening,
                    env: Vec::new(),
                    launch: None,
                    exit_status: None,
                    stdin: Some(stdin_tx),
                }),
                pty: Mutex::new(PtyState::new(context.limits)),
                signals: SignalRouter::new(),
                stdin: AsyncMutex::new(stdin_rx),
            }),
        }
    }

    /// Unique session ID
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Channel this session runs on
    pub fn channel(&self) -> ChannelId {
        self.inner.channel
    }

    /// Connection this session belongs to
    pub fn connection(&self) -> ConnectionId {
        self.inner.context.connection
    }

    /// Authenticated user name
    pub fn user(&self) -> &str {
        &self.inner.context.identity.user
    }

    /// Authenticated identity
    pub fn identity(&self) -> &Identity {
        &self.inner.context.identity
    }

    /// Key the client authenticated with, if it used one
    pub fn public_key(&self) -> Option<&PublicKeyBytes> {
        self.inner.context.identity.public_key.as_ref()
    }

    /// Permissions granted at authentication
    pub fn permissions(&self) -> &Permissions {
        &self.inner.context.permissions
    }

    /// Address of the remote peer
    pub fn remote_addr(&self) -> &str {
        &self.inner.context.remote_addr
    }

    /// What the client asked to run; `None` before start
    pub fn launch(&self) -> Option<Launch> {
        self.inner.status.lock().launch.clone()
    }

    /// The exec command line exactly as sent
    pub fn raw_command(&self) -> Option<String> {
        match self.launch() {
            Some(Launch::Exec(command)) => Some(command),
            _ => None,
        }
    }

    /// The exec command split on whitespace; empty for shells and subsystems
    pub fn command(&self) -> Vec<String> {
        self.raw_command()
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Requested subsystem name
    pub fn subsystem(&self) -> Option<String> {
        match self.launch() {
            Some(Launch::Subsystem(name)) => Some(name),
            _ => None,
        }
    }

    /// Environment variables sent before start, in arrival order
    pub fn environ(&self) -> Vec<(String, String)> {
        self.inner.status.lock().env.clone()
    }

    /// The allocated PTY with its current window
    pub fn pty(&self) -> Option<Pty> {
        self.inner.pty.lock().pty()
    }

    /// Current window of the allocated PTY
    pub fn window(&self) -> Option<Window> {
        self.inner.pty.lock().window()
    }

    /// Watch window changes. `None` without a PTY.
    pub fn window_changes(&self) -> Option<watch::Receiver<Window>> {
        self.inner.pty.lock().subscribe()
    }

    /// Take the signal stream. Only one caller gets it.
    pub fn signals(&self) -> Result<Signals, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        self.inner
            .signals
            .take_receiver()
            .ok_or(SessionError::SignalsTaken)
    }

    /// Read the next chunk of client input
    ///
    /// `Ok(None)` after the client sent EOF and everything before it was
    /// read. Fails with [`SessionError::Closed`] once the session closed.
    pub async fn read(&self) -> Result<Option<Bytes>, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        let mut stdin = tokio::select! {
            _ = self.inner.closed.cancelled() => return Err(SessionError::Closed),
            guard = self.inner.stdin.lock() => guard,
        };

        tokio::select! {
            biased;
            _ = self.inner.closed.cancelled() => Err(SessionError::Closed),
            data = stdin.recv() => Ok(data),
        }
    }

    /// Write to the client's stdout
    pub async fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        self.send(false, data).await
    }

    /// Write to the client's stderr
    pub async fn write_stderr(&self, data: &[u8]) -> Result<(), SessionError> {
        self.send(true, data).await
    }

    async fn send(&self, stderr: bool, data: &[u8]) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        let sink = &self.inner.context.sink;
        let channel = self.inner.channel;
        let data = Bytes::copy_from_slice(data);

        let result = tokio::select! {
            _ = self.inner.closed.cancelled() => return Err(SessionError::Closed),
            result = async {
                if stderr {
                    sink.extended_data(channel, 1, data).await
                } else {
                    sink.data(channel, data).await
                }
            } => result,
        };

        result.map_err(|e| SessionError::Transport(e.to_string()))
    }

    /// Record the exit status sent when the handler returns
    pub fn set_exit_status(&self, code: u32) -> Result<(), SessionError> {
        let mut status = self.inner.status.lock();
        if status.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }
        if status.exit_status.is_some() {
            return Err(SessionError::ExitStatusAlreadySet);
        }
        status.exit_status = Some(code);
        Ok(())
    }

    /// Exit status, once set
    pub fn exit_status(&self) -> Option<u32> {
        self.inner.status.lock().exit_status
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.inner.status.lock().state
    }

    /// Whether the session reached [`SessionState::Closed`]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Wait until the session is closed
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    /// Close the channel without reporting an exit status
    pub async fn close(&self) {
        if !self.mark_closed() {
            return;
        }
        if let Err(e) = self.inner.context.sink.close(self.inner.channel).await {
            tracing::debug!("Closing {} of session {}: {}", self.inner.channel, self.inner.id, e);
        }
    }

    pub(crate) async fn request_pty(
        &self,
        term: &str,
        window: Window,
        policy: Option<&dyn PtyCallback>,
    ) -> Result<(), SessionError> {
        self.ensure_opening()?;
        self.inner.pty.lock().begin_request(window)?;

        // No policy configured means no PTYs
        let allowed = match policy {
            Some(policy) => policy.allow_pty(self.user(), self.permissions()).await,
            None => false,
        };

        let mut pty = self.inner.pty.lock();
        if allowed && !self.is_closed() {
            pty.activate(term, window);
            Ok(())
        } else {
            pty.reject();
            Err(SessionError::PtyDenied)
        }
    }

    /// Returns whether the window was applied; `Ok(false)` without a PTY
    pub(crate) fn resize(&self, window: Window) -> Result<bool, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        self.inner.pty.lock().resize(window)
    }

    pub(crate) fn set_env(&self, name: String, value: String) -> Result<(), SessionError> {
        self.ensure_opening()?;
        self.inner.status.lock().env.push((name, value));
        Ok(())
    }

    pub(crate) fn deliver_signal(&self, token: &str) -> Result<Delivery, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        Ok(self.inner.signals.deliver_wire(token))
    }

    pub(crate) fn push_stdin(&self, data: Bytes) -> Result<(), SessionError> {
        let status = self.inner.status.lock();
        if status.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }
        match &status.stdin {
            Some(tx) => tx.send(data).map_err(|_| SessionError::Closed),
            None => {
                tracing::trace!("Dropping {} bytes after EOF on {}", data.len(), self.inner.id);
                Ok(())
            }
        }
    }

    pub(crate) fn stdin_eof(&self) {
        let mut status = self.inner.status.lock();
        status.stdin = None;
        if status.state == SessionState::Active {
            status.state = SessionState::Closing;
        }
    }

    /// Move from `Opening` to `Active`. Succeeds at most once.
    pub(crate) fn start(&self, launch: Launch) -> Result<(), SessionError> {
        let mut status = self.inner.status.lock();
        match status.state {
            SessionState::Opening => {}
            SessionState::Closed => return Err(SessionError::Closed),
            SessionState::Active | SessionState::Closing => {
                return Err(SessionError::AlreadyStarted)
            }
        }
        status.launch = Some(launch);
        status.state = if status.stdin.is_some() {
            SessionState::Active
        } else {
            SessionState::Closing
        };
        Ok(())
    }

    /// Close from the connection side (client close or teardown)
    pub(crate) fn shutdown(&self) -> bool {
        self.mark_closed()
    }

    /// Report the exit status, then EOF and close the channel
    pub(crate) async fn finish(&self, panicked: bool) {
        let code = {
            let mut status = self.inner.status.lock();
            if status.state == SessionState::Closed {
                return;
            }
            status.state = SessionState::Closing;
            status.stdin = None;
            let fallback = if panicked { PANIC_EXIT_STATUS } else { 0 };
            *status.exit_status.get_or_insert(fallback)
        };

        let sink = &self.inner.context.sink;
        let channel = self.inner.channel;
        if let Err(e) = sink.exit_status(channel, code).await {
            tracing::debug!("Sending exit status on {}: {}", channel, e);
        }
        if let Err(e) = sink.eof(channel).await {
            tracing::debug!("Sending EOF on {}: {}", channel, e);
        }
        if self.mark_closed() {
            if let Err(e) = sink.close(channel).await {
                tracing::debug!("Closing {}: {}", channel, e);
            }
        }
    }

    fn ensure_opening(&self) -> Result<(), SessionError> {
        match self.inner.status.lock().state {
            SessionState::Opening => Ok(()),
            SessionState::Closed => Err(SessionError::Closed),
            SessionState::Active | SessionState::Closing => Err(SessionError::AlreadyActive),
        }
    }

    /// Returns false if the session was already closed
    fn mark_closed(&self) -> bool {
        {
            let mut status = self.inner.status.lock();
            if status.state == SessionState::Closed {
                return false;
            }
            status.state = SessionState::Closed;
            status.stdin = None;
        }
        self.inner.signals.close();
        self.inner.closed.cancel();
        true
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("channel", &self.inner.channel)
            .field("user", &self.user())
            .field("state", &self.state())
            .finish()
    }
}
