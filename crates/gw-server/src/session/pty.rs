//! PTY negotiation and window tracking
//!
//! A session starts without a PTY. A `pty-req` moves it to `PtyRequested`
//! while the PTY policy is consulted, then to `PtyActive` or back to `NoPty`.
//! Once active, `window-change` requests update the window; there is no way
//! back from `PtyActive` short of closing the session.

use async_trait::async_trait;
use tokio::sync::watch;

use gw_core::config::WindowLimits;
use gw_core::error::SessionError;
use gw_core::traits::PtyCallback;
use gw_core::types::PTY_CAPABILITY;
use gw_core::Permissions;
use gw_protocol::{Pty, Window};

/// Where a session is in PTY negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtyPhase {
    /// No PTY requested, or the last request was denied
    NoPty,
    /// A request is being evaluated
    PtyRequested,
    /// PTY allocated
    PtyActive,
}

/// PTY state of one session
#[derive(Debug)]
pub struct PtyState {
    phase: PtyPhase,
    term: String,
    window: watch::Sender<Window>,
    limits: WindowLimits,
}

impl PtyState {
    /// Fresh state enforcing `limits`
    pub fn new(limits: WindowLimits) -> Self {
        let (window, _) = watch::channel(Window::default());
        Self {
            phase: PtyPhase::NoPty,
            term: String::new(),
            window,
            limits,
        }
    }

    /// Current phase
    pub fn phase(&self) -> PtyPhase {
        self.phase
    }

    /// The allocated PTY, if any
    pub fn pty(&self) -> Option<Pty> {
        (self.phase == PtyPhase::PtyActive).then(|| Pty {
            window: *self.window.borrow(),
            term: self.term.clone(),
        })
    }

    /// Current window of the allocated PTY
    pub fn window(&self) -> Option<Window> {
        (self.phase == PtyPhase::PtyActive).then(|| *self.window.borrow())
    }

    /// Subscribe to window changes. `None` until a PTY is active.
    ///
    /// The receiver always holds the latest window; intermediate sizes may be
    /// skipped by a slow reader.
    pub fn subscribe(&self) -> Option<watch::Receiver<Window>> {
        (self.phase == PtyPhase::PtyActive).then(|| self.window.subscribe())
    }

    /// Start evaluating a `pty-req`
    pub fn begin_request(&mut self, window: Window) -> Result<(), SessionError> {
        if self.phase != PtyPhase::NoPty {
            return Err(SessionError::PtyAlreadyAllocated);
        }
        self.check(window)?;
        self.phase = PtyPhase::PtyRequested;
        Ok(())
    }

    /// Policy accepted the pending request
    pub fn activate(&mut self, term: impl Into<String>, window: Window) {
        if self.phase != PtyPhase::PtyRequested {
            return;
        }
        self.term = term.into();
        self.window.send_replace(window);
        self.phase = PtyPhase::PtyActive;
    }

    /// Policy denied the pending request
    pub fn reject(&mut self) {
        if self.phase == PtyPhase::PtyRequested {
            self.phase = PtyPhase::NoPty;
        }
    }

    /// Apply a `window-change`
    ///
    /// Returns `Ok(false)` when no PTY is active; the request is ignored then.
    /// An oversized window is rejected and the previous one kept.
    pub fn resize(&mut self, window: Window) -> Result<bool, SessionError> {
        if self.phase != PtyPhase::PtyActive {
            return Ok(false);
        }
        self.check(window)?;
        self.window.send_replace(window);
        Ok(true)
    }

    fn check(&self, window: Window) -> Result<(), SessionError> {
        if self.limits.allows(window) {
            Ok(())
        } else {
            Err(SessionError::WindowTooLarge {
                width: window.width,
                height: window.height,
                max_width: self.limits.max_width,
                max_height: self.limits.max_height,
            })
        }
    }
}

/// PTY policy granting a PTY to holders of the `pty` capability
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityPty;

#[async_trait]
impl PtyCallback for CapabilityPty {
    async fn allow_pty(&self, _user: &str, permissions: &Permissions) -> bool {
        permissions.has_capability(PTY_CAPABILITY)
    }
}
