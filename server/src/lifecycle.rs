//! Session lifecycle state machine and the admission gate built on it.
//!
//! ```text
//! Uninitialized --initialize--> Initializing --ok--> Initialized --shutdown--> ShuttingDown
//!       ^                            |                                            |
//!       +-----------failed-----------+                               exit (any state) --> Exited
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

use lsp_types::notification::{Exit, Notification as _};
use lsp_types::request::{Initialize, Request as _};
use lspkit_jsonrpc::{Gate, ResponseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Initialized,
    ShuttingDown,
    Exited,
}

#[derive(Debug)]
struct Inner {
    state: LifecycleState,
    exited_after_shutdown: bool,
}

/// Shared lifecycle state. Also the dispatcher's [`Gate`].
#[derive(Debug)]
pub struct Lifecycle {
    inner: Mutex<Inner>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: LifecycleState::Uninitialized,
                exited_after_shutdown: false,
            }),
        }
    }
}

impl Lifecycle {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    /// Whether `exit` arrived after a completed `shutdown`.
    #[must_use]
    pub fn exited_after_shutdown(&self) -> bool {
        let inner = self.lock();
        inner.state == LifecycleState::Exited && inner.exited_after_shutdown
    }

    /// Claim the handshake. Only one may run, and only once per session.
    pub(crate) fn begin_initialize(&self) -> Result<(), ResponseError> {
        let mut inner = self.lock();
        match inner.state {
            LifecycleState::Uninitialized => {
                inner.state = LifecycleState::Initializing;
                Ok(())
            }
            LifecycleState::Initializing => Err(ResponseError::invalid_request(
                "initialize is already in progress",
            )),
            LifecycleState::Initialized => {
                Err(ResponseError::invalid_request("server is already initialized"))
            }
            LifecycleState::ShuttingDown | LifecycleState::Exited => {
                Err(ResponseError::invalid_request("server is shutting down"))
            }
        }
    }

    pub(crate) fn finish_initialize(&self, succeeded: bool) {
        let mut inner = self.lock();
        if inner.state == LifecycleState::Initializing {
            inner.state = if succeeded {
                LifecycleState::Initialized
            } else {
                LifecycleState::Uninitialized
            };
        }
    }

    pub(crate) fn begin_shutdown(&self) {
        let mut inner = self.lock();
        if inner.state == LifecycleState::Initialized {
            inner.state = LifecycleState::ShuttingDown;
        }
    }

    pub(crate) fn exit(&self) {
        let mut inner = self.lock();
        inner.exited_after_shutdown = inner.state == LifecycleState::ShuttingDown;
        inner.state = LifecycleState::Exited;
    }
}

impl Gate for Lifecycle {
    fn admit_request(&self, method: &str) -> Result<(), ResponseError> {
        // The handshake handler validates state itself.
        if method == Initialize::METHOD {
            return Ok(());
        }
        match self.state() {
            LifecycleState::Uninitialized | LifecycleState::Initializing => {
                Err(ResponseError::server_not_initialized())
            }
            LifecycleState::Initialized => Ok(()),
            LifecycleState::ShuttingDown | LifecycleState::Exited => Err(
                ResponseError::invalid_request(format!("{method} received after shutdown")),
            ),
        }
    }

    fn admit_notification(&self, method: &str) -> bool {
        method == Exit::METHOD || self.state() == LifecycleState::Initialized
    }
}

/// Reverts an unfinished handshake, including one whose hook panicked.
pub(crate) struct HandshakeGuard<'a> {
    lifecycle: &'a Lifecycle,
    committed: bool,
}

impl<'a> HandshakeGuard<'a> {
    pub(crate) fn begin(lifecycle: &'a Lifecycle) -> Result<Self, ResponseError> {
        lifecycle.begin_initialize()?;
        Ok(Self {
            lifecycle,
            committed: false,
        })
    }

    pub(crate) fn commit(mut self) {
        self.committed = true;
        self.lifecycle.finish_initialize(true);
    }
}

impl Drop for HandshakeGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.lifecycle.finish_initialize(false);
        }
    }
}
