//! Per-connection protocol lifecycle: initialize → shutdown → exit.
use crate::lsp::types::{ResponseError, INVALID_REQUEST, SERVER_NOT_INITIALIZED};
use lsp_types::notification::{Exit, Notification as _};
use lsp_types::request::{Initialize, Request as _, Shutdown};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Uninitialized,
    Initialized,
    ShuttingDown,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("transport must be initialized")]
    NotInitialized,
    #[error("language transport is already initialized")]
    AlreadyInitialized,
    #[error("transport is shutting down")]
    ShuttingDown,
    #[error("transport is terminated")]
    Terminated,
}

impl From<LifecycleError> for ResponseError {
    fn from(error: LifecycleError) -> Self {
        let code = match error {
            LifecycleError::NotInitialized => SERVER_NOT_INITIALIZED,
            _ => INVALID_REQUEST,
        };
        ResponseError::new(code, error.to_string())
    }
}

pub struct Lifecycle {
    state: Mutex<State>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Lifecycle::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Lifecycle {
            state: Mutex::new(State::Uninitialized),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> State {
        *self.lock()
    }

    /// Decide whether `method` may run in the current state.
    pub fn check(&self, method: &str) -> Result<(), LifecycleError> {
        if method == Exit::METHOD {
            return Ok(());
        }
        match self.state() {
            State::Uninitialized if method == Initialize::METHOD => Ok(()),
            State::Uninitialized => Err(LifecycleError::NotInitialized),
            State::Initialized if method == Initialize::METHOD => {
                Err(LifecycleError::AlreadyInitialized)
            }
            State::Initialized => Ok(()),
            // a repeated shutdown is tolerated
            State::ShuttingDown if method == Shutdown::METHOD => Ok(()),
            State::ShuttingDown => Err(LifecycleError::ShuttingDown),
            State::Terminated => Err(LifecycleError::Terminated),
        }
    }

    pub fn initialize(&self) -> Result<(), LifecycleError> {
        let mut state = self.lock();
        match *state {
            State::Uninitialized => {
                *state = State::Initialized;
                Ok(())
            }
            State::Initialized => Err(LifecycleError::AlreadyInitialized),
            State::ShuttingDown => Err(LifecycleError::ShuttingDown),
            State::Terminated => Err(LifecycleError::Terminated),
        }
    }

    pub fn shutdown(&self) {
        let mut state = self.lock();
        match *state {
            State::ShuttingDown => {
                warn!("transport received a shutdown request after it was already shut down")
            }
            State::Terminated => return,
            _ => {}
        }
        *state = State::ShuttingDown;
    }

    /// Move to `Terminated`, returning the state `exit` arrived in.
    pub fn exit(&self) -> State {
        let mut state = self.lock();
        let previous = *state;
        *state = State::Terminated;
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninitialized_only_accepts_initialize_and_exit() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.check("initialize"), Ok(()));
        assert_eq!(lifecycle.check("exit"), Ok(()));
        assert_eq!(
            lifecycle.check("textDocument/hover"),
            Err(LifecycleError::NotInitialized)
        );
        assert_eq!(lifecycle.check("shutdown"), Err(LifecycleError::NotInitialized));
        assert_eq!(
            lifecycle.check("$/cancelRequest"),
            Err(LifecycleError::NotInitialized)
        );
    }

    #[test]
    fn test_initialize_once() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.initialize(), Ok(()));
        assert_eq!(lifecycle.state(), State::Initialized);
        assert_eq!(lifecycle.check("initialize"), Err(LifecycleError::AlreadyInitialized));
        assert_eq!(lifecycle.initialize(), Err(LifecycleError::AlreadyInitialized));
        assert_eq!(lifecycle.check("initialized"), Ok(()));
        assert_eq!(lifecycle.check("textDocument/definition"), Ok(()));
    }

    #[test]
    fn test_shutting_down_rejects_all_but_exit_and_shutdown() {
        let lifecycle = Lifecycle::new();
        lifecycle.initialize().unwrap();
        lifecycle.shutdown();
        lifecycle.shutdown();
        assert_eq!(lifecycle.state(), State::ShuttingDown);
        assert_eq!(
            lifecycle.check("textDocument/definition"),
            Err(LifecycleError::ShuttingDown)
        );
        assert_eq!(lifecycle.check("shutdown"), Ok(()));
        assert_eq!(lifecycle.check("initialized"), Err(LifecycleError::ShuttingDown));
        assert_eq!(lifecycle.check("initialize"), Err(LifecycleError::ShuttingDown));
        assert_eq!(lifecycle.check("exit"), Ok(()));
        assert_eq!(lifecycle.exit(), State::ShuttingDown);
        assert_eq!(lifecycle.state(), State::Terminated);
    }

    #[test]
    fn test_exit_without_shutdown_force_terminates() {
        let lifecycle = Lifecycle::new();
        lifecycle.initialize().unwrap();
        assert_eq!(lifecycle.exit(), State::Initialized);
        assert_eq!(lifecycle.check("textDocument/hover"), Err(LifecycleError::Terminated));
    }

    #[test]
    fn test_error_codes() {
        let error: ResponseError = LifecycleError::NotInitialized.into();
        assert_eq!(error.code, SERVER_NOT_INITIALIZED);
        assert_eq!(error.message, "transport must be initialized");

        let error: ResponseError = LifecycleError::ShuttingDown.into();
        assert_eq!(error.code, INVALID_REQUEST);
        assert_eq!(error.message, "transport is shutting down");
    }
}
