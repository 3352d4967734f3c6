//! State owned by one accepted connection.
use crate::server::cancel::CancellationRegistry;
use crate::server::lifecycle::Lifecycle;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct ConnectionSession {
    id: u64,
    lifecycle: Lifecycle,
    registry: Arc<CancellationRegistry>,
    token: CancellationToken,
}

impl ConnectionSession {
    pub fn new(id: u64) -> Self {
        let token = CancellationToken::new();
        ConnectionSession {
            id,
            lifecycle: Lifecycle::new(),
            registry: Arc::new(CancellationRegistry::new(token.clone())),
            token,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn registry(&self) -> &Arc<CancellationRegistry> {
        &self.registry
    }

    /// Background scope of the connection; every request scope derives from it.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Signal every scope on this connection.
    pub fn close(&self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::RequestId;
    use crate::server::lifecycle::State;

    #[test]
    fn test_close_cancels_registered_requests() {
        let session = ConnectionSession::new(3);
        assert_eq!(session.id(), 3);
        assert_eq!(session.lifecycle().state(), State::Uninitialized);

        let registration = session.registry().register(RequestId::Num(1));
        session.close();
        assert!(registration.token().is_cancelled());
        assert!(session.token().is_cancelled());
    }

    #[test]
    fn test_sessions_are_independent() {
        let first = ConnectionSession::new(1);
        let second = ConnectionSession::new(2);
        first.lifecycle().initialize().unwrap();

        assert_eq!(first.lifecycle().state(), State::Initialized);
        assert_eq!(second.lifecycle().state(), State::Uninitialized);
    }
}
