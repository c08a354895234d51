use parking_lot::RwLock;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::deriv::requests::OutboundRequest;

/// Write side of the current session.
///
/// Holds the sender half of the session's outbound channel while a transport
/// is open. Sending while detached is a no-op that reports `false`, matching
/// the fire-and-forget semantics of every outbound request.
#[derive(Default)]
pub struct Outbox {
    tx: RwLock<Option<UnboundedSender<OutboundRequest>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, tx: UnboundedSender<OutboundRequest>) {
        *self.tx.write() = Some(tx);
    }

    pub fn detach(&self) {
        *self.tx.write() = None;
    }

    #[cfg(test)]
    pub fn is_attached(&self) -> bool {
        self.tx.read().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Queue `request` for the transport. Returns `false` when no session is
    /// open or the session has already shut down.
    pub fn send(&self, request: OutboundRequest) -> bool {
        let guard = self.tx.read();
        let Some(tx) = guard.as_ref() else {
            debug!(kind = request.kind(), "no open session, request dropped");
            return false;
        };
        let kind = request.kind();
        match tx.send(request) {
            Ok(()) => true,
            Err(_) => {
                debug!(kind, "session closed, request dropped");
                false
            }
        }
    }
}
