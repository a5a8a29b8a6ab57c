//! Out-of-band delivery of RESP3 push frames to whoever is currently listening.
//!
//! Grounded on the lineage's `PushManager`: a swappable sender behind an `ArcSwap` so the
//! multiplexer can hand off a push to a receiver that may be replaced (or absent) at any time
//! without taking a lock on the hot path.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;

use crate::resp3::Node;

/// One complete push message: the root `push` node followed by its children, exactly as produced
/// by the parser for that top-level message.
#[derive(Debug, Clone)]
pub struct PushMessage {
    pub nodes: Vec<Node>,
}

/// Holds the current push receiver, if any, and delivers messages to it without blocking the
/// reader loop on a receiver that never reads.
#[derive(Debug)]
pub struct PushManager {
    sender: Arc<ArcSwap<Option<mpsc::UnboundedSender<PushMessage>>>>,
}

impl Default for PushManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PushManager {
    pub fn new() -> Self {
        PushManager {
            sender: Arc::new(ArcSwap::from_pointee(None)),
        }
    }

    /// Installs a new receiver, replacing any previous one. Returns the receiving half.
    pub fn replace_receiver(&self) -> mpsc::UnboundedReceiver<PushMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sender.store(Arc::new(Some(tx)));
        rx
    }

    pub fn clear_receiver(&self) {
        self.sender.store(Arc::new(None));
    }

    /// Attempts delivery. Returns `true` if a receiver was present and still listening.
    pub fn try_send(&self, message: PushMessage) -> bool {
        match &**self.sender.load() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    pub fn has_receiver(&self) -> bool {
        self.sender.load().is_some()
    }
}

impl Clone for PushManager {
    fn clone(&self) -> Self {
        PushManager {
            sender: Arc::clone(&self.sender),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_the_installed_receiver() {
        let manager = PushManager::new();
        let mut rx = manager.replace_receiver();
        assert!(manager.try_send(PushMessage { nodes: vec![] }));
        assert!(rx.recv().await.is_some());
    }

    #[test]
    fn no_receiver_reports_failure_without_panicking() {
        let manager = PushManager::new();
        assert!(!manager.try_send(PushMessage { nodes: vec![] }));
    }

    #[tokio::test]
    async fn replacing_the_receiver_drops_the_old_channel() {
        let manager = PushManager::new();
        let old_rx = manager.replace_receiver();
        let mut new_rx = manager.replace_receiver();
        assert!(manager.try_send(PushMessage { nodes: vec![] }));
        drop(old_rx);
        assert!(new_rx.recv().await.is_some());
    }

    #[test]
    fn dropped_receiver_makes_try_send_report_failure() {
        let manager = PushManager::new();
        let rx = manager.replace_receiver();
        drop(rx);
        assert!(!manager.try_send(PushMessage { nodes: vec![] }));
    }

    #[test]
    fn clone_shares_the_same_underlying_receiver() {
        let manager = PushManager::new();
        let clone = manager.clone();
        let mut rx = clone.replace_receiver();
        assert!(manager.try_send(PushMessage { nodes: vec![] }));
        assert!(rx.try_recv().is_ok());
    }
}
