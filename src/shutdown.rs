//! Shutdown Coordinator
//!
//! On SIGINT or SIGTERM: best-effort removal of this process's candidate
//! node (so the next candidate is promoted without waiting out the
//! ephemeral-node expiry), session teardown, and a shutdown broadcast that
//! unwinds the election loop and the serving select. Runs exactly once;
//! further signals while cleanup is in progress are ignored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

use crate::coordination::CoordinationClient;
use crate::election::CandidateHandle;
use crate::error::Error;

/// Coordinates graceful teardown on termination signals
pub struct ShutdownCoordinator<C: CoordinationClient> {
    session: Option<Arc<C>>,
    candidate: CandidateHandle,
    shutdown_tx: watch::Sender<bool>,
    grace: Duration,
    fired: AtomicBool,
}

impl<C: CoordinationClient> ShutdownCoordinator<C> {
    /// `session` is None when the initial connect failed; cleanup then
    /// degrades to just broadcasting shutdown.
    pub fn new(
        session: Option<Arc<C>>,
        candidate: CandidateHandle,
        shutdown_tx: watch::Sender<bool>,
        grace: Duration,
    ) -> Self {
        Self {
            session,
            candidate,
            shutdown_tx,
            grace,
            fired: AtomicBool::new(false),
        }
    }

    /// Wait for SIGINT or SIGTERM, then run cleanup once. Resolves after
    /// cleanup so the caller can exit.
    pub async fn run(self) {
        let mut sigint = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::error!("failed to install SIGINT handler: {}", e);
                return;
            }
        };
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => tracing::info!("received SIGINT"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        }

        self.trigger().await;
    }

    /// Run the cleanup sequence once; later invocations are no-ops
    pub async fn trigger(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            tracing::debug!("shutdown already in progress");
            return;
        }

        // Unblock the election loop and the serving select first, so the
        // process is winding down even if cleanup stalls
        let _ = self.shutdown_tx.send(true);

        if timeout(self.grace, self.cleanup()).await.is_err() {
            tracing::warn!("shutdown cleanup exceeded {:?}, abandoning", self.grace);
        }

        tracing::info!("shutting down gracefully");
    }

    async fn cleanup(&self) {
        let session = match &self.session {
            Some(session) => session,
            None => return,
        };

        // Take the node out of the shared handle so deletion can never run
        // twice for the same node
        let node = self.candidate.write().await.take();
        if let Some(node) = node {
            if session.is_connected().await {
                match session.exists(&node.path).await {
                    Ok(true) => match session.delete(&node.path).await {
                        Ok(()) => tracing::info!("deleted candidate node {}", node.path),
                        Err(e) => {
                            // Ephemeral expiry is the fallback safety net
                            let e = Error::Cleanup(e.to_string());
                            tracing::error!("failed to delete candidate node {}: {}", node.path, e);
                        }
                    },
                    Ok(false) => tracing::debug!("candidate node {} already gone", node.path),
                    Err(e) => {
                        let e = Error::Cleanup(e.to_string());
                        tracing::error!("could not check candidate node {}: {}", node.path, e);
                    }
                }
            } else {
                tracing::warn!(
                    "session already dead, leaving {} to ephemeral expiry",
                    node.path
                );
            }
        }

        session.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::sync::RwLock;

    use crate::coordination::testing::MockCoordination;
    use crate::election::CandidateNode;

    fn candidate_with(path: &str) -> CandidateHandle {
        Arc::new(RwLock::new(Some(CandidateNode {
            path: path.to_string(),
            created_at: Utc::now(),
        })))
    }

    fn coordinator(
        mock: Arc<MockCoordination>,
        candidate: CandidateHandle,
    ) -> (ShutdownCoordinator<MockCoordination>, watch::Receiver<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        (
            ShutdownCoordinator::new(
                Some(mock),
                candidate,
                shutdown_tx,
                Duration::from_secs(5),
            ),
            shutdown_rx,
        )
    }

    #[tokio::test]
    async fn test_deletes_node_and_closes_session() {
        let mock = Arc::new(MockCoordination::new(1, true));
        let path = mock
            .create_ephemeral_sequential("/api-leader/node-")
            .await
            .unwrap();
        let candidate = candidate_with(&path);
        let (shutdown, shutdown_rx) = coordinator(Arc::clone(&mock), Arc::clone(&candidate));

        shutdown.trigger().await;

        assert_eq!(mock.deleted_paths(), vec![path]);
        assert!(!mock.is_connected().await);
        assert!(*shutdown_rx.borrow());
        assert!(candidate.read().await.is_none());
    }

    #[tokio::test]
    async fn test_second_trigger_is_ignored() {
        let mock = Arc::new(MockCoordination::new(1, true));
        let path = mock
            .create_ephemeral_sequential("/api-leader/node-")
            .await
            .unwrap();
        let (shutdown, _shutdown_rx) = coordinator(Arc::clone(&mock), candidate_with(&path));

        shutdown.trigger().await;
        shutdown.trigger().await;

        assert_eq!(mock.delete_count(), 1);
    }

    #[tokio::test]
    async fn test_vanished_node_skips_deletion() {
        let mock = Arc::new(MockCoordination::new(1, true));
        // A node the coordination service no longer knows about
        let (shutdown, _shutdown_rx) =
            coordinator(Arc::clone(&mock), candidate_with("/api-leader/node-0000000042"));

        shutdown.trigger().await;

        assert_eq!(mock.delete_count(), 0);
        assert!(!mock.is_connected().await);
    }

    #[tokio::test]
    async fn test_dead_session_skips_deletion() {
        let mock = Arc::new(MockCoordination::new(1, true));
        let path = mock
            .create_ephemeral_sequential("/api-leader/node-")
            .await
            .unwrap();
        mock.disconnect();
        let (shutdown, _shutdown_rx) = coordinator(Arc::clone(&mock), candidate_with(&path));

        shutdown.trigger().await;

        assert_eq!(mock.delete_count(), 0);
    }

    #[tokio::test]
    async fn test_no_session_still_broadcasts() {
        let candidate: CandidateHandle = Arc::new(RwLock::new(None));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown: ShutdownCoordinator<MockCoordination> =
            ShutdownCoordinator::new(None, candidate, shutdown_tx, Duration::from_secs(5));

        shutdown.trigger().await;

        assert!(*shutdown_rx.borrow());
    }
}
