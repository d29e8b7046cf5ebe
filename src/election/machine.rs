//! Leader Election State Machine
//!
//! Drives the process from unregistered to leader or sustained follower,
//! keeping the leadership gate in sync with the coordination service's view
//! of sibling ordering. One background task runs the loop; watch
//! notifications arrive over a channel from the session's reader task.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch, RwLock};

use crate::coordination::{CoordinationClient, WatchedEvent};
use crate::election::retry::RetryPolicy;
use crate::election::role::{LeadershipGate, Role};
use crate::error::{Error, Result};

/// Candidate node name prefix; the coordination service appends the
/// zero-padded sequence suffix
const CANDIDATE_PREFIX: &str = "node-";

/// Election states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    /// No candidate node registered
    Unregistered,
    /// Candidate node created, role not yet evaluated
    Candidate,
    /// Waiting behind a smaller sibling
    Follower,
    /// Smallest sibling; election procedure terminated
    Leader,
}

/// The ephemeral candidate node owned by this process
#[derive(Debug, Clone, Serialize)]
pub struct CandidateNode {
    /// Full path assigned by the coordination service
    pub path: String,
    /// When this process created the node
    pub created_at: DateTime<Utc>,
}

impl CandidateNode {
    /// The node's name under the parent path
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Shared handle to the candidate node. Written only by the election loop;
/// read by the status endpoint; drained exactly once by shutdown.
pub type CandidateHandle = Arc<RwLock<Option<CandidateNode>>>;

/// Outcome of one pass over the election algorithm
enum EvalOutcome {
    Decided(Role),
    /// Own node vanished from the sibling set; re-register immediately
    Reregister,
}

/// Compute this process's role from a sibling snapshot.
///
/// Sequence suffixes are zero-padded to fixed width by the coordination
/// service, so lexicographic order equals numeric order.
fn evaluate(own_path: &str, mut siblings: Vec<String>) -> Result<EvalOutcome> {
    if siblings.is_empty() {
        // Race with another process's deletion; never assume leadership
        return Err(Error::Coordination("sibling set is empty".to_string()));
    }

    let own_name = own_path.rsplit('/').next().unwrap_or(own_path);
    siblings.sort();

    if !siblings.iter().any(|name| name == own_name) {
        return Ok(EvalOutcome::Reregister);
    }

    if siblings[0] == own_name {
        Ok(EvalOutcome::Decided(Role::Leader))
    } else {
        Ok(EvalOutcome::Decided(Role::Follower))
    }
}

/// Leader election coordinator
pub struct LeaderElector<C: CoordinationClient> {
    session: Arc<C>,
    gate: Arc<LeadershipGate>,
    candidate: CandidateHandle,
    election_path: String,
    retry: RetryPolicy,
    watch_rx: mpsc::Receiver<WatchedEvent>,
    shutdown_rx: watch::Receiver<bool>,
    state: ElectionState,
    last_role: Option<Role>,
    transitions: u64,
}

impl<C: CoordinationClient> LeaderElector<C> {
    pub fn new(
        session: Arc<C>,
        gate: Arc<LeadershipGate>,
        candidate: CandidateHandle,
        election_path: String,
        retry: RetryPolicy,
        watch_rx: mpsc::Receiver<WatchedEvent>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            session,
            gate,
            candidate,
            election_path,
            retry,
            watch_rx,
            shutdown_rx,
            state: ElectionState::Unregistered,
            last_role: None,
            transitions: 0,
        }
    }

    /// Current election state
    pub fn state(&self) -> ElectionState {
        self.state
    }

    #[cfg(test)]
    pub(crate) fn transition_count(&self) -> u64 {
        self.transitions
    }

    /// Run the election until this process becomes leader or shutdown is
    /// requested. Coordination errors are logged and retried indefinitely;
    /// they never end the loop.
    pub async fn run(&mut self) {
        tracing::info!("election loop started under {}", self.election_path);

        loop {
            if *self.shutdown_rx.borrow() {
                tracing::info!("election loop interrupted by shutdown");
                return;
            }

            match self.evaluate_once().await {
                Ok(EvalOutcome::Decided(Role::Leader)) => {
                    // The watch stays armed; steady-state demotion handling
                    // is up to whoever consumes it
                    tracing::info!("exiting election loop");
                    return;
                }
                Ok(EvalOutcome::Decided(Role::Follower)) => {
                    self.wait_for_change().await;
                }
                Ok(EvalOutcome::Reregister) => {
                    // Recreate the candidate on the next pass
                }
                Err(e) => {
                    tracing::error!("error in leader election: {}", e);
                    self.backoff().await;
                }
            }
        }
    }

    /// One pass of the transition algorithm: ensure a candidate node,
    /// fetch siblings with a watch armed, compute the role
    async fn evaluate_once(&mut self) -> Result<EvalOutcome> {
        self.session.ensure_connected().await?;

        let current = self.candidate.read().await.clone();
        let own_path = if let Some(node) = current {
            if self.session.exists(&node.path).await? {
                node.path
            } else {
                self.register_candidate().await?
            }
        } else {
            self.register_candidate().await?
        };

        // Arm the watch in the same call that takes the snapshot, so a
        // change landing right after the fetch still produces a wakeup
        let siblings = self
            .session
            .get_children(&self.election_path, true)
            .await?;

        match evaluate(&own_path, siblings)? {
            EvalOutcome::Decided(role) => {
                self.transition_to(role);
                Ok(EvalOutcome::Decided(role))
            }
            EvalOutcome::Reregister => {
                tracing::warn!("candidate node {} vanished, re-registering", own_path);
                self.candidate.write().await.take();
                self.state = ElectionState::Unregistered;
                Ok(EvalOutcome::Reregister)
            }
        }
    }

    /// Create a fresh ephemeral-sequential candidate node
    async fn register_candidate(&mut self) -> Result<String> {
        self.state = ElectionState::Unregistered;
        self.candidate.write().await.take();

        let prefix = format!("{}/{}", self.election_path, CANDIDATE_PREFIX);
        let path = self.session.create_ephemeral_sequential(&prefix).await?;
        tracing::info!("created candidate node {}", path);

        *self.candidate.write().await = Some(CandidateNode {
            path: path.clone(),
            created_at: Utc::now(),
        });
        self.state = ElectionState::Candidate;
        Ok(path)
    }

    /// Flip the gate and log only when the computed role differs from the
    /// previous evaluation
    fn transition_to(&mut self, role: Role) {
        if self.last_role != Some(role) {
            match role {
                Role::Leader => tracing::info!("this instance is now the leader"),
                Role::Follower => {
                    if self.last_role == Some(Role::Leader) {
                        tracing::info!("this instance is no longer the leader");
                    } else {
                        tracing::info!("waiting to become leader");
                    }
                }
            }
            self.gate.transition(role);
            self.last_role = Some(role);
            self.transitions += 1;
        }

        self.state = match role {
            Role::Leader => ElectionState::Leader,
            Role::Follower => ElectionState::Follower,
        };
    }

    /// Follower wait: fixed interval OR the watch notification, whichever
    /// comes first; shutdown interrupts either
    async fn wait_for_change(&mut self) {
        let delay = self.retry.delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            event = self.watch_rx.recv() => match event {
                Some(event) => {
                    tracing::debug!("change notification: {:?} at {}", event.kind, event.path);
                }
                // Watch channel gone with the session; fall back to polling
                None => tokio::time::sleep(delay).await,
            },
            _ = self.shutdown_rx.changed() => {}
        }
    }

    /// Error backoff between retries, interruptible by shutdown
    async fn backoff(&mut self) {
        let delay = self.retry.delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.shutdown_rx.changed() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::coordination::testing::MockCoordination;

    fn make_elector(
        mock: Arc<MockCoordination>,
        retry_ms: u64,
    ) -> (
        LeaderElector<MockCoordination>,
        Arc<LeadershipGate>,
        CandidateHandle,
        mpsc::Sender<WatchedEvent>,
        watch::Sender<bool>,
    ) {
        let gate = Arc::new(LeadershipGate::new());
        let candidate: CandidateHandle = Arc::new(RwLock::new(None));
        let (watch_tx, watch_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let elector = LeaderElector::new(
            Arc::clone(&mock),
            Arc::clone(&gate),
            Arc::clone(&candidate),
            "/api-leader".to_string(),
            RetryPolicy::new(Duration::from_millis(retry_ms), None),
            watch_rx,
            shutdown_rx,
        );
        (elector, gate, candidate, watch_tx, shutdown_tx)
    }

    #[test]
    fn test_smallest_sibling_is_leader() {
        let siblings = vec!["node-0000000001".to_string(), "node-0000000003".to_string()];
        match evaluate("/api-leader/node-0000000001", siblings).unwrap() {
            EvalOutcome::Decided(role) => assert_eq!(role, Role::Leader),
            _ => panic!("expected a decided role"),
        }
    }

    #[test]
    fn test_larger_sibling_is_follower() {
        let siblings = vec!["node-0000000001".to_string(), "node-0000000003".to_string()];
        match evaluate("/api-leader/node-0000000003", siblings).unwrap() {
            EvalOutcome::Decided(role) => assert_eq!(role, Role::Follower),
            _ => panic!("expected a decided role"),
        }
    }

    #[test]
    fn test_unsorted_snapshot_is_sorted_before_comparison() {
        let siblings = vec!["node-0000000007".to_string(), "node-0000000002".to_string()];
        match evaluate("/api-leader/node-0000000002", siblings).unwrap() {
            EvalOutcome::Decided(role) => assert_eq!(role, Role::Leader),
            _ => panic!("expected a decided role"),
        }
    }

    #[test]
    fn test_empty_sibling_set_is_an_error() {
        assert!(evaluate("/api-leader/node-0000000001", Vec::new()).is_err());
    }

    #[test]
    fn test_absent_own_node_requires_reregistration() {
        let siblings = vec!["node-0000000002".to_string()];
        assert!(matches!(
            evaluate("/api-leader/node-0000000005", siblings).unwrap(),
            EvalOutcome::Reregister
        ));
    }

    #[tokio::test]
    async fn test_single_candidate_becomes_leader() {
        let mock = Arc::new(MockCoordination::new(1, true));
        let (mut elector, gate, candidate, _watch_tx, _shutdown_tx) = make_elector(mock.clone(), 10);

        elector.run().await;

        assert!(gate.is_leader());
        assert_eq!(elector.state(), ElectionState::Leader);
        assert_eq!(elector.transition_count(), 1);
        let node = candidate.read().await.clone().unwrap();
        assert_eq!(node.path, "/api-leader/node-0000000001");
        assert_eq!(node.name(), "node-0000000001");
        assert_eq!(mock.create_count(), 1);
    }

    #[tokio::test]
    async fn test_follower_does_not_flip_gate() {
        let mock = Arc::new(MockCoordination::new(3, true));
        mock.seed_child("node-0000000001");
        let (mut elector, gate, _candidate, _watch_tx, shutdown_tx) = make_elector(mock.clone(), 10);

        let task = tokio::spawn(async move {
            elector.run().await;
            elector
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!gate.is_leader());
        shutdown_tx.send(true).unwrap();
        let elector = task.await.unwrap();

        assert_eq!(elector.state(), ElectionState::Follower);
        // Many evaluation cycles, exactly one transition
        assert_eq!(elector.transition_count(), 1);
        assert_eq!(mock.create_count(), 1);
    }

    #[tokio::test]
    async fn test_vanished_node_is_recreated() {
        let mock = Arc::new(MockCoordination::new(5, false));
        // First snapshot omits the node this process just created; the
        // second contains only the re-registered node
        mock.push_children(vec!["node-0000000004".to_string()]);
        mock.push_children(vec!["node-0000000006".to_string()]);
        let (mut elector, gate, candidate, _watch_tx, _shutdown_tx) = make_elector(mock.clone(), 10);

        elector.run().await;

        assert!(gate.is_leader());
        assert_eq!(mock.create_count(), 2);
        let node = candidate.read().await.clone().unwrap();
        assert_eq!(node.path, "/api-leader/node-0000000006");
    }

    #[tokio::test]
    async fn test_empty_snapshot_retries_without_assuming_leadership() {
        let mock = Arc::new(MockCoordination::new(1, false));
        mock.push_children(Vec::new());
        mock.push_children(vec!["node-0000000001".to_string()]);
        let (mut elector, gate, _candidate, _watch_tx, _shutdown_tx) = make_elector(mock.clone(), 10);

        elector.run().await;

        assert!(gate.is_leader());
        // The empty snapshot did not trigger re-registration
        assert_eq!(mock.create_count(), 1);
    }

    #[tokio::test]
    async fn test_watch_notification_wakes_the_wait() {
        let mock = Arc::new(MockCoordination::new(2, false));
        mock.push_children(vec![
            "node-0000000001".to_string(),
            "node-0000000002".to_string(),
        ]);
        mock.push_children(vec!["node-0000000002".to_string()]);
        // Long interval: only the notification can finish this in time
        let (mut elector, gate, _candidate, watch_tx, _shutdown_tx) = make_elector(mock.clone(), 60_000);

        let task = tokio::spawn(async move {
            elector.run().await;
            elector
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!gate.is_leader());

        watch_tx
            .send(WatchedEvent {
                kind: crate::coordination::EventKind::ChildrenChanged,
                state: 3,
                path: "/api-leader".to_string(),
            })
            .await
            .unwrap();

        let elector = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(gate.is_leader());
        // FOLLOWER then LEADER
        assert_eq!(elector.transition_count(), 2);
    }

    #[tokio::test]
    async fn test_coordination_errors_are_retried() {
        let mock = Arc::new(MockCoordination::new(1, true));
        mock.fail_next_creates(2);
        let (mut elector, gate, _candidate, _watch_tx, _shutdown_tx) = make_elector(mock.clone(), 10);

        elector.run().await;

        assert!(gate.is_leader());
        // Two failed attempts, then the one that stuck
        assert_eq!(mock.create_count(), 3);
    }
}
