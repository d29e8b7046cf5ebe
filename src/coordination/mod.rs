//! Coordination Module
//!
//! Session management and wire protocol for the ZooKeeper coordination
//! service.

pub mod protocol;
mod session;
#[cfg(test)]
pub(crate) mod testing;

pub use protocol::{EventKind, WatchedEvent};
pub use session::CoordinationSession;

use async_trait::async_trait;

use crate::error::Result;

/// Seam in front of the coordination service. The election machine and the
/// shutdown coordinator only talk through this, so they can run against an
/// in-memory double in tests.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Re-establish the session if it has dropped; no-op while healthy
    async fn ensure_connected(&self) -> Result<()>;

    /// Create an ephemeral, sequentially-numbered node; `path_prefix` is
    /// the parent path plus the name prefix the server appends the
    /// sequence suffix to. Returns the full assigned path.
    async fn create_ephemeral_sequential(&self, path_prefix: &str) -> Result<String>;

    /// List child node names under `path`, optionally arming a one-shot
    /// watch for the next change
    async fn get_children(&self, path: &str, watch: bool) -> Result<Vec<String>>;

    /// Check whether a node exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Remove a node owned by this session
    async fn delete(&self, path: &str) -> Result<()>;

    /// True while a live session is held
    async fn is_connected(&self) -> bool;

    /// Tear down the session and any outstanding watches; idempotent
    async fn close(&self);
}
