//! WolfElect - ZooKeeper-Backed Leader Election Gate
//!
//! Elects a single leader among identical processes through an external
//! strongly-consistent coordination service and gates the HTTP endpoint so
//! only the elected leader serves traffic.
//!
//! # Architecture
//!
//! Each process registers an ephemeral, sequentially-numbered candidate
//! node under a shared election path. The process owning the smallest
//! sequence number is the leader; everyone else follows and re-evaluates
//! on a sibling-change watch or a fixed interval, whichever fires first.
//! Session loss destroys the candidate node and drops the process back to
//! unregistered, where it re-enters the race with a fresh node.
//!
//! # Features
//!
//! - Election driven entirely by coordination-service ordering (no local
//!   consensus)
//! - One-shot sibling watches delivered over a channel to the election loop
//! - Reconnect-on-drop session management with keepalive pings
//! - Gated HTTP endpoint with status and health queries
//! - Graceful shutdown that relinquishes leadership before exit

pub mod api;
pub mod config;
pub mod coordination;
pub mod election;
pub mod error;
pub mod shutdown;

pub use config::WolfElectConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfElectConfig;
    pub use crate::coordination::{CoordinationClient, CoordinationSession};
    pub use crate::election::{LeaderElector, LeadershipGate, RetryPolicy, Role};
    pub use crate::error::{Error, Result};
    pub use crate::shutdown::ShutdownCoordinator;
}
