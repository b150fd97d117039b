//! # FitSync Runtime
//!
//! Drives the [`fitsync_engine`] record store against a remote store and
//! local persistence.
//!
//! - [`mutations::Mutations`]: user-facing add/edit/delete functions with
//!   optimistic local writes and typed outcomes
//! - [`reconciler::run_pass`]: one reconciliation pass over a collection
//! - [`retry_worker::RetryWorker`]: timer-driven replay of failed mutation
//!   writes, strictly in order
//! - [`coordinator::SyncCoordinator`]: triggers passes on local changes,
//!   sign-in and reconnects, one in flight per collection
//!
//! ## Example
//!
//! ```rust,no_run
//! use fitsync_runtime::{MemoryKv, MemoryRemote, SyncConfig, SyncContext, SyncCoordinator};
//! use std::sync::Arc;
//!
//! # async fn run() -> fitsync_runtime::Result<()> {
//! fitsync_runtime::logging::init();
//!
//! let ctx = SyncContext::new(
//!     SyncConfig::from_env()?,
//!     Arc::new(MemoryRemote::new()),
//!     Arc::new(MemoryKv::new()),
//! );
//! let coordinator = SyncCoordinator::new(ctx);
//! coordinator.start();
//! coordinator.sign_in("owner-1").await?;
//!
//! let date = chrono::NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
//! let created = coordinator.mutations().add_workout("Push day", date).await;
//! assert!(created.outcome.is_visible());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod locks;
pub mod logging;
pub mod mutations;
pub mod network;
pub mod persistence;
pub mod reconciler;
pub mod remote;
pub mod retry_worker;

pub use config::{ConfigError, SyncConfig};
pub use context::{SyncContext, SyncNotice};
pub use coordinator::SyncCoordinator;
pub use error::{Result, SyncError};
pub use identity::Identity;
pub use mutations::{Created, EditPolicy, Mutations};
pub use network::{ConnectivityMonitor, Subscription, TcpProbe};
pub use persistence::{KeyValueStore, LocalPersistence, MemoryKv, SqliteKv};
pub use remote::{MemoryRemote, RemoteCall, RemoteOp, RemoteStore, WriteAttempt};
pub use retry_worker::{RetryWorker, TickOutcome};
