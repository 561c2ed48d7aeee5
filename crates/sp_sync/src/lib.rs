//! Datasource sync: provider clients, mapping, reconciliation, and scheduling.

pub mod engine;
pub mod error;
pub mod mapping;
pub mod provider;
pub mod reconcile;
pub mod scheduler;

pub use engine::{run_sync, test_connection, ConnectionTest, SyncResult, SyncSettings};
