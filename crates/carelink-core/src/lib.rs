//! carelink-core - Core library for Carelink
//!
//! This crate contains the offline-first synchronization subsystem used by the
//! Carelink scheduling clients: a durable cache store, the pending-operation
//! queue, the connectivity monitor, the reconciliation engine and the
//! offline-aware façade that the rest of an application talks to.

pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod facade;
pub mod models;
pub mod queue;
pub mod reconcile;
mod refresh;
pub mod remote;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use connectivity::{
    ConnectivityMonitor, ConnectivityPhase, ConnectivityState, MonitorConfig, Notice,
};
pub use error::{Error, Result};
pub use facade::{OfflineService, Origin, Outcome};
pub use queue::SyncQueue;
pub use reconcile::{Reconciler, SyncSummary};
pub use remote::{HttpRemote, RemoteService};
pub use store::CacheStore;
