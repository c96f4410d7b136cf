// src/lib.rs

//! Catalogd
//!
//! SQLite catalog store for package-manager metadata: catalogs of
//! resolvables (packages, patches, patterns, products, ...) with their
//! capability sets, user locks, and a queue of pending transactions.
//!
//! # Architecture
//!
//! - Database-first: All state in SQLite, no config files
//! - CatalogStore: writes catalogs in one session per run
//! - SourceLoader: reads one catalog back into typed resolvables
//! - CatalogRegistry: owns every loaded resolvable, indexed by store id
//! - Pool: per-entry status over the registry, consumed by a solver
//! - Locks and TransactionLog: reconcile user requests with solver decisions

pub mod arch;
pub mod capability;
pub mod config;
pub mod db;
mod error;
pub mod import;
pub mod locks;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod resolvable;
pub mod resolver;
pub mod source;
pub mod store;
pub mod transactions;
pub mod version;

pub use error::{Error, Result};
