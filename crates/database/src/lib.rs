//! # ASES Database Crate
//!
//! Durable state for the evolution engine: every `StrategyRecord`, the archive
//! of rejected and retired strategies, operator configuration overrides, and
//! the klines replayed by the reference simulator.
//!
//! ## Architectural Principles
//!
//! - **Layer 3 Adapter:** This crate is an adapter that encapsulates all database-specific
//!   logic behind the `StateStore` trait. The engine holds an `Arc<dyn StateStore>` and
//!   never sees SQL.
//! - **Idempotent Writes:** every write is an upsert keyed by `SpecId`, so a write retried
//!   after an ambiguous failure is harmless.
//! - **Asynchronous & Pooled:** `PgStateStore` uses a connection pool (`PgPool`); the
//!   `InMemoryStateStore` backs tests and dry runs.
//!
//! ## Public API
//!
//! - `connect` / `run_migrations`: pool construction and schema setup.
//! - `StateStore`: the storage interface.
//! - `PgStateStore`, `InMemoryStateStore`: its two implementations.
//! - `RetryPolicy`: exponential backoff for store writes.
//! - `DbError`: The specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod retry;
pub mod store;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use memory::InMemoryStateStore;
pub use postgres::PgStateStore;
pub use retry::RetryPolicy;
pub use store::StateStore;
