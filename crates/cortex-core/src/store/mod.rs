//! Store Adapter: transactions, row locks, JSON columns.
//!
//! Concretely backed by `sled` — a tree per table, rows keyed by id, values
//! are JSON bytes. Single-row read-then-write state transitions use
//! `compare_and_swap` as the row lock: the row is read, a new value computed,
//! and the write only lands if nothing else touched the row in the interim;
//! on conflict the caller's closure re-runs with the fresh value, so a
//! transient lock conflict is retried by the caller rather than surfaced as
//! an error. Operations spanning multiple rows use `sled::Transactional` so
//! partial progress is never observable.
//!
//! `sled` does not support `SELECT ... FOR UPDATE`; `supports_row_locks()`
//! reports that capability so callers know the bypass is transparent.

mod sled_store;

pub use sled_store::SledStore;

use crate::error::CortexResult;

/// Dialect-specific maintenance primitives the Janitor/Pilot invoke:
/// equivalents of `VACUUM`, `ANALYZE`, `PRAGMA optimize`.
pub trait StoreAdapter: Send + Sync {
    /// Whether this dialect supports `SELECT ... FOR UPDATE` (or equivalent).
    /// Sled does not; it bypasses lock acquisition transparently.
    fn supports_row_locks(&self) -> bool;

    /// Existing tables/trees, for the Janitor's "ensure index" bootstrapping.
    fn introspect(&self) -> CortexResult<Vec<String>>;

    /// Runs the dialect's compaction/optimization primitive
    /// (`PRAGMA optimize` for embedded stores, `VACUUM`/`ANALYZE` for relational ones).
    fn run_maintenance(&self) -> CortexResult<()>;
}
