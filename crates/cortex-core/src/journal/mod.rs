//! Metrics Ledger, Reflection Log & Recursive Reasoner, Action Journal & Refiner.

pub mod action;
pub mod metrics;
pub mod reflection;

pub use action::{ActionJournal, Refiner, RuleProposal};
pub use metrics::MetricsLedger;
pub use reflection::ReflectionLog;
