//! cortex-evolution: the Strategic Evolution Loop.
//!
//! `cortex-core` holds every leaf service plus the `Cortex` composite; this
//! crate holds the two services that read across the whole composite and
//! mutate an agent's own behavior — the Strategic Planner's persona
//! mutate/verify/stabilize/rollback loop and the Evolutionary Pilot's
//! top-level observe/dispatch/audit cycle — plus the logic probes that gate
//! every planner cycle. It depends on `cortex-core`; the reverse dependency
//! would be circular, so the Ritual Orchestrator's `optimization` dispatch
//! calls back into `EvolutionaryPilot` only through the `EvolutionHook` port
//! `cortex-core::ports` defines.

mod pilot;
mod planner;
mod probe;

pub use pilot::{CycleReport, EvolutionaryPilot};
pub use planner::{sanitize_role, MutationOutcome, StrategicPlanner};
pub use probe::{
    LogicProbeCheck, LogicProbeRecord, LogicProbeRegistry, MutationHistoryCapProbe, ProbeStatus,
    SingleAlphaPerLineageProbe,
};
