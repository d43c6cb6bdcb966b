//! Rule & Policy Engines and the Governance Auditor.

pub mod auditor;
pub mod policy_enforcer;
pub mod rule_engine;

pub use auditor::{AuditIssue, GovernanceAuditor, RemediationEngine};
pub use policy_enforcer::{PolicyEnforcer, PolicyValue, PolicyViolationDetail};
pub use rule_engine::RuleEngine;
