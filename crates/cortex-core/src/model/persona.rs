//! Persona, PersonaMutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionStatus {
    Stable,
    Verifying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationType {
    RoleUpdate,
    PolicyUpdate,
    CapabilityUpdate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaMutation {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: MutationType,
    pub previous_state: PersonaState,
    pub new_state: PersonaState,
    pub reason: String,
}

/// The mutable slice of a `Persona` a mutation captures before/after.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersonaState {
    pub role: String,
    pub policies: Vec<String>,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationBaseline {
    pub success_rate: f64,
    pub average_latency: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LastFailedMutation {
    pub recommendation: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaMetadata {
    pub evolution_status: EvolutionStatus,
    #[serde(default)]
    pub mutation_reason: Option<String>,
    #[serde(default)]
    pub verification_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub verification_baseline: Option<VerificationBaseline>,
    /// Truncated to 5 entries.
    #[serde(default)]
    pub mutation_history: Vec<PersonaMutation>,
    #[serde(default)]
    pub rollback_history: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub last_failed_mutation: Option<LastFailedMutation>,
}

impl Default for PersonaMetadata {
    fn default() -> Self {
        Self {
            evolution_status: EvolutionStatus::Stable,
            mutation_reason: None,
            verification_started_at: None,
            verification_baseline: None,
            mutation_history: Vec::new(),
            rollback_history: Vec::new(),
            last_failed_mutation: None,
        }
    }
}

pub const MUTATION_HISTORY_CAP: usize = 5;

impl PersonaMetadata {
    /// Appends a mutation, truncating history to the most recent
    /// `MUTATION_HISTORY_CAP` entries.
    pub fn push_mutation(&mut self, mutation: PersonaMutation) {
        self.mutation_history.push(mutation);
        if self.mutation_history.len() > MUTATION_HISTORY_CAP {
            let excess = self.mutation_history.len() - MUTATION_HISTORY_CAP;
            self.mutation_history.drain(0..excess);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: Uuid,
    pub name: String,
    pub role: String,
    pub capabilities: Vec<String>,
    pub policies: Vec<String>,
    pub metadata: PersonaMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Persona {
    pub fn current_state(&self) -> PersonaState {
        PersonaState {
            role: self.role.clone(),
            policies: self.policies.clone(),
            capabilities: self.capabilities.clone(),
        }
    }

    pub fn apply_state(&mut self, state: PersonaState) {
        self.role = state.role;
        self.policies = state.policies;
        self.capabilities = state.capabilities;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mutation(reason: &str) -> PersonaMutation {
        PersonaMutation {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind: MutationType::RoleUpdate,
            previous_state: PersonaState::default(),
            new_state: PersonaState::default(),
            reason: reason.to_string(),
        }
    }

    #[test]
    fn mutation_history_caps_at_five() {
        let mut meta = PersonaMetadata::default();
        for i in 0..8 {
            meta.push_mutation(mutation(&format!("m{i}")));
        }
        assert_eq!(meta.mutation_history.len(), MUTATION_HISTORY_CAP);
        assert_eq!(meta.mutation_history.first().unwrap().reason, "m3");
        assert_eq!(meta.mutation_history.last().unwrap().reason, "m7");
    }
}
