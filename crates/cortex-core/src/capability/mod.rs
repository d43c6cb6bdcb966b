//! Capability Registry & Skill Synthesizer and Hive Broadcaster.

pub mod hive;
pub mod registry;
pub mod synthesizer;

pub use hive::HiveBroadcaster;
pub use registry::CapabilityRegistry;
pub use synthesizer::{SkillSynthesizer, SynthesisContext, SynthesisResult};
