//! Self-Healing
//!
//! One bounded, LLM-assisted repair cycle around warehouse failures.

pub mod coordinator;


pub use coordinator::{
    HealAttempt, HealDecision, HealFailure, HealStatus, HealingReport, SelfHealingCoordinator, MAX_RETRIES,
};
