use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

// ============================================================================
// IDs
// ============================================================================

new_key_type! {
    pub struct OfferKey;
    pub struct JobOfferKey;
}

/// Dense 0-based agent identifier, assigned in registration order.
///
/// The neural handler keys all of its per-(time, agent) tables by this id,
/// so ids must stay stable and dense for the lifetime of a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub u32);

impl AgentId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where an agent lives in the economy's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRef {
    Person(usize),
    Firm(usize),
}

// ============================================================================
// Goods - referred to by their indices in the economy's good-name table
// ============================================================================

pub type GoodId = usize;

pub type Quantity = f64;
pub type Price = f64;
