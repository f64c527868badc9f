use thiserror::Error;

/// Errors surfaced by the simulator.
///
/// Only construction-time preconditions are fatal; everything that can go
/// wrong mid-simulation (rejected transactions, stale offers) flows through
/// return values instead.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("inventory has {got} entries but the economy trades {expected} goods")]
    InventoryLength { got: usize, expected: usize },

    #[error("utility function takes {got} inputs; expected {expected} (leisure + one per good)")]
    UtilityArity { got: usize, expected: usize },

    #[error("production function takes {got} inputs; expected {expected} (labor + one per good)")]
    ProductionArity { got: usize, expected: usize },

    #[error("production function produces {got} outputs; expected {expected} (one per good)")]
    ProductionOutputs { got: usize, expected: usize },

    #[error("decision maker is already bound to agent {0:?}")]
    DecisionMakerBound(crate::types::AgentId),

    #[error("firm must have at least one owner")]
    NoOwners,

    #[error("scenario parameter `{0}` has the wrong number of per-good entries")]
    ScenarioParamLength(&'static str),

    #[error("training diverged before the first checkpoint was written")]
    EarlyDivergence,

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = SimError> = std::result::Result<T, E>;
