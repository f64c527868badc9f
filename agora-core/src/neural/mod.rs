//! The neural policy path: offer encoders, decision heads, the stateful
//! handler bridging agents to tensors, neural decision makers, and the
//! advantage actor-critic trainer.

pub mod decision;
pub mod distributions;
pub mod handler;
pub mod nets;
pub mod training;

pub use decision::{NeuralFirmDecisionMaker, NeuralPersonDecisionMaker};
pub use handler::NetHandler;
pub use nets::{NetConfig, NetFamily};
pub use training::{A2cTrainer, HeadLearningRates, LrDecayConfig, LrScheduler};
