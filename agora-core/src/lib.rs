//! Agent-based economic simulation with neural decision policies.
//!
//! This crate implements a time-stepped market economy with two agent types
//! whose behavior is learned by advantage actor-critic reinforcement
//! learning:
//!
//! ## Persons
//!
//! A **Person** holds an inventory of goods, money, and one period of labor
//! per step. Each step a person searches the labor market for jobs, buys
//! goods, and consumes part of its inventory; the utility of the consumed
//! bundle (valued by a CES utility over leisure and goods) is the person's
//! reward signal.
//!
//! ## Firms
//!
//! A **Firm** hires labor from persons, buys input goods, transforms them
//! through a production function (a sum of per-output CES technologies),
//! posts good offers and job offers, and pays its money out to its owners
//! as dividends each step. Realized revenue is the firm's reward, observed
//! one step after the decisions that earned it.
//!
//! ## Markets
//!
//! Both markets follow the same offer protocol. An offer is posted with a
//! number of slots (`amount_left`), becomes available one step after
//! posting (the settle delay), collects responses from interested buyers,
//! and is reviewed by its offerer on a later step: the offerer checks it
//! can still deliver, the responder re-verifies it can still pay, and only
//! then does the transfer happen, atomically. Dead offers are flushed from
//! the market at the end of every step.
//!
//! ## Decisions
//!
//! Agents delegate choices to pluggable decision makers
//! ([`decision::PersonDecisionMaker`] / [`decision::FirmDecisionMaker`]).
//! The neural implementations route every choice through a shared
//! [`neural::NetHandler`]: offers are condensed by shared encoders, eight
//! policy heads sample actions (Bernoulli per offer slot, logit-normal for
//! proportions, log-normal for prices and wages), and two value heads
//! estimate state values. Log-probabilities, values, and rewards are
//! recorded per (step, agent) and consumed at the end of each episode by
//! the [`neural::A2cTrainer`], which backpropagates through the shared
//! encoders and steps nine per-head Adam optimizers with adaptive
//! learning-rate schedules.
//!
//! ## Module structure
//!
//! - `types`       Core ids and quantity aliases
//! - `constants`   Process-wide defaults
//! - `functions`   Production and utility function family
//! - `market`      Offers, responses, and the two market lists
//! - `decision`    Decision-maker traits and state views
//! - `agents`      Person and firm state
//! - `economy`     Registry, step driver, and the transaction engine
//! - `neural`      Encoders, heads, handler, decision makers, trainer
//! - `scenario`    Population seeding and the training loop

pub mod agents;
pub mod constants;
pub mod decision;
pub mod economy;
pub mod error;
pub mod functions;
pub mod market;
pub mod neural;
pub mod scenario;
pub mod types;

// Core types
pub use types::{AgentId, AgentRef, GoodId, JobOfferKey, OfferKey, Price, Quantity};

// Errors
pub use error::{Result, SimError};

// Functions
pub use functions::{ces_vec_to_vec, VecToScalar, VecToVec};

// Market
pub use market::{JobMarket, JobOffer, Market, Offer, Response};

// Agents & economy
pub use agents::{Firm, Person};
pub use economy::{Economy, FirmSeed, GoodMarketStats, MarketReport, PersonSeed};

// Decision interface
pub use decision::{
    FirmCtx, FirmDecisionMaker, GoodOfferSpec, JobOfferSpec, JobOrder, MarketView, OfferOrder,
    PersonCtx, PersonDecisionMaker,
};

// Neural path
pub use neural::{
    A2cTrainer, HeadLearningRates, LrDecayConfig, LrScheduler, NetConfig, NetHandler,
    NeuralFirmDecisionMaker, NeuralPersonDecisionMaker,
};

// Scenario & training loop
pub use scenario::{
    run, train, train_from_pretrained, train_with_handler, MuSigma, ScenarioParams,
    TrainingParams,
};
