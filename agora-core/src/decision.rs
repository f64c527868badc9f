//! The strategy seam between agents and their decision logic.
//!
//! Agents delegate every substantive choice (what to buy, which jobs to
//! apply for, what to consume, produce, and post) to a pluggable decision
//! maker. The neural variant consults the shared decision-net handler; tests
//! install deterministic stubs.

use crate::error::Result;
use crate::functions::{VecToScalar, VecToVec};
use crate::market::{JobMarket, Market};
use crate::types::{AgentId, GoodId, JobOfferKey, OfferKey, Price, Quantity};

// ============================================================================
// Orders and offer specs returned by decision makers
// ============================================================================

/// Request `count` slots of an offer on the goods market.
#[derive(Debug, Clone, Copy)]
pub struct OfferOrder {
    pub offer: OfferKey,
    pub count: u32,
}

/// Request `count` slots of a job offer.
#[derive(Debug, Clone, Copy)]
pub struct JobOrder {
    pub offer: JobOfferKey,
    pub count: u32,
}

/// A goods offer to post: `amount` slots, each carrying `quantities`.
#[derive(Debug, Clone)]
pub struct GoodOfferSpec {
    pub amount: u32,
    pub good_ids: Vec<GoodId>,
    pub quantities: Vec<Quantity>,
    pub price: Price,
}

/// A job offer to post: `amount` slots of `labor` at `wage` each.
#[derive(Debug, Clone, Copy)]
pub struct JobOfferSpec {
    pub amount: u32,
    pub labor: f64,
    pub wage: Price,
}

// ============================================================================
// State views passed into decision calls
// ============================================================================

/// Owned snapshot of a person's state at decision time.
#[derive(Debug, Clone)]
pub struct PersonCtx {
    pub id: AgentId,
    pub time: u64,
    pub money: f64,
    pub labor: f64,
    pub inventory: Vec<Quantity>,
    pub utility: VecToScalar,
    pub discount_rate: f64,
}

impl PersonCtx {
    pub fn util_params(&self) -> Vec<f64> {
        self.utility.param_vector()
    }
}

/// Owned snapshot of a firm's state at decision time.
#[derive(Debug, Clone)]
pub struct FirmCtx {
    pub id: AgentId,
    pub time: u64,
    pub money: f64,
    pub labor_hired: f64,
    pub inventory: Vec<Quantity>,
    pub production: VecToVec,
}

impl FirmCtx {
    pub fn prod_params(&self) -> Vec<f64> {
        self.production.param_vector()
    }
}

/// Read-only view of both markets at the current economy time.
#[derive(Clone, Copy)]
pub struct MarketView<'a> {
    pub market: &'a Market,
    pub job_market: &'a JobMarket,
    pub time: u64,
}

impl MarketView<'_> {
    pub fn available_offers(&self) -> Vec<OfferKey> {
        self.market.available_keys(self.time)
    }

    pub fn available_job_offers(&self) -> Vec<JobOfferKey> {
        self.job_market.available_keys(self.time)
    }
}

// ============================================================================
// Decision maker traits
// ============================================================================

pub trait PersonDecisionMaker: Send {
    /// Called once when the decision maker is installed into its parent.
    /// Implementations that keep parent state must reject a second bind.
    fn bind(&mut self, _id: AgentId) -> Result<()> {
        Ok(())
    }

    /// Which goods offers to respond to this step.
    fn choose_goods(&mut self, ctx: &PersonCtx, view: &MarketView<'_>) -> Vec<OfferOrder>;

    /// Which job offers to apply to this step.
    fn choose_jobs(&mut self, ctx: &PersonCtx, view: &MarketView<'_>) -> Vec<JobOrder>;

    /// Quantity of each good to consume, componentwise at most the current
    /// inventory.
    fn choose_goods_to_consume(&mut self, ctx: &PersonCtx, view: &MarketView<'_>)
        -> Vec<Quantity>;

    /// Goods offers to post this step. Persons normally post nothing; the
    /// hook exists because the base agent protocol lets any agent sell.
    fn choose_good_offers(
        &mut self,
        _ctx: &PersonCtx,
        _view: &MarketView<'_>,
    ) -> Vec<GoodOfferSpec> {
        Vec::new()
    }
}

pub trait FirmDecisionMaker: Send {
    fn bind(&mut self, _id: AgentId) -> Result<()> {
        Ok(())
    }

    /// Which goods offers to respond to this step (production inputs).
    fn choose_goods(&mut self, ctx: &FirmCtx, view: &MarketView<'_>) -> Vec<OfferOrder>;

    /// Quantity of each inventory good to commit as production input,
    /// componentwise at most the current inventory.
    fn choose_production_inputs(&mut self, ctx: &FirmCtx, view: &MarketView<'_>)
        -> Vec<Quantity>;

    /// Goods offers to post this step. A non-empty round cancels the
    /// previous round.
    fn choose_good_offers(&mut self, ctx: &FirmCtx, view: &MarketView<'_>) -> Vec<GoodOfferSpec>;

    /// Job offers to post this step. A non-empty round cancels the previous
    /// round.
    fn choose_job_offers(&mut self, ctx: &FirmCtx, view: &MarketView<'_>) -> Vec<JobOfferSpec>;
}
