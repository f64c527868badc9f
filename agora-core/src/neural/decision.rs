//! Decision makers that route every choice through the shared net handler.

use std::sync::Arc;

use crate::constants::{AMOUNT_PER_OFFER, LABOR_AMOUNT_PER_OFFER};
use crate::decision::{
    FirmCtx, FirmDecisionMaker, GoodOfferSpec, JobOfferSpec, JobOrder, MarketView, OfferOrder,
    PersonCtx, PersonDecisionMaker,
};
use crate::error::{Result, SimError};
use crate::types::{AgentId, Quantity};

use super::handler::NetHandler;

/// Logs a handler failure and falls back to a no-op decision; tensor errors
/// mid-episode are not recoverable in a way an agent could act on.
macro_rules! or_default {
    ($expr:expr, $agent:expr) => {
        match $expr {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(target: "decision", agent = ?$agent, error = %err, "decision net failed");
                Default::default()
            }
        }
    };
}

// ============================================================================
// Person
// ============================================================================

pub struct NeuralPersonDecisionMaker {
    guide: Arc<NetHandler>,
    agent: Option<AgentId>,
}

impl NeuralPersonDecisionMaker {
    pub fn new(guide: Arc<NetHandler>) -> Self {
        NeuralPersonDecisionMaker { guide, agent: None }
    }

    fn agent(&self) -> AgentId {
        self.agent.expect("decision maker used before bind")
    }
}

impl PersonDecisionMaker for NeuralPersonDecisionMaker {
    fn bind(&mut self, id: AgentId) -> Result<()> {
        if let Some(bound) = self.agent {
            return Err(SimError::DecisionMakerBound(bound));
        }
        self.agent = Some(id);
        Ok(())
    }

    fn choose_jobs(&mut self, ctx: &PersonCtx, view: &MarketView<'_>) -> Vec<JobOrder> {
        let agent = self.agent();
        or_default!(self.guide.sync(view), agent);
        let stack = self.guide.job_offer_stack();
        or_default!(
            self.guide.labor_search(
                agent,
                &ctx.util_params(),
                ctx.money,
                ctx.labor,
                &ctx.inventory,
                &stack,
            ),
            agent
        )
    }

    fn choose_goods(&mut self, ctx: &PersonCtx, view: &MarketView<'_>) -> Vec<OfferOrder> {
        let agent = self.agent();
        or_default!(self.guide.sync(view), agent);
        let stack = self.guide.offer_stack();
        or_default!(
            self.guide.person_purchase(
                agent,
                &ctx.util_params(),
                ctx.money,
                ctx.labor,
                &ctx.inventory,
                &stack,
            ),
            agent
        )
    }

    fn choose_goods_to_consume(
        &mut self,
        ctx: &PersonCtx,
        view: &MarketView<'_>,
    ) -> Vec<Quantity> {
        let agent = self.agent();
        or_default!(self.guide.sync(view), agent);
        let util_params = ctx.util_params();

        // The value estimate for this state, over fresh stacks.
        let offer_stack = self.guide.offer_stack();
        let job_offer_stack = self.guide.job_offer_stack();
        or_default!(
            self.guide.record_person_value(
                agent,
                &util_params,
                ctx.money,
                ctx.labor,
                &ctx.inventory,
                &offer_stack,
                &job_offer_stack,
            ),
            agent
        );

        let proportions: Vec<f64> = or_default!(
            self.guide.consumption_proportions(
                agent,
                &util_params,
                ctx.money,
                ctx.labor,
                &ctx.inventory,
            ),
            agent
        );
        let amounts: Vec<Quantity> = proportions
            .iter()
            .zip(&ctx.inventory)
            .map(|(p, inv)| p * inv)
            .collect();

        // The realized utility of the bundle is this step's reward.
        let mut bundle = Vec::with_capacity(amounts.len() + 1);
        bundle.push(1.0 - ctx.labor);
        bundle.extend_from_slice(&amounts);
        self.guide.record_reward(agent, ctx.utility.f(&bundle), 0);

        amounts
    }
}

// ============================================================================
// Firm
// ============================================================================

pub struct NeuralFirmDecisionMaker {
    guide: Arc<NetHandler>,
    agent: Option<AgentId>,
}

impl NeuralFirmDecisionMaker {
    pub fn new(guide: Arc<NetHandler>) -> Self {
        NeuralFirmDecisionMaker { guide, agent: None }
    }

    fn agent(&self) -> AgentId {
        self.agent.expect("decision maker used before bind")
    }
}

impl FirmDecisionMaker for NeuralFirmDecisionMaker {
    fn bind(&mut self, id: AgentId) -> Result<()> {
        if let Some(bound) = self.agent {
            return Err(SimError::DecisionMakerBound(bound));
        }
        self.agent = Some(id);
        Ok(())
    }

    fn choose_goods(&mut self, ctx: &FirmCtx, view: &MarketView<'_>) -> Vec<OfferOrder> {
        let agent = self.agent();
        or_default!(self.guide.sync(view), agent);
        let prod_params = ctx.prod_params();

        // First decision of the firm's step: record the state value here.
        let offer_stack = self.guide.offer_stack();
        let job_offer_stack = self.guide.job_offer_stack();
        or_default!(
            self.guide.record_firm_value(
                agent,
                &prod_params,
                ctx.money,
                ctx.labor_hired,
                &ctx.inventory,
                &offer_stack,
                &job_offer_stack,
            ),
            agent
        );

        let stack = self.guide.offer_stack();
        or_default!(
            self.guide.firm_purchase(
                agent,
                &prod_params,
                ctx.money,
                ctx.labor_hired,
                &ctx.inventory,
                &stack,
            ),
            agent
        )
    }

    fn choose_production_inputs(&mut self, ctx: &FirmCtx, view: &MarketView<'_>) -> Vec<Quantity> {
        let agent = self.agent();
        or_default!(self.guide.sync(view), agent);
        let proportions: Vec<f64> = or_default!(
            self.guide.production_proportions(
                agent,
                &ctx.prod_params(),
                ctx.money,
                ctx.labor_hired,
                &ctx.inventory,
            ),
            agent
        );
        proportions
            .iter()
            .zip(&ctx.inventory)
            .map(|(p, inv)| p * inv)
            .collect()
    }

    fn choose_good_offers(&mut self, ctx: &FirmCtx, view: &MarketView<'_>) -> Vec<GoodOfferSpec> {
        let agent = self.agent();
        or_default!(self.guide.sync(view), agent);

        // Money in hand at the sell review is the realized payoff of the
        // previous step's decisions; the first step has no such row.
        if ctx.time >= 2 {
            self.guide.record_reward(agent, ctx.money, 1);
        }

        let stack = self.guide.offer_stack();
        let (amounts, prices) = or_default!(
            self.guide.choose_offers(
                agent,
                &ctx.prod_params(),
                ctx.money,
                ctx.labor_hired,
                &ctx.inventory,
                &stack,
            ),
            agent
        );

        // Quantize into unit-sized offer slots, one listing per good.
        let num_goods = ctx.inventory.len();
        let mut specs = Vec::new();
        for good in 0..num_goods {
            let slots = (amounts.get(good).copied().unwrap_or(0.0) / AMOUNT_PER_OFFER) as u32;
            if slots == 0 {
                continue;
            }
            let mut quantities = vec![0.0; num_goods];
            quantities[good] = AMOUNT_PER_OFFER;
            specs.push(GoodOfferSpec {
                amount: slots,
                good_ids: vec![good],
                quantities,
                price: prices[good] / AMOUNT_PER_OFFER,
            });
        }
        specs
    }

    fn choose_job_offers(&mut self, ctx: &FirmCtx, view: &MarketView<'_>) -> Vec<JobOfferSpec> {
        let agent = self.agent();
        or_default!(self.guide.sync(view), agent);
        let stack = self.guide.job_offer_stack();
        let (total_labor, wage) = or_default!(
            self.guide.choose_job_offers(
                agent,
                &ctx.prod_params(),
                ctx.money,
                ctx.labor_hired,
                &ctx.inventory,
                &stack,
            ),
            agent
        );

        let slots = (total_labor / LABOR_AMOUNT_PER_OFFER) as u32;
        if slots == 0 {
            return Vec::new();
        }
        vec![JobOfferSpec {
            amount: slots,
            labor: LABOR_AMOUNT_PER_OFFER,
            wage: wage / LABOR_AMOUNT_PER_OFFER,
        }]
    }
}
