//! Persons: agents that consume goods and sell their labor to firms.

use crate::decision::{PersonCtx, PersonDecisionMaker};
use crate::functions::VecToScalar;
use crate::market::{JobMarket, Market};
use crate::types::{AgentId, Quantity};

use super::{AgentCore, JobResponses};

pub struct Person {
    pub core: AgentCore,
    /// Fraction of this period's labor already committed. Never exceeds 1;
    /// reset at the end of the person's step so commitments made by firms
    /// later in the same economy step count against the next period.
    pub labor: f64,
    /// Job offers this person has applied to.
    pub job_responses: JobResponses,
    /// Per-period discount factor in (0, 1).
    pub discount_rate: f64,
    pub utility: VecToScalar,
    pub decision_maker: Box<dyn PersonDecisionMaker>,
}

impl Person {
    /// Utility of a consumption bundle, with leisure as the first input.
    pub fn utility_of(&self, leisure: f64, consumed: &[Quantity]) -> f64 {
        let mut inputs = Vec::with_capacity(consumed.len() + 1);
        inputs.push(leisure);
        inputs.extend_from_slice(consumed);
        self.utility.f(&inputs)
    }

    /// Owned state snapshot handed to the decision maker.
    pub fn ctx(&self) -> PersonCtx {
        PersonCtx {
            id: self.core.id,
            time: self.core.time,
            money: self.core.money,
            labor: self.labor,
            inventory: self.core.inventory.clone(),
            utility: self.utility.clone(),
            discount_rate: self.discount_rate,
        }
    }

    /// Consume up to `amounts` from inventory, clamped so the inventory
    /// invariant holds regardless of what the decision maker returned.
    pub fn consume(&mut self, amounts: &[Quantity]) -> Vec<Quantity> {
        let mut consumed = vec![0.0; self.core.inventory.len()];
        for (g, take) in amounts.iter().enumerate().take(self.core.inventory.len()) {
            let take = take.clamp(0.0, self.core.inventory[g]);
            self.core.inventory[g] -= take;
            consumed[g] = take;
        }
        consumed
    }

    /// Can this person still commit `labor` more of the current period?
    pub fn can_commit_labor(&self, labor: f64) -> bool {
        self.labor + labor <= 1.0
    }

    /// Drop job responses whose offer is dead or gone.
    pub fn flush_job_responses(&mut self, job_market: &JobMarket) {
        self.job_responses
            .retain(|&k| job_market.get(k).is_some_and(|o| o.amount_left > 0));
    }

    pub fn flush_offers(&mut self, market: &Market) {
        self.core
            .my_offers
            .retain(|&k| market.get(k).is_some_and(|o| o.amount_left > 0));
    }

    pub fn flush_responses(&mut self, market: &Market) {
        self.core
            .my_responses
            .retain(|&k| market.get(k).is_some_and(|o| o.amount_left > 0));
    }

    pub fn id(&self) -> AgentId {
        self.core.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{JobOrder, MarketView, OfferOrder};

    struct Inert;
    impl PersonDecisionMaker for Inert {
        fn choose_goods(&mut self, _: &PersonCtx, _: &MarketView<'_>) -> Vec<OfferOrder> {
            Vec::new()
        }
        fn choose_jobs(&mut self, _: &PersonCtx, _: &MarketView<'_>) -> Vec<JobOrder> {
            Vec::new()
        }
        fn choose_goods_to_consume(&mut self, _: &PersonCtx, _: &MarketView<'_>) -> Vec<Quantity> {
            Vec::new()
        }
    }

    fn person(inventory: Vec<f64>) -> Person {
        let n = inventory.len();
        Person {
            core: AgentCore::new(AgentId(0), 0, inventory, 10.0),
            labor: 0.0,
            job_responses: Vec::new(),
            discount_rate: 0.9,
            utility: VecToScalar::ces(1.0, vec![0.5; n + 1], 1.3),
            decision_maker: Box::new(Inert),
        }
    }

    #[test]
    fn consumption_is_clamped_to_inventory() {
        let mut p = person(vec![2.0, 1.0]);
        let consumed = p.consume(&[5.0, -1.0]);
        assert_eq!(consumed, vec![2.0, 0.0]);
        assert_eq!(p.core.inventory, vec![0.0, 1.0]);
    }

    #[test]
    fn labor_commitment_caps_at_one() {
        let mut p = person(vec![1.0]);
        p.labor = 0.75;
        assert!(p.can_commit_labor(0.25));
        assert!(!p.can_commit_labor(0.26));
    }
}
