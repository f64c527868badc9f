//! Firms: agents that hire labor, transform goods, and pay their profits
//! out to their owners.

use crate::decision::{FirmCtx, FirmDecisionMaker};
use crate::functions::VecToVec;
use crate::market::{JobMarket, Market};
use crate::types::{AgentId, JobOfferKey, Quantity};

use super::AgentCore;

pub struct Firm {
    pub core: AgentCore,
    /// Agents holding shares in this firm; dividends split evenly by count.
    pub owners: Vec<AgentId>,
    /// Labor hired for the current period. Reset every step.
    pub labor_hired: f64,
    /// Job offers this firm has listed on the labor market.
    pub my_job_offers: Vec<JobOfferKey>,
    pub production: VecToVec,
    pub decision_maker: Box<dyn FirmDecisionMaker>,
}

impl Firm {
    pub fn ctx(&self) -> FirmCtx {
        FirmCtx {
            id: self.core.id,
            time: self.core.time,
            money: self.core.money,
            labor_hired: self.labor_hired,
            inventory: self.core.inventory.clone(),
            production: self.production.clone(),
        }
    }

    /// Run the production function on `[labor_hired, inputs...]` and apply
    /// the net inventory change `output - inputs`.
    ///
    /// Inputs are clamped componentwise to inventory so the non-negativity
    /// invariant holds regardless of what the decision maker returned.
    pub fn produce(&mut self, inputs: &[Quantity]) -> Vec<Quantity> {
        let n = self.core.inventory.len();
        let mut used = vec![0.0; n];
        for (g, q) in inputs.iter().enumerate().take(n) {
            used[g] = q.clamp(0.0, self.core.inventory[g]);
        }

        let mut args = Vec::with_capacity(n + 1);
        args.push(self.labor_hired);
        args.extend_from_slice(&used);
        let output = self.production.f(&args);

        for g in 0..n {
            self.core.inventory[g] += output[g] - used[g];
        }
        output
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

    pub fn flush_job_offers(&mut self, job_market: &JobMarket) {
        self.my_job_offers
            .retain(|&k| job_market.get(k).is_some_and(|o| o.amount_left > 0));
    }

    pub fn id(&self) -> AgentId {
        self.core.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{FirmCtx, GoodOfferSpec, JobOfferSpec, MarketView, OfferOrder};
    use crate::functions::ces_vec_to_vec;
    use approx::assert_relative_eq;

    struct Inert;
    impl FirmDecisionMaker for Inert {
        fn choose_goods(&mut self, _: &FirmCtx, _: &MarketView<'_>) -> Vec<OfferOrder> {
            Vec::new()
        }
        fn choose_production_inputs(&mut self, _: &FirmCtx, _: &MarketView<'_>) -> Vec<Quantity> {
            Vec::new()
        }
        fn choose_good_offers(&mut self, _: &FirmCtx, _: &MarketView<'_>) -> Vec<GoodOfferSpec> {
            Vec::new()
        }
        fn choose_job_offers(&mut self, _: &FirmCtx, _: &MarketView<'_>) -> Vec<JobOfferSpec> {
            Vec::new()
        }
    }

    #[test]
    fn produce_nets_output_against_inputs() {
        let production = ces_vec_to_vec(
            vec![1.0, 1.0],
            vec![vec![1.0, 0.5, 0.5], vec![1.0, 0.5, 0.5]],
            vec![3.0, 3.0],
        )
        .unwrap();
        let mut firm = Firm {
            core: AgentCore::new(AgentId(0), 0, vec![4.0, 4.0], 0.0),
            owners: vec![AgentId(1)],
            labor_hired: 0.5,
            my_job_offers: Vec::new(),
            production,
            decision_maker: Box::new(Inert),
        };

        // Request more than inventory; the clamp caps usage at what's held.
        let output = firm.produce(&[10.0, 1.0]);
        assert_eq!(output.len(), 2);
        assert_relative_eq!(firm.core.inventory[0], 4.0 - 4.0 + output[0]);
        assert_relative_eq!(firm.core.inventory[1], 4.0 - 1.0 + output[1]);
        assert!(firm.core.inventory.iter().all(|&q| q >= 0.0));
    }
}
