pub mod firm;
pub mod person;

pub use firm::Firm;
pub use person::Person;

use crate::types::{AgentId, JobOfferKey, OfferKey, Quantity};

/// State shared by every agent: inventory, money, clock, and the offer
/// bookkeeping the market protocol needs.
#[derive(Debug)]
pub struct AgentCore {
    pub id: AgentId,
    /// The last economy step this agent completed.
    pub time: u64,
    pub inventory: Vec<Quantity>,
    pub money: f64,
    /// Goods offers this agent has listed on the market.
    pub my_offers: Vec<OfferKey>,
    /// Goods offers this agent has responded to.
    pub my_responses: Vec<OfferKey>,
}

impl AgentCore {
    pub fn new(id: AgentId, time: u64, inventory: Vec<Quantity>, money: f64) -> Self {
        AgentCore {
            id,
            time,
            inventory,
            money,
            my_offers: Vec::new(),
            my_responses: Vec::new(),
        }
    }

    pub fn add_to_inventory(&mut self, good_id: usize, quantity: Quantity) {
        self.inventory[good_id] += quantity;
    }

    /// Whether this agent still holds the goods an offer promises.
    pub fn holds(&self, good_ids: &[usize], quantities: &[Quantity]) -> bool {
        good_ids.iter().all(|&g| self.inventory[g] >= quantities[g])
    }
}

/// Job-market bookkeeping lives on the person side.
pub type JobResponses = Vec<JobOfferKey>;
