//! The economy: agent registry, market ownership, and the step driver.
//!
//! All cross-agent mutation (finalizing trades and hires) happens here,
//! through the registry, so offers can refer to agents by their stable
//! integer ids and never extend an agent's lifetime.
//!
//! Step order within one tick: every person in registration order, then
//! every firm, then a flush pass over both markets. This ordering is the
//! source of deterministic reproducibility modulo the policy's RNG.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::agents::{AgentCore, Firm, Person};
use crate::decision::{FirmDecisionMaker, MarketView, PersonDecisionMaker};
use crate::error::{Result, SimError};
use crate::functions::{VecToScalar, VecToVec};
use crate::market::{JobMarket, JobOffer, Market, Offer, Response};
use crate::types::{AgentId, AgentRef, OfferKey};

// ============================================================================
// Registration seeds
// ============================================================================

pub struct PersonSeed {
    pub inventory: Vec<f64>,
    pub money: f64,
    pub utility: VecToScalar,
    pub discount_rate: f64,
    pub decision_maker: Box<dyn PersonDecisionMaker>,
}

pub struct FirmSeed {
    pub owners: Vec<AgentId>,
    pub inventory: Vec<f64>,
    pub money: f64,
    pub production: VecToVec,
    pub decision_maker: Box<dyn FirmDecisionMaker>,
}

// ============================================================================
// Economy
// ============================================================================

pub struct Economy {
    time: u64,
    goods: Vec<String>,
    pub persons: Vec<Person>,
    pub firms: Vec<Firm>,
    /// Registry position of every agent, indexed by `AgentId`.
    agent_refs: Vec<AgentRef>,
    pub market: Market,
    pub job_market: JobMarket,
    rng: StdRng,
}

impl Economy {
    pub fn new(goods: Vec<String>, seed: u64) -> Self {
        Economy {
            time: 0,
            goods,
            persons: Vec::new(),
            firms: Vec::new(),
            agent_refs: Vec::new(),
            market: Market::new(),
            job_market: JobMarket::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn goods(&self) -> &[String] {
        &self.goods
    }

    pub fn num_goods(&self) -> usize {
        self.goods.len()
    }

    pub fn good_name(&self, id: usize) -> &str {
        &self.goods[id]
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn agent_ref(&self, id: AgentId) -> AgentRef {
        self.agent_refs[id.index()]
    }

    pub fn num_agents(&self) -> usize {
        self.agent_refs.len()
    }

    // === Registration ===

    /// Register a person. Fails fast on configuration bugs: wrong inventory
    /// length, a utility function of the wrong arity, or a decision maker
    /// already bound elsewhere.
    pub fn add_person(&mut self, seed: PersonSeed) -> Result<AgentId> {
        if seed.inventory.len() != self.num_goods() {
            return Err(SimError::InventoryLength {
                got: seed.inventory.len(),
                expected: self.num_goods(),
            });
        }
        if seed.utility.num_inputs() != self.num_goods() + 1 {
            return Err(SimError::UtilityArity {
                got: seed.utility.num_inputs(),
                expected: self.num_goods() + 1,
            });
        }
        let id = AgentId(self.agent_refs.len() as u32);
        let mut decision_maker = seed.decision_maker;
        decision_maker.bind(id)?;

        self.agent_refs.push(AgentRef::Person(self.persons.len()));
        self.persons.push(Person {
            core: AgentCore::new(id, self.time, seed.inventory, seed.money),
            labor: 0.0,
            job_responses: Vec::new(),
            discount_rate: seed.discount_rate,
            utility: seed.utility,
            decision_maker,
        });
        Ok(id)
    }

    /// Register a firm bound to this economy.
    pub fn add_firm(&mut self, seed: FirmSeed) -> Result<AgentId> {
        if seed.inventory.len() != self.num_goods() {
            return Err(SimError::InventoryLength {
                got: seed.inventory.len(),
                expected: self.num_goods(),
            });
        }
        if seed.production.num_inputs() != self.num_goods() + 1 {
            return Err(SimError::ProductionArity {
                got: seed.production.num_inputs(),
                expected: self.num_goods() + 1,
            });
        }
        if seed.production.num_outputs() != self.num_goods() {
            return Err(SimError::ProductionOutputs {
                got: seed.production.num_outputs(),
                expected: self.num_goods(),
            });
        }
        if seed.owners.is_empty() {
            return Err(SimError::NoOwners);
        }
        let id = AgentId(self.agent_refs.len() as u32);
        let mut decision_maker = seed.decision_maker;
        decision_maker.bind(id)?;

        self.agent_refs.push(AgentRef::Firm(self.firms.len()));
        self.firms.push(Firm {
            core: AgentCore::new(id, self.time, seed.inventory, seed.money),
            owners: seed.owners,
            labor_hired: 0.0,
            my_job_offers: Vec::new(),
            production: seed.production,
            decision_maker,
        });
        Ok(id)
    }

    // === Step driver ===

    /// Advance the economy by one step.
    ///
    /// Returns false without stepping if any agent has not caught up to the
    /// current clock (an agent never steps twice in the same tick).
    pub fn time_step(&mut self) -> bool {
        let caught_up = self.persons.iter().all(|p| p.core.time == self.time)
            && self.firms.iter().all(|f| f.core.time == self.time);
        if !caught_up {
            return false;
        }
        self.time += 1;

        for i in 0..self.persons.len() {
            self.step_person(i);
        }
        for i in 0..self.firms.len() {
            self.step_firm(i);
        }

        let swept = self.market.flush() + self.job_market.flush();
        tracing::debug!(
            target: "flush",
            time = self.time,
            swept,
            offers = self.market.len(),
            job_offers = self.job_market.len(),
        );
        true
    }

    /// Person step: search for a job, buy goods, run the sell phase (review
    /// plus any posted round), consume, then flush stale bookkeeping and
    /// release this period's labor.
    fn step_person(&mut self, i: usize) {
        let Economy {
            time,
            persons,
            firms,
            agent_refs,
            market,
            job_market,
            ..
        } = self;
        let time = *time;
        if persons[i].core.time >= time {
            return;
        }
        persons[i].core.time = time;
        let id = persons[i].id();

        // search_for_job
        let ctx = persons[i].ctx();
        let orders = {
            let view = MarketView {
                market,
                job_market,
                time,
            };
            persons[i].decision_maker.choose_jobs(&ctx, &view)
        };
        for order in orders {
            for _ in 0..order.count {
                let Some(offer) = job_market.get_mut(order.offer) else {
                    continue;
                };
                if !offer.is_available(time) || offer.offerer == id {
                    continue;
                }
                offer.responses.push(Response {
                    responder: id,
                    time,
                });
                persons[i].job_responses.push(order.offer);
            }
        }

        // buy_goods
        let ctx = persons[i].ctx();
        let orders = {
            let view = MarketView {
                market,
                job_market,
                time,
            };
            persons[i].decision_maker.choose_goods(&ctx, &view)
        };
        respond_to_goods(&mut persons[i].core, market, &orders, time);

        // sell_goods: review pending responses, then post any new round
        let offerer = AgentRef::Person(i);
        review_goods_offers(persons, firms, agent_refs, market, offerer, time);
        let ctx = persons[i].ctx();
        let specs = {
            let view = MarketView {
                market,
                job_market,
                time,
            };
            persons[i].decision_maker.choose_good_offers(&ctx, &view)
        };
        post_goods_round(&mut persons[i].core, market, specs, time);

        // consume_goods
        let ctx = persons[i].ctx();
        let amounts = {
            let view = MarketView {
                market,
                job_market,
                time,
            };
            persons[i]
                .decision_maker
                .choose_goods_to_consume(&ctx, &view)
        };
        let consumed = persons[i].consume(&amounts);
        tracing::trace!(
            target: "consume",
            time,
            agent = id.0,
            total = consumed.iter().sum::<f64>(),
        );

        // flushes, then release this period's labor
        persons[i].flush_job_responses(job_market);
        persons[i].flush_offers(market);
        persons[i].flush_responses(market);
        persons[i].labor = 0.0;
    }

    /// Firm step: review job-offer responses, buy goods, produce, run the
    /// sell phase, pay dividends, then post the next round of job offers.
    fn step_firm(&mut self, i: usize) {
        let Economy {
            time,
            persons,
            firms,
            agent_refs,
            market,
            job_market,
            ..
        } = self;
        let time = *time;
        if firms[i].core.time >= time {
            return;
        }
        firms[i].core.time = time;
        let id = firms[i].id();

        // check_existing_job_offers
        review_job_offers(persons, firms, agent_refs, job_market, i, time);

        // buy_goods
        let ctx = firms[i].ctx();
        let orders = {
            let view = MarketView {
                market,
                job_market,
                time,
            };
            firms[i].decision_maker.choose_goods(&ctx, &view)
        };
        respond_to_goods(&mut firms[i].core, market, &orders, time);

        // produce
        let ctx = firms[i].ctx();
        let inputs = {
            let view = MarketView {
                market,
                job_market,
                time,
            };
            firms[i]
                .decision_maker
                .choose_production_inputs(&ctx, &view)
        };
        let output = firms[i].produce(&inputs);
        tracing::trace!(
            target: "production",
            time,
            agent = id.0,
            labor = firms[i].labor_hired,
            output = output.iter().sum::<f64>(),
        );

        // sell_goods
        let offerer = AgentRef::Firm(i);
        review_goods_offers(persons, firms, agent_refs, market, offerer, time);
        let ctx = firms[i].ctx();
        let specs = {
            let view = MarketView {
                market,
                job_market,
                time,
            };
            firms[i].decision_maker.choose_good_offers(&ctx, &view)
        };
        post_goods_round(&mut firms[i].core, market, specs, time);

        // pay_dividends
        let money = firms[i].core.money;
        if money > 0.0 && !firms[i].owners.is_empty() {
            let owners = firms[i].owners.clone();
            let share = money / owners.len() as f64;
            firms[i].core.money = 0.0;
            for owner in owners {
                match agent_refs[owner.index()] {
                    AgentRef::Person(p) => persons[p].core.money += share,
                    AgentRef::Firm(f) if f != i => firms[f].core.money += share,
                    // A self-owned share stays in the till.
                    AgentRef::Firm(_) => firms[i].core.money += share,
                }
            }
            tracing::debug!(target: "dividend", time, agent = id.0, paid = money);
        }

        // search_for_laborers
        firms[i].labor_hired = 0.0;
        let ctx = firms[i].ctx();
        let specs = {
            let view = MarketView {
                market,
                job_market,
                time,
            };
            firms[i].decision_maker.choose_job_offers(&ctx, &view)
        };
        let non_empty = specs.iter().any(|s| s.amount > 0);
        if non_empty {
            for &k in &firms[i].my_job_offers {
                if let Some(offer) = job_market.get_mut(k) {
                    offer.amount_left = 0;
                }
            }
        }
        for spec in specs {
            if spec.amount == 0 {
                continue;
            }
            let key = job_market.post(JobOffer::new(id, time, spec.amount, spec.labor, spec.wage));
            firms[i].my_job_offers.push(key);
        }

        // flushes
        firms[i].flush_job_offers(job_market);
        firms[i].flush_offers(market);
        firms[i].flush_responses(market);
    }
}

// ============================================================================
// Market reporting
// ============================================================================

/// Per-good asking-price summary of the current goods market.
#[derive(Debug, Clone, Copy)]
pub struct GoodMarketStats {
    pub offers: usize,
    pub mean_unit_price: Option<f64>,
}

/// Snapshot of both markets, suitable for per-step progress output.
#[derive(Debug, Clone)]
pub struct MarketReport {
    pub time: u64,
    pub goods: Vec<(String, GoodMarketStats)>,
    pub job_offers: usize,
    pub mean_wage_per_labor: Option<f64>,
}

impl Economy {
    pub fn market_report(&self) -> MarketReport {
        let goods = self
            .goods
            .iter()
            .enumerate()
            .map(|(g, name)| {
                let mut offers = 0;
                let mut price_sum = 0.0;
                for (_, offer) in self.market.iter() {
                    if offer.quantities[g] > 0.0 {
                        offers += 1;
                        price_sum += offer.price / offer.quantities[g];
                    }
                }
                let mean_unit_price = (offers > 0).then(|| price_sum / offers as f64);
                (name.clone(), GoodMarketStats {
                    offers,
                    mean_unit_price,
                })
            })
            .collect();

        let job_offers = self.job_market.len();
        let wage_sum: f64 = self
            .job_market
            .iter()
            .filter(|(_, o)| o.labor > 0.0)
            .map(|(_, o)| o.wage / o.labor)
            .sum();
        let mean_wage_per_labor = (job_offers > 0).then(|| wage_sum / job_offers as f64);

        MarketReport {
            time: self.time,
            goods,
            job_offers,
            mean_wage_per_labor,
        }
    }
}

impl std::fmt::Display for MarketReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "time = {}:", self.time)?;
        for (name, stats) in &self.goods {
            match stats.mean_unit_price {
                Some(price) => writeln!(
                    f,
                    "  {name}: avg. price = {price:.4} (num. offers = {})",
                    stats.offers
                )?,
                None => writeln!(f, "  {name}: avg. price = NA (num. offers = 0)")?,
            }
        }
        match self.mean_wage_per_labor {
            Some(wage) => write!(
                f,
                "  avg. wage per unit of labor = {wage:.4} (num. offers = {})",
                self.job_offers
            ),
            None => write!(f, "  [no job offers]"),
        }
    }
}

// ============================================================================
// Protocol helpers
// ============================================================================

/// Record `count` responses per requested offer, skipping unavailable
/// offers and the agent's own listings.
fn respond_to_goods(
    core: &mut AgentCore,
    market: &mut Market,
    orders: &[crate::decision::OfferOrder],
    time: u64,
) {
    for order in orders {
        for _ in 0..order.count {
            let Some(offer) = market.get_mut(order.offer) else {
                continue;
            };
            if !offer.is_available(time) || offer.offerer == core.id {
                continue;
            }
            offer.responses.push(Response {
                responder: core.id,
                time,
            });
            core.my_responses.push(order.offer);
        }
    }
}

/// Cancel the previous round and post the new one. An empty round leaves
/// existing offers on the market untouched.
fn post_goods_round(
    core: &mut AgentCore,
    market: &mut Market,
    specs: Vec<crate::decision::GoodOfferSpec>,
    time: u64,
) {
    let non_empty = specs.iter().any(|s| s.amount > 0);
    if non_empty {
        for &k in &core.my_offers {
            if let Some(offer) = market.get_mut(k) {
                offer.amount_left = 0;
            }
        }
    }
    for spec in specs {
        if spec.amount == 0 {
            continue;
        }
        let key = market.post(Offer::new(
            core.id,
            time,
            spec.amount,
            spec.good_ids,
            spec.quantities,
            spec.price,
        ));
        core.my_offers.push(key);
    }
}

/// Review pending responses to the offerer's goods offers.
///
/// Responses are processed in insertion order, each at most once. The
/// offerer must still hold the promised goods (a shortfall kills the offer);
/// the responder must still hold the price (a shortfall rejects the response
/// but leaves the offer available). A completed slot transfers goods and
/// money atomically and decrements `amount_left`.
fn review_goods_offers(
    persons: &mut [Person],
    firms: &mut [Firm],
    agent_refs: &[AgentRef],
    market: &mut Market,
    offerer: AgentRef,
    time: u64,
) {
    let keys: Vec<OfferKey> = match offerer {
        AgentRef::Person(i) => persons[i].core.my_offers.clone(),
        AgentRef::Firm(i) => firms[i].core.my_offers.clone(),
    };

    for key in keys {
        let (good_ids, quantities, price, time_created, mut amount_left, responses) = {
            let Some(offer) = market.get_mut(key) else {
                continue;
            };
            if offer.amount_left == 0 {
                continue;
            }
            (
                offer.good_ids.clone(),
                offer.quantities.clone(),
                offer.price,
                offer.time_created,
                offer.amount_left,
                std::mem::take(&mut offer.responses),
            )
        };

        for response in responses {
            if amount_left == 0 {
                break;
            }
            // The settle barrier: a response can never land in the same step
            // the offer was posted.
            if response.time <= time_created {
                continue;
            }
            let responder = agent_refs[response.responder.index()];
            if responder == offerer {
                continue;
            }
            let (off_core, resp_core) = cores_pair(persons, firms, offerer, responder);

            if !off_core.holds(&good_ids, &quantities) {
                // The offer lied; kill it.
                amount_left = 0;
                break;
            }
            if !resp_core.my_responses.contains(&key) {
                continue;
            }
            if resp_core.money < price {
                continue;
            }

            resp_core.money -= price;
            off_core.money += price;
            for &g in &good_ids {
                resp_core.inventory[g] += quantities[g];
                off_core.inventory[g] -= quantities[g];
            }
            amount_left -= 1;
            tracing::debug!(
                target: "trade",
                time,
                seller = off_core.id.0,
                buyer = resp_core.id.0,
                price,
            );
        }

        if let Some(offer) = market.get_mut(key) {
            offer.amount_left = amount_left;
        }
    }
}

/// Review pending responses to a firm's job offers.
///
/// The firm must still hold the wage (a shortfall kills the offer); the
/// person's labor accumulator must stay within the period (a breach rejects
/// the response). A completed slot moves the wage to the person and the
/// labor to the firm's `labor_hired`.
fn review_job_offers(
    persons: &mut [Person],
    firms: &mut [Firm],
    agent_refs: &[AgentRef],
    job_market: &mut JobMarket,
    firm_idx: usize,
    time: u64,
) {
    let keys = firms[firm_idx].my_job_offers.clone();
    for key in keys {
        let (labor, wage, time_created, mut amount_left, responses) = {
            let Some(offer) = job_market.get_mut(key) else {
                continue;
            };
            if offer.amount_left == 0 {
                continue;
            }
            (
                offer.labor,
                offer.wage,
                offer.time_created,
                offer.amount_left,
                std::mem::take(&mut offer.responses),
            )
        };

        for response in responses {
            if amount_left == 0 {
                break;
            }
            if response.time <= time_created {
                continue;
            }
            let AgentRef::Person(p) = agent_refs[response.responder.index()] else {
                continue;
            };
            let firm = &mut firms[firm_idx];
            let person = &mut persons[p];

            if firm.core.money < wage {
                amount_left = 0;
                break;
            }
            if !person.job_responses.contains(&key) {
                continue;
            }
            if !person.can_commit_labor(labor) {
                continue;
            }

            firm.core.money -= wage;
            person.core.money += wage;
            person.labor += labor;
            firm.labor_hired += labor;
            amount_left -= 1;
            tracing::debug!(
                target: "hire",
                time,
                firm = firm.core.id.0,
                person = person.core.id.0,
                labor,
                wage,
            );
        }

        if let Some(offer) = job_market.get_mut(key) {
            offer.amount_left = amount_left;
        }
    }
}

/// Simultaneous mutable access to two distinct agents' cores.
fn cores_pair<'a>(
    persons: &'a mut [Person],
    firms: &'a mut [Firm],
    a: AgentRef,
    b: AgentRef,
) -> (&'a mut AgentCore, &'a mut AgentCore) {
    match (a, b) {
        (AgentRef::Person(i), AgentRef::Firm(j)) => (&mut persons[i].core, &mut firms[j].core),
        (AgentRef::Firm(i), AgentRef::Person(j)) => (&mut firms[i].core, &mut persons[j].core),
        (AgentRef::Person(i), AgentRef::Person(j)) => {
            let (x, y) = pair_mut(persons, i, j);
            (&mut x.core, &mut y.core)
        }
        (AgentRef::Firm(i), AgentRef::Firm(j)) => {
            let (x, y) = pair_mut(firms, i, j);
            (&mut x.core, &mut y.core)
        }
    }
}

fn pair_mut<T>(slice: &mut [T], i: usize, j: usize) -> (&mut T, &mut T) {
    assert_ne!(i, j, "an agent cannot transact with itself");
    if i < j {
        let (left, right) = slice.split_at_mut(j);
        (&mut left[i], &mut right[0])
    } else {
        let (left, right) = slice.split_at_mut(i);
        (&mut right[0], &mut left[j])
    }
}
