//! Whole-economy invariant and protocol scenarios driven by deterministic
//! stub decision makers.

use std::collections::HashMap;

use agora_core::{
    ces_vec_to_vec, Economy, FirmCtx, FirmDecisionMaker, FirmSeed, GoodOfferSpec, JobOfferSpec,
    JobOrder, MarketView, OfferOrder, PersonCtx, PersonDecisionMaker, PersonSeed, Quantity,
    VecToScalar,
};

const BREAD: usize = 0;

// ============================================================================
// Stub decision makers
// ============================================================================

/// Does nothing at all.
struct InertPerson;
impl PersonDecisionMaker for InertPerson {
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

struct InertFirm;
impl FirmDecisionMaker for InertFirm {
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

/// Posts scripted goods offers on given steps, buys nothing.
struct ScriptedSeller {
    rounds: HashMap<u64, Vec<GoodOfferSpec>>,
}

impl ScriptedSeller {
    fn new(rounds: impl IntoIterator<Item = (u64, Vec<GoodOfferSpec>)>) -> Self {
        ScriptedSeller {
            rounds: rounds.into_iter().collect(),
        }
    }
}

impl PersonDecisionMaker for ScriptedSeller {
    fn choose_goods(&mut self, _: &PersonCtx, _: &MarketView<'_>) -> Vec<OfferOrder> {
        Vec::new()
    }
    fn choose_jobs(&mut self, _: &PersonCtx, _: &MarketView<'_>) -> Vec<JobOrder> {
        Vec::new()
    }
    fn choose_goods_to_consume(&mut self, _: &PersonCtx, _: &MarketView<'_>) -> Vec<Quantity> {
        Vec::new()
    }
    fn choose_good_offers(&mut self, ctx: &PersonCtx, _: &MarketView<'_>) -> Vec<GoodOfferSpec> {
        self.rounds.remove(&ctx.time).unwrap_or_default()
    }
}

/// Responds once to every available goods offer.
struct GreedyBuyer;
impl PersonDecisionMaker for GreedyBuyer {
    fn choose_goods(&mut self, _: &PersonCtx, view: &MarketView<'_>) -> Vec<OfferOrder> {
        view.available_offers()
            .into_iter()
            .map(|offer| OfferOrder { offer, count: 1 })
            .collect()
    }
    fn choose_jobs(&mut self, _: &PersonCtx, _: &MarketView<'_>) -> Vec<JobOrder> {
        Vec::new()
    }
    fn choose_goods_to_consume(&mut self, _: &PersonCtx, _: &MarketView<'_>) -> Vec<Quantity> {
        Vec::new()
    }
}

/// Applies `count` times to every available job offer.
struct JobSeeker {
    count: u32,
}
impl PersonDecisionMaker for JobSeeker {
    fn choose_goods(&mut self, _: &PersonCtx, _: &MarketView<'_>) -> Vec<OfferOrder> {
        Vec::new()
    }
    fn choose_jobs(&mut self, _: &PersonCtx, view: &MarketView<'_>) -> Vec<JobOrder> {
        view.available_job_offers()
            .into_iter()
            .map(|offer| JobOrder {
                offer,
                count: self.count,
            })
            .collect()
    }
    fn choose_goods_to_consume(&mut self, _: &PersonCtx, _: &MarketView<'_>) -> Vec<Quantity> {
        Vec::new()
    }
}

/// Firm that posts scripted good-offer and job-offer rounds per step.
struct ScriptedFirm {
    good_rounds: HashMap<u64, Vec<GoodOfferSpec>>,
    job_rounds: HashMap<u64, Vec<JobOfferSpec>>,
}

impl ScriptedFirm {
    fn goods(rounds: impl IntoIterator<Item = (u64, Vec<GoodOfferSpec>)>) -> Self {
        ScriptedFirm {
            good_rounds: rounds.into_iter().collect(),
            job_rounds: HashMap::new(),
        }
    }

    fn jobs(rounds: impl IntoIterator<Item = (u64, Vec<JobOfferSpec>)>) -> Self {
        ScriptedFirm {
            good_rounds: HashMap::new(),
            job_rounds: rounds.into_iter().collect(),
        }
    }
}

impl FirmDecisionMaker for ScriptedFirm {
    fn choose_goods(&mut self, _: &FirmCtx, _: &MarketView<'_>) -> Vec<OfferOrder> {
        Vec::new()
    }
    fn choose_production_inputs(&mut self, _: &FirmCtx, _: &MarketView<'_>) -> Vec<Quantity> {
        Vec::new()
    }
    fn choose_good_offers(&mut self, ctx: &FirmCtx, _: &MarketView<'_>) -> Vec<GoodOfferSpec> {
        self.good_rounds.remove(&ctx.time).unwrap_or_default()
    }
    fn choose_job_offers(&mut self, ctx: &FirmCtx, _: &MarketView<'_>) -> Vec<JobOfferSpec> {
        self.job_rounds.remove(&ctx.time).unwrap_or_default()
    }
}

// ============================================================================
// Builders
// ============================================================================

fn two_good_economy() -> Economy {
    Economy::new(vec!["bread".into(), "capital".into()], 42)
}

fn person(
    economy: &mut Economy,
    inventory: Vec<f64>,
    money: f64,
    dm: Box<dyn PersonDecisionMaker>,
) -> agora_core::AgentId {
    economy
        .add_person(PersonSeed {
            inventory,
            money,
            utility: VecToScalar::ces(1.0, vec![0.5, 0.5, 0.5], 1.3),
            discount_rate: 0.9,
            decision_maker: dm,
        })
        .unwrap()
}

fn firm(
    economy: &mut Economy,
    owners: Vec<agora_core::AgentId>,
    inventory: Vec<f64>,
    money: f64,
    dm: Box<dyn FirmDecisionMaker>,
) -> agora_core::AgentId {
    economy
        .add_firm(FirmSeed {
            owners,
            inventory,
            money,
            production: ces_vec_to_vec(
                vec![0.5, 1.0],
                vec![vec![1.0, 0.0, 1.0], vec![1.0, 0.0, 1.0]],
                vec![3.0, 5.0],
            )
            .unwrap(),
            decision_maker: dm,
        })
        .unwrap()
}

fn bread_offer(amount: u32, price: f64) -> GoodOfferSpec {
    GoodOfferSpec {
        amount,
        good_ids: vec![BREAD],
        quantities: vec![1.0, 0.0],
        price,
    }
}

fn assert_core_invariants(economy: &Economy) {
    for p in &economy.persons {
        assert!(
            p.core.inventory.iter().all(|&q| q >= 0.0),
            "person inventory went negative"
        );
        assert!(p.core.money >= 0.0, "person money went negative");
        assert!(p.labor <= 1.0 + 1e-12, "person labor exceeded the period");
    }
    for f in &economy.firms {
        assert!(
            f.core.inventory.iter().all(|&q| q >= 0.0),
            "firm inventory went negative"
        );
        assert!(f.core.money >= 0.0, "firm money went negative");
    }
    // Flush completeness: no dead offer survives a step.
    assert!(economy.market.iter().all(|(_, o)| o.amount_left > 0));
    assert!(economy.job_market.iter().all(|(_, o)| o.amount_left > 0));
}

// ============================================================================
// S1 - minimal barter
// ============================================================================

#[test]
fn minimal_barter_settles_one_step_after_response() {
    let mut economy = two_good_economy();
    let seller = person(
        &mut economy,
        vec![5.0, 0.0],
        0.0,
        Box::new(ScriptedSeller::new([(1, vec![bread_offer(1, 1.0)])])),
    );
    let buyer = person(&mut economy, vec![0.0, 0.0], 10.0, Box::new(GreedyBuyer));
    let owner = seller;
    firm(&mut economy, vec![owner], vec![0.0, 0.0], 0.0, Box::new(InertFirm));

    // Step 1: the offer is posted but settles one step later.
    assert!(economy.time_step());
    assert_eq!(economy.market.len(), 1);

    // Step 2: the buyer responds; nothing settles yet because the seller
    // reviewed before the response existed.
    assert!(economy.time_step());
    let seller_ref = |e: &Economy| match e.agent_ref(seller) {
        agora_core::AgentRef::Person(i) => i,
        _ => unreachable!(),
    };
    let buyer_ref = |e: &Economy| match e.agent_ref(buyer) {
        agora_core::AgentRef::Person(i) => i,
        _ => unreachable!(),
    };
    assert_eq!(economy.persons[seller_ref(&economy)].core.inventory[BREAD], 5.0);
    assert_eq!(economy.market.len(), 1);

    // Step 3: the seller reviews the pending response and the trade
    // finalizes; the dead offer is flushed at the end of the step.
    assert!(economy.time_step());
    let s = &economy.persons[seller_ref(&economy)];
    let b = &economy.persons[buyer_ref(&economy)];
    assert_eq!(s.core.inventory[BREAD], 4.0);
    assert_eq!(s.core.money, 1.0);
    assert_eq!(b.core.inventory[BREAD], 1.0);
    assert_eq!(b.core.money, 9.0);
    assert!(economy.market.is_empty());
    assert_core_invariants(&economy);
}

// ============================================================================
// S2 - insufficient funds
// ============================================================================

#[test]
fn underfunded_buyer_is_rejected_without_state_change() {
    let mut economy = two_good_economy();
    let seller = person(
        &mut economy,
        vec![5.0, 0.0],
        0.0,
        Box::new(ScriptedSeller::new([(1, vec![bread_offer(1, 1.0)])])),
    );
    let buyer = person(&mut economy, vec![0.0, 0.0], 0.5, Box::new(GreedyBuyer));

    economy.time_step(); // post
    economy.time_step(); // respond
    economy.time_step(); // review: finalize fails on the buyer's money

    let s = match economy.agent_ref(seller) {
        agora_core::AgentRef::Person(i) => &economy.persons[i],
        _ => unreachable!(),
    };
    let b = match economy.agent_ref(buyer) {
        agora_core::AgentRef::Person(i) => &economy.persons[i],
        _ => unreachable!(),
    };
    assert_eq!(s.core.inventory[BREAD], 5.0);
    assert_eq!(s.core.money, 0.0);
    assert_eq!(b.core.inventory[BREAD], 0.0);
    assert_eq!(b.core.money, 0.5);

    // The offer survives: a responder-side shortfall leaves it available.
    assert_eq!(economy.market.len(), 1);
    assert!(economy
        .market
        .iter()
        .all(|(_, o)| o.amount_left == 1));
    assert_core_invariants(&economy);
}

// ============================================================================
// S3 - self-cancellation on a new round
// ============================================================================

#[test]
fn posting_a_new_round_cancels_the_previous_one() {
    let mut economy = two_good_economy();
    let owner = person(&mut economy, vec![0.0, 0.0], 0.0, Box::new(InertPerson));
    firm(
        &mut economy,
        vec![owner],
        vec![10.0, 0.0],
        0.0,
        Box::new(ScriptedFirm::goods([
            (1, vec![bread_offer(2, 1.0)]),
            (2, vec![bread_offer(3, 1.1)]),
        ])),
    );

    economy.time_step();
    assert_eq!(economy.market.len(), 1);
    let first_key = economy.market.keys()[0];

    // The new round zeroes the old offer, which the end-of-step flush sweeps.
    economy.time_step();
    assert_eq!(economy.market.len(), 1);
    assert!(economy.market.get(first_key).is_none());
    assert!(economy.market.iter().all(|(_, o)| o.amount_left == 3));
    assert_core_invariants(&economy);
}

// ============================================================================
// S4 - dividends
// ============================================================================

#[test]
fn dividends_split_evenly_and_zero_the_firm() {
    let mut economy = two_good_economy();
    let a = person(&mut economy, vec![0.0, 0.0], 1.0, Box::new(InertPerson));
    let b = person(&mut economy, vec![0.0, 0.0], 2.0, Box::new(InertPerson));
    firm(
        &mut economy,
        vec![a, b],
        vec![0.0, 0.0],
        10.0,
        Box::new(InertFirm),
    );

    economy.time_step();

    assert_eq!(economy.persons[0].core.money, 6.0);
    assert_eq!(economy.persons[1].core.money, 7.0);
    assert_eq!(economy.firms[0].core.money, 0.0);
    assert_core_invariants(&economy);
}

// ============================================================================
// Slot accounting
// ============================================================================

#[test]
fn one_slot_is_accepted_at_most_once() {
    let mut economy = two_good_economy();
    let seller = person(
        &mut economy,
        vec![5.0, 0.0],
        0.0,
        Box::new(ScriptedSeller::new([(1, vec![bread_offer(1, 1.0)])])),
    );
    // Two eager buyers race for a single slot.
    person(&mut economy, vec![0.0, 0.0], 10.0, Box::new(GreedyBuyer));
    person(&mut economy, vec![0.0, 0.0], 10.0, Box::new(GreedyBuyer));

    for _ in 0..4 {
        assert!(economy.time_step());
        assert_core_invariants(&economy);
    }

    let sold: f64 = 5.0
        - match economy.agent_ref(seller) {
            agora_core::AgentRef::Person(i) => economy.persons[i].core.inventory[BREAD],
            _ => unreachable!(),
        };
    assert_eq!(sold, 1.0, "a single slot must settle exactly once");

    let bought: f64 = economy.persons[1].core.inventory[BREAD]
        + economy.persons[2].core.inventory[BREAD];
    assert_eq!(bought, 1.0);

    // Goods and money are conserved across the trade.
    let total_bread: f64 = economy
        .persons
        .iter()
        .map(|p| p.core.inventory[BREAD])
        .sum();
    assert_eq!(total_bread, 5.0);
    let total_money: f64 = economy.persons.iter().map(|p| p.core.money).sum();
    assert_eq!(total_money, 20.0);
}

// ============================================================================
// Labor market
// ============================================================================

#[test]
fn labor_cap_rejects_overcommitment() {
    let mut economy = two_good_economy();
    let worker = person(
        &mut economy,
        vec![0.0, 0.0],
        0.0,
        Box::new(JobSeeker { count: 2 }),
    );
    // Dividends drain the firm every step, so only a zero-wage offer can
    // pass the money check at review time; the labor cap is what's under
    // test here.
    firm(
        &mut economy,
        vec![worker],
        vec![0.0, 0.0],
        10.0,
        Box::new(ScriptedFirm::jobs([(
            1,
            vec![JobOfferSpec {
                amount: 2,
                labor: 0.6,
                wage: 0.0,
            }],
        )])),
    );

    economy.time_step(); // firm pays out dividends, then posts the offer
    economy.time_step(); // worker applies twice; only one slot fits the period

    let w = match economy.agent_ref(worker) {
        agora_core::AgentRef::Person(i) => &economy.persons[i],
        _ => unreachable!(),
    };
    assert!((w.labor - 0.6).abs() < 1e-12);
    assert_eq!(w.core.money, 10.0, "the dividend was the only transfer");
    assert!((economy.firms[0].labor_hired - 0.6).abs() < 1e-12);
    assert_core_invariants(&economy);
}

#[test]
fn wage_shortfall_kills_the_job_offer() {
    let mut economy = two_good_economy();
    let worker = person(
        &mut economy,
        vec![0.0, 0.0],
        0.0,
        Box::new(JobSeeker { count: 1 }),
    );
    // The firm promises a wage it cannot pay: dividends drain it first.
    firm(
        &mut economy,
        vec![worker],
        vec![0.0, 0.0],
        5.0,
        Box::new(ScriptedFirm::jobs([(
            1,
            vec![JobOfferSpec {
                amount: 1,
                labor: 0.5,
                wage: 10.0,
            }],
        )])),
    );

    economy.time_step();
    economy.time_step();

    let w = match economy.agent_ref(worker) {
        agora_core::AgentRef::Person(i) => &economy.persons[i],
        _ => unreachable!(),
    };
    assert_eq!(w.labor, 0.0);
    assert_eq!(w.core.money, 5.0, "dividend only; the hire never finalized");
    // The lying offer was zeroed and flushed.
    assert!(economy.job_market.is_empty());
    assert_core_invariants(&economy);
}
