//! The stateful coupling between the agent world and the tensor world.
//!
//! The handler keeps a step counter synchronized with the economy: the
//! first decision call of each tick re-encodes both markets and pushes a
//! fresh per-agent row onto every log-probability, value, and reward table.
//! Decision methods run the heads, sample actions, and record the sampled
//! action's log-probability into `table[time - 1][agent]` under that
//! table's own mutex; the step advance itself is guarded by the handler's
//! clock mutex.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::constants::LARGE_NUMBER;
use crate::decision::{JobOrder, MarketView, OfferOrder};
use crate::error::Result;
use crate::types::{AgentId, JobOfferKey, OfferKey};

use super::distributions::{sample_bernoulli, sample_log_normal, sample_logit_normal};
use super::nets::{NetConfig, NetFamily};

type Table<T> = Vec<HashMap<AgentId, T>>;

/// Snapshot of both markets in tensor form, refreshed once per tick.
struct EncodedMarkets {
    time: u64,
    offer_keys: Vec<OfferKey>,
    encoded_offers: Option<Tensor>,
    job_offer_keys: Vec<JobOfferKey>,
    encoded_job_offers: Option<Tensor>,
}

/// Clones of every per-episode table, taken by the trainer after the final
/// step of an episode.
pub struct EpisodeTables {
    pub time: u64,
    pub purchase: Table<Tensor>,
    pub firm_purchase: Table<Tensor>,
    pub labor_search: Table<Tensor>,
    pub consumption: Table<Tensor>,
    pub production: Table<Tensor>,
    pub offer: Table<Tensor>,
    pub job_offer: Table<Tensor>,
    pub values: Table<Tensor>,
    pub rewards: Table<f64>,
}

pub struct NetHandler {
    pub nets: NetFamily,
    device: Device,
    clock: Mutex<EncodedMarkets>,
    purchase_logp: Mutex<Table<Tensor>>,
    firm_purchase_logp: Mutex<Table<Tensor>>,
    labor_search_logp: Mutex<Table<Tensor>>,
    consumption_logp: Mutex<Table<Tensor>>,
    production_logp: Mutex<Table<Tensor>>,
    offer_logp: Mutex<Table<Tensor>>,
    job_offer_logp: Mutex<Table<Tensor>>,
    values: Mutex<Table<Tensor>>,
    rewards: Mutex<Table<f64>>,
    rng: Mutex<StdRng>,
}

impl NetHandler {
    pub fn new(num_goods: usize, cfg: &NetConfig, device: Device, seed: u64) -> Result<Self> {
        let nets = NetFamily::new(num_goods, cfg, &device)?;
        Ok(NetHandler {
            nets,
            device,
            clock: Mutex::new(EncodedMarkets {
                time: 0,
                offer_keys: Vec::new(),
                encoded_offers: None,
                job_offer_keys: Vec::new(),
                encoded_job_offers: None,
            }),
            purchase_logp: Mutex::new(Vec::new()),
            firm_purchase_logp: Mutex::new(Vec::new()),
            labor_search_logp: Mutex::new(Vec::new()),
            consumption_logp: Mutex::new(Vec::new()),
            production_logp: Mutex::new(Vec::new()),
            offer_logp: Mutex::new(Vec::new()),
            job_offer_logp: Mutex::new(Vec::new()),
            values: Mutex::new(Vec::new()),
            rewards: Mutex::new(Vec::new()),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }

    pub fn time(&self) -> u64 {
        self.clock.lock().unwrap().time
    }

    /// Advance the handler if the caller's economy has moved past it.
    ///
    /// Exactly one caller per tick wins the race; the rest see the clock
    /// already caught up and fall through.
    pub fn sync(&self, view: &MarketView<'_>) -> Result<()> {
        let mut clock = self.clock.lock().unwrap();
        while view.time > clock.time {
            self.encode_markets(&mut clock, view)?;
            self.push_rows();
            clock.time += 1;
        }
        Ok(())
    }

    fn encode_markets(&self, clock: &mut EncodedMarkets, view: &MarketView<'_>) -> Result<()> {
        let num_goods = self.nets.num_goods;

        clock.offer_keys.clear();
        let mut features: Vec<f32> = Vec::new();
        for (key, offer) in view.market.iter() {
            clock.offer_keys.push(key);
            features.extend(offer.quantities.iter().map(|&q| q as f32));
            features.push(offer.price as f32);
        }
        clock.encoded_offers = if clock.offer_keys.is_empty() {
            None
        } else {
            let input = Tensor::from_vec(
                features,
                (clock.offer_keys.len(), num_goods + 1),
                &self.device,
            )?;
            Some(self.nets.offer_encoder.forward(&input)?)
        };

        clock.job_offer_keys.clear();
        let mut features: Vec<f32> = Vec::new();
        for (key, offer) in view.job_market.iter() {
            clock.job_offer_keys.push(key);
            features.push(offer.labor as f32);
            features.push(offer.wage as f32);
        }
        clock.encoded_job_offers = if clock.job_offer_keys.is_empty() {
            None
        } else {
            let input =
                Tensor::from_vec(features, (clock.job_offer_keys.len(), 2), &self.device)?;
            Some(self.nets.job_offer_encoder.forward(&input)?)
        };
        Ok(())
    }

    fn push_rows(&self) {
        self.purchase_logp.lock().unwrap().push(HashMap::new());
        self.firm_purchase_logp.lock().unwrap().push(HashMap::new());
        self.labor_search_logp.lock().unwrap().push(HashMap::new());
        self.consumption_logp.lock().unwrap().push(HashMap::new());
        self.production_logp.lock().unwrap().push(HashMap::new());
        self.offer_logp.lock().unwrap().push(HashMap::new());
        self.job_offer_logp.lock().unwrap().push(HashMap::new());
        self.values.lock().unwrap().push(HashMap::new());
        self.rewards.lock().unwrap().push(HashMap::new());
    }

    /// Clear all per-episode state; called between episodes.
    pub fn reset(&self) {
        let mut clock = self.clock.lock().unwrap();
        clock.time = 0;
        clock.offer_keys.clear();
        clock.encoded_offers = None;
        clock.job_offer_keys.clear();
        clock.encoded_job_offers = None;
        self.purchase_logp.lock().unwrap().clear();
        self.firm_purchase_logp.lock().unwrap().clear();
        self.labor_search_logp.lock().unwrap().clear();
        self.consumption_logp.lock().unwrap().clear();
        self.production_logp.lock().unwrap().clear();
        self.offer_logp.lock().unwrap().clear();
        self.job_offer_logp.lock().unwrap().clear();
        self.values.lock().unwrap().clear();
        self.rewards.lock().unwrap().clear();
    }

    // === Stack sampling ===

    /// Random sample (with replacement) of market indices to present to the
    /// goods encoder; empty when the market is empty.
    pub fn offer_stack(&self) -> Vec<usize> {
        let n = self.clock.lock().unwrap().offer_keys.len();
        self.sample_stack(n)
    }

    pub fn job_offer_stack(&self) -> Vec<usize> {
        let n = self.clock.lock().unwrap().job_offer_keys.len();
        self.sample_stack(n)
    }

    fn sample_stack(&self, n: usize) -> Vec<usize> {
        if n == 0 {
            return Vec::new();
        }
        let mut rng = self.rng.lock().unwrap();
        (0..self.nets.offer_encoder.stack_size)
            .map(|_| rng.random_range(0..n))
            .collect()
    }

    // === Tensor plumbing ===

    fn row(&self, values: &[f64]) -> Result<Tensor> {
        let data: Vec<f32> = values.iter().map(|&v| v as f32).collect();
        Ok(Tensor::from_vec(data, (1, values.len()), &self.device)?)
    }

    fn scalar_row(&self, value: f64) -> Result<Tensor> {
        self.row(&[value])
    }

    fn nan(&self) -> Result<Tensor> {
        Ok(Tensor::new(f32::NAN, &self.device)?)
    }

    /// Gather the stacked encodings for `stack`, or a zero stack when no
    /// offers exist (the "no decision possible" embedding).
    fn gather(&self, encoded: &Option<Tensor>, stack: &[usize]) -> Result<Tensor> {
        let stack_size = self.nets.offer_encoder.stack_size;
        let encoding_size = self.nets.offer_encoder.encoding_size;
        match (encoded, stack.is_empty()) {
            (Some(enc), false) => {
                let idx: Vec<u32> = stack.iter().map(|&i| i as u32).collect();
                let idx = Tensor::from_vec(idx, (stack.len(),), &self.device)?;
                Ok(enc.index_select(&idx, 0)?)
            }
            _ => Ok(Tensor::zeros(
                (stack_size, encoding_size),
                candle_core::DType::F32,
                &self.device,
            )?),
        }
    }

    fn record(&self, table: &Mutex<Table<Tensor>>, agent: AgentId, value: Tensor) {
        let mut table = table.lock().unwrap();
        if table.is_empty() {
            table.push(HashMap::new());
        }
        let row = table.len() - 1;
        table[row].insert(agent, value);
    }

    // === Decision heads ===

    /// Person purchase decisions over a stack of goods offers.
    pub fn person_purchase(
        &self,
        agent: AgentId,
        util_params: &[f64],
        money: f64,
        labor: f64,
        inventory: &[f64],
        stack: &[usize],
    ) -> Result<Vec<OfferOrder>> {
        self.purchase_over(
            agent,
            util_params,
            money,
            labor,
            inventory,
            stack,
            PurchaseHead::Person,
        )
    }

    /// Firm purchase decisions; same head shape, production parameters.
    pub fn firm_purchase(
        &self,
        agent: AgentId,
        prod_params: &[f64],
        money: f64,
        labor: f64,
        inventory: &[f64],
        stack: &[usize],
    ) -> Result<Vec<OfferOrder>> {
        self.purchase_over(
            agent,
            prod_params,
            money,
            labor,
            inventory,
            stack,
            PurchaseHead::Firm,
        )
    }

    fn purchase_over(
        &self,
        agent: AgentId,
        params: &[f64],
        money: f64,
        labor: f64,
        inventory: &[f64],
        stack: &[usize],
        head: PurchaseHead,
    ) -> Result<Vec<OfferOrder>> {
        let table = match head {
            PurchaseHead::Person => &self.purchase_logp,
            PurchaseHead::Firm => &self.firm_purchase_logp,
        };
        if stack.is_empty() {
            // No decision was possible; mark the row so the trainer skips it.
            self.record(table, agent, self.nan()?);
            return Ok(Vec::new());
        }

        let (encodings, keys) = {
            let clock = self.clock.lock().unwrap();
            (
                self.gather(&clock.encoded_offers, stack)?,
                clock.offer_keys.clone(),
            )
        };
        let net = match head {
            PurchaseHead::Person => &self.nets.purchase_net,
            PurchaseHead::Firm => &self.nets.firm_purchase_net,
        };
        let probas = net.forward(
            &encodings,
            &self.row(params)?,
            &self.scalar_row(money)?,
            &self.scalar_row(labor)?,
            &self.row(inventory)?,
        )?;
        let (taken, log_proba) = {
            let mut rng = self.rng.lock().unwrap();
            sample_bernoulli(&probas, &mut rng)?
        };
        self.record(table, agent, log_proba);

        Ok(stack
            .iter()
            .zip(taken)
            .filter(|(_, take)| *take)
            .map(|(&i, _)| OfferOrder {
                offer: keys[i],
                count: 1,
            })
            .collect())
    }

    /// Person labor-search decisions over a stack of job offers.
    pub fn labor_search(
        &self,
        agent: AgentId,
        util_params: &[f64],
        money: f64,
        labor: f64,
        inventory: &[f64],
        stack: &[usize],
    ) -> Result<Vec<JobOrder>> {
        if stack.is_empty() {
            self.record(&self.labor_search_logp, agent, self.nan()?);
            return Ok(Vec::new());
        }

        let (encodings, keys) = {
            let clock = self.clock.lock().unwrap();
            (
                self.gather(&clock.encoded_job_offers, stack)?,
                clock.job_offer_keys.clone(),
            )
        };
        let probas = self.nets.labor_search_net.forward(
            &encodings,
            &self.row(util_params)?,
            &self.scalar_row(money)?,
            &self.scalar_row(labor)?,
            &self.row(inventory)?,
        )?;
        let (taken, log_proba) = {
            let mut rng = self.rng.lock().unwrap();
            sample_bernoulli(&probas, &mut rng)?
        };
        self.record(&self.labor_search_logp, agent, log_proba);

        Ok(stack
            .iter()
            .zip(taken)
            .filter(|(_, take)| *take)
            .map(|(&i, _)| JobOrder {
                offer: keys[i],
                count: 1,
            })
            .collect())
    }

    /// Proportion of each inventory good to consume.
    pub fn consumption_proportions(
        &self,
        agent: AgentId,
        util_params: &[f64],
        money: f64,
        labor: f64,
        inventory: &[f64],
    ) -> Result<Vec<f64>> {
        let params = self.nets.consumption_net.forward(
            &self.row(util_params)?,
            &self.scalar_row(money)?,
            &self.scalar_row(labor)?,
            &self.row(inventory)?,
        )?;
        let (proportions, log_probas) = {
            let mut rng = self.rng.lock().unwrap();
            sample_logit_normal(&params, &mut rng)?
        };
        self.record(&self.consumption_logp, agent, log_probas.sum_all()?);
        Ok(proportions
            .to_vec1::<f32>()?
            .into_iter()
            .map(f64::from)
            .collect())
    }

    /// Proportion of each inventory good to commit as production input.
    pub fn production_proportions(
        &self,
        agent: AgentId,
        prod_params: &[f64],
        money: f64,
        labor: f64,
        inventory: &[f64],
    ) -> Result<Vec<f64>> {
        let params = self.nets.production_net.forward(
            &self.row(prod_params)?,
            &self.scalar_row(money)?,
            &self.scalar_row(labor)?,
            &self.row(inventory)?,
        )?;
        let (proportions, log_probas) = {
            let mut rng = self.rng.lock().unwrap();
            sample_logit_normal(&params, &mut rng)?
        };
        self.record(&self.production_logp, agent, log_probas.sum_all()?);
        Ok(proportions
            .to_vec1::<f32>()?
            .into_iter()
            .map(f64::from)
            .collect())
    }

    /// Amounts of each good to offer (fraction of inventory, logit-normal)
    /// and the per-good prices (log-normal).
    pub fn choose_offers(
        &self,
        agent: AgentId,
        prod_params: &[f64],
        money: f64,
        labor: f64,
        inventory: &[f64],
        stack: &[usize],
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        let encodings = {
            let clock = self.clock.lock().unwrap();
            self.gather(&clock.encoded_offers, stack)?
        };
        let out = self.nets.offer_net.forward(
            &encodings,
            &self.row(prod_params)?,
            &self.scalar_row(money)?,
            &self.scalar_row(labor)?,
            &self.row(inventory)?,
        )?;

        use candle_core::IndexOp;
        let amount_params = out.i((.., 0..2))?;
        let price_params = out.i((.., 2..4))?;
        let (proportions, amount_logp, prices, price_logp) = {
            let mut rng = self.rng.lock().unwrap();
            let (proportions, amount_logp) = sample_logit_normal(&amount_params, &mut rng)?;
            let (prices, price_logp) = sample_log_normal(&price_params, &mut rng)?;
            (proportions, amount_logp, prices, price_logp)
        };

        let log_proba = (amount_logp.sum_all()? + price_logp.sum_all()?)?;
        self.record(&self.offer_logp, agent, log_proba);

        let amounts: Vec<f64> = proportions
            .to_vec1::<f32>()?
            .iter()
            .zip(inventory)
            .map(|(&p, &inv)| f64::from(p) * inv)
            .collect();
        let prices: Vec<f64> = prices.to_vec1::<f32>()?.into_iter().map(f64::from).collect();
        Ok((amounts, prices))
    }

    /// Total labor to hire and the wage to post, both log-normal; the wage
    /// is clipped to keep the tail finite.
    pub fn choose_job_offers(
        &self,
        agent: AgentId,
        prod_params: &[f64],
        money: f64,
        labor: f64,
        inventory: &[f64],
        stack: &[usize],
    ) -> Result<(f64, f64)> {
        let encodings = {
            let clock = self.clock.lock().unwrap();
            self.gather(&clock.encoded_job_offers, stack)?
        };
        let out = self.nets.job_offer_net.forward(
            &encodings,
            &self.row(prod_params)?,
            &self.scalar_row(money)?,
            &self.scalar_row(labor)?,
            &self.row(inventory)?,
        )?;

        let (values, log_probas) = {
            let mut rng = self.rng.lock().unwrap();
            sample_log_normal(&out, &mut rng)?
        };
        self.record(&self.job_offer_logp, agent, log_probas.sum_all()?);

        let values = values.to_vec1::<f32>()?;
        let total_labor = f64::from(values[0]);
        let mut wage = f64::from(values[1]);
        if wage > LARGE_NUMBER {
            tracing::trace!(target: "wage_clip", agent = agent.0, wage, clip = LARGE_NUMBER);
            wage = LARGE_NUMBER;
        }
        Ok((total_labor, wage))
    }

    // === Value and reward bookkeeping ===

    pub fn record_person_value(
        &self,
        agent: AgentId,
        util_params: &[f64],
        money: f64,
        labor: f64,
        inventory: &[f64],
        offer_stack: &[usize],
        job_offer_stack: &[usize],
    ) -> Result<()> {
        let (offers, job_offers) = {
            let clock = self.clock.lock().unwrap();
            (
                self.gather(&clock.encoded_offers, offer_stack)?,
                self.gather(&clock.encoded_job_offers, job_offer_stack)?,
            )
        };
        let value = self.nets.value_net.forward(
            &offers,
            &job_offers,
            &self.row(util_params)?,
            &self.scalar_row(money)?,
            &self.scalar_row(labor)?,
            &self.row(inventory)?,
        )?;
        self.record(&self.values, agent, value);
        Ok(())
    }

    pub fn record_firm_value(
        &self,
        agent: AgentId,
        prod_params: &[f64],
        money: f64,
        labor: f64,
        inventory: &[f64],
        offer_stack: &[usize],
        job_offer_stack: &[usize],
    ) -> Result<()> {
        let (offers, job_offers) = {
            let clock = self.clock.lock().unwrap();
            (
                self.gather(&clock.encoded_offers, offer_stack)?,
                self.gather(&clock.encoded_job_offers, job_offer_stack)?,
            )
        };
        let value = self.nets.firm_value_net.forward(
            &offers,
            &job_offers,
            &self.row(prod_params)?,
            &self.scalar_row(money)?,
            &self.scalar_row(labor)?,
            &self.row(inventory)?,
        )?;
        self.record(&self.values, agent, value);
        Ok(())
    }

    /// Record a reward `offset` steps behind the current row. Firms use
    /// offset 1: the payoff of a sell/produce decision is only observed
    /// after the buyer side finalizes on the following step.
    pub fn record_reward(&self, agent: AgentId, reward: f64, offset: u64) {
        let mut rewards = self.rewards.lock().unwrap();
        let rows = rewards.len() as u64;
        if rows <= offset {
            return;
        }
        let row = (rows - 1 - offset) as usize;
        rewards[row].insert(agent, reward);
    }

    // === Episode plumbing ===

    /// Clone every table for the trainer's end-of-episode pass.
    pub fn episode_tables(&self) -> EpisodeTables {
        EpisodeTables {
            time: self.time(),
            purchase: self.purchase_logp.lock().unwrap().clone(),
            firm_purchase: self.firm_purchase_logp.lock().unwrap().clone(),
            labor_search: self.labor_search_logp.lock().unwrap().clone(),
            consumption: self.consumption_logp.lock().unwrap().clone(),
            production: self.production_logp.lock().unwrap().clone(),
            offer: self.offer_logp.lock().unwrap().clone(),
            job_offer: self.job_offer_logp.lock().unwrap().clone(),
            values: self.values.lock().unwrap().clone(),
            rewards: self.rewards.lock().unwrap().clone(),
        }
    }

    pub fn save_models(&self, dir: &Path) -> Result<()> {
        self.nets.save(dir)
    }

    pub fn load_models(&self, dir: &Path) -> Result<()> {
        self.nets.load(dir)
    }

    /// Blend exploration noise into every net's weights.
    pub fn perturb_models(&self, pct: f64) -> Result<()> {
        self.nets.perturb_weights(pct)
    }
}

enum PurchaseHead {
    Person,
    Firm,
}
