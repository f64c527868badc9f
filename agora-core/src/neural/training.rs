//! Advantage actor-critic training over recorded episodes.
//!
//! At the end of each episode the trainer walks every agent's reward/value
//! history in reverse time, forms discounted returns and advantages, sums
//! critic and policy losses across all agents and heads, backpropagates
//! once, and steps nine per-head optimizers. Each optimizer's var-set
//! includes the shared encoders its head consumes, so the encoders move
//! with every head that reads them.

use std::collections::HashMap;
use std::sync::Arc;

use candle_core::Tensor;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use rayon::prelude::*;

use crate::constants::{
    DEFAULT_EPISODE_BATCH_SIZE_FOR_LR_DECAY, DEFAULT_LEARNING_RATE,
    DEFAULT_MULTIPLIER_FOR_LR_DECAY, DEFAULT_PATIENCE_FOR_LR_DECAY,
    DEFAULT_REVERSE_ANNEALING_PERIOD,
};
use crate::economy::Economy;
use crate::error::Result;
use crate::types::AgentId;

use super::handler::{EpisodeTables, NetHandler};

// ============================================================================
// Learning-rate scheduling
// ============================================================================

/// Plateau decay with periodic reverse annealing.
///
/// Losses accumulate in batches of `episode_batch_size` episodes. A batch
/// that fails to improve on the best batch seen counts as bad; `patience`
/// bad batches multiply the LR by `decay_multiplier`. Independently, a
/// counter ticking once per episode re-inflates the LR by
/// `1 / decay_multiplier` every `cosine_period * episode_batch_size *
/// patience` episodes to escape plateaus.
#[derive(Debug, Clone)]
pub struct LrScheduler {
    episode_batch_size: u32,
    patience: u32,
    decay_multiplier: f64,
    cosine_period: u32,
    loss_history: Vec<f64>,
    best_batch_loss: f64,
    bad_batches: u32,
    cosine_timer: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct LrDecayConfig {
    pub episode_batch_size: u32,
    pub patience: u32,
    pub decay_multiplier: f64,
    pub reverse_annealing_period: u32,
}

impl Default for LrDecayConfig {
    fn default() -> Self {
        LrDecayConfig {
            episode_batch_size: DEFAULT_EPISODE_BATCH_SIZE_FOR_LR_DECAY,
            patience: DEFAULT_PATIENCE_FOR_LR_DECAY,
            decay_multiplier: DEFAULT_MULTIPLIER_FOR_LR_DECAY,
            reverse_annealing_period: DEFAULT_REVERSE_ANNEALING_PERIOD,
        }
    }
}

impl LrScheduler {
    pub fn new(cfg: LrDecayConfig) -> Self {
        LrScheduler {
            episode_batch_size: cfg.episode_batch_size,
            patience: cfg.patience,
            decay_multiplier: cfg.decay_multiplier,
            cosine_period: cfg.reverse_annealing_period,
            loss_history: Vec::new(),
            best_batch_loss: f64::INFINITY,
            bad_batches: 0,
            cosine_timer: 0,
        }
    }

    /// Feed one episode's loss; returns the multiplier to apply to the LR
    /// (1.0 when nothing fires).
    pub fn update(&mut self, episode_loss: f64) -> f64 {
        let mut multiplier = 1.0;
        self.loss_history.push(episode_loss);

        if self.loss_history.len() as u32 == self.episode_batch_size {
            let batch_loss: f64 = self.loss_history.iter().sum();
            if batch_loss < self.best_batch_loss {
                self.best_batch_loss = batch_loss;
                self.bad_batches = 0;
            } else {
                self.bad_batches += 1;
            }
            if self.bad_batches >= self.patience {
                multiplier *= self.decay_multiplier;
                self.bad_batches = 0;
            }
            self.loss_history.clear();
        }

        self.cosine_timer += 1;
        if self.cosine_timer == self.cosine_period * self.episode_batch_size * self.patience {
            multiplier /= self.decay_multiplier;
            self.cosine_timer = 0;
        }
        multiplier
    }
}

// ============================================================================
// Trainer
// ============================================================================

/// Per-head learning rates for the nine optimizers.
#[derive(Debug, Clone, Copy)]
pub struct HeadLearningRates {
    pub purchase: f64,
    pub firm_purchase: f64,
    pub labor_search: f64,
    pub consumption: f64,
    pub production: f64,
    pub offer: f64,
    pub job_offer: f64,
    pub value: f64,
    pub firm_value: f64,
}

impl Default for HeadLearningRates {
    fn default() -> Self {
        HeadLearningRates {
            purchase: DEFAULT_LEARNING_RATE,
            firm_purchase: DEFAULT_LEARNING_RATE,
            labor_search: DEFAULT_LEARNING_RATE,
            consumption: DEFAULT_LEARNING_RATE,
            production: DEFAULT_LEARNING_RATE,
            offer: DEFAULT_LEARNING_RATE,
            job_offer: DEFAULT_LEARNING_RATE,
            value: DEFAULT_LEARNING_RATE,
            firm_value: DEFAULT_LEARNING_RATE,
        }
    }
}

impl HeadLearningRates {
    pub fn uniform(lr: f64) -> Self {
        HeadLearningRates {
            purchase: lr,
            firm_purchase: lr,
            labor_search: lr,
            consumption: lr,
            production: lr,
            offer: lr,
            job_offer: lr,
            value: lr,
            firm_value: lr,
        }
    }
}

/// Scalar per-head losses accumulated over one episode; these drive the LR
/// schedulers.
#[derive(Debug, Clone, Copy, Default)]
struct HeadLosses {
    purchase: f64,
    firm_purchase: f64,
    labor_search: f64,
    consumption: f64,
    production: f64,
    offer: f64,
    job_offer: f64,
    value: f64,
    firm_value: f64,
}

impl HeadLosses {
    fn add(&mut self, other: &HeadLosses) {
        self.purchase += other.purchase;
        self.firm_purchase += other.firm_purchase;
        self.labor_search += other.labor_search;
        self.consumption += other.consumption;
        self.production += other.production;
        self.offer += other.offer;
        self.job_offer += other.job_offer;
        self.value += other.value;
        self.firm_value += other.firm_value;
    }
}

struct Head {
    name: &'static str,
    optimizer: AdamW,
    scheduler: LrScheduler,
}

impl Head {
    fn new(
        name: &'static str,
        vars: Vec<candle_core::Var>,
        lr: f64,
        decay: LrDecayConfig,
    ) -> Result<Self> {
        let optimizer = AdamW::new(
            vars,
            ParamsAdamW {
                lr,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;
        Ok(Head {
            name,
            optimizer,
            scheduler: LrScheduler::new(decay),
        })
    }

    fn step(&mut self, grads: &candle_core::backprop::GradStore) -> Result<()> {
        self.optimizer.step(grads)?;
        Ok(())
    }

    fn update_lr(&mut self, episode_loss: f64) {
        let multiplier = self.scheduler.update(episode_loss);
        if multiplier != 1.0 {
            let lr = self.optimizer.learning_rate() * multiplier;
            tracing::info!(target: "training", head = self.name, lr, "learning rate adjusted");
            self.optimizer.set_learning_rate(lr);
        }
    }
}

pub struct A2cTrainer {
    handler: Arc<NetHandler>,
    purchase: Head,
    firm_purchase: Head,
    labor_search: Head,
    consumption: Head,
    production: Head,
    offer: Head,
    job_offer: Head,
    value: Head,
    firm_value: Head,
    pub multithreaded: bool,
    pub num_threads: usize,
}

impl A2cTrainer {
    pub fn new(
        handler: Arc<NetHandler>,
        rates: HeadLearningRates,
        decay: LrDecayConfig,
    ) -> Result<Self> {
        let nets = &handler.nets;
        let purchase = Head::new("purchase_net", nets.purchase_vars(), rates.purchase, decay)?;
        let firm_purchase = Head::new(
            "firm_purchase_net",
            nets.firm_purchase_vars(),
            rates.firm_purchase,
            decay,
        )?;
        let labor_search = Head::new(
            "labor_search_net",
            nets.labor_search_vars(),
            rates.labor_search,
            decay,
        )?;
        let consumption = Head::new(
            "consumption_net",
            nets.consumption_vars(),
            rates.consumption,
            decay,
        )?;
        let production = Head::new(
            "production_net",
            nets.production_vars(),
            rates.production,
            decay,
        )?;
        let offer = Head::new("offer_net", nets.offer_vars(), rates.offer, decay)?;
        let job_offer = Head::new("job_offer_net", nets.job_offer_vars(), rates.job_offer, decay)?;
        let value = Head::new("value_net", nets.value_vars(), rates.value, decay)?;
        let firm_value = Head::new(
            "firm_value_net",
            nets.firm_value_vars(),
            rates.firm_value,
            decay,
        )?;
        Ok(A2cTrainer {
            handler,
            purchase,
            firm_purchase,
            labor_search,
            consumption,
            production,
            offer,
            job_offer,
            value,
            firm_value,
            multithreaded: false,
            num_threads: 1,
        })
    }

    /// Consume the episode recorded on the handler and apply one gradient
    /// update. Returns the total loss (possibly NaN; the caller decides how
    /// to recover).
    pub fn train_on_episode(&mut self, economy: &Economy) -> Result<f64> {
        let tables = self.handler.episode_tables();

        let persons: Vec<(AgentId, f64)> = economy
            .persons
            .iter()
            .map(|p| (p.id(), p.discount_rate))
            .collect();
        let firms: Vec<AgentId> = economy.firms.iter().map(|f| f.id()).collect();

        let person_losses = if self.multithreaded && persons.len() > 1 {
            let chunk = persons.len().div_ceil(self.num_threads.max(1));
            persons
                .par_chunks(chunk)
                .map(|chunk| {
                    chunk
                        .iter()
                        .map(|&(id, discount)| person_episode_loss(&tables, id, discount))
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
        } else {
            persons
                .iter()
                .map(|&(id, discount)| person_episode_loss(&tables, id, discount))
                .collect::<Result<Vec<_>>>()?
        };

        let firm_losses = if self.multithreaded && firms.len() > 1 {
            let chunk = firms.len().div_ceil(self.num_threads.max(1));
            firms
                .par_chunks(chunk)
                .map(|chunk| {
                    chunk
                        .iter()
                        .map(|&id| firm_episode_loss(&tables, id))
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
        } else {
            firms
                .iter()
                .map(|&id| firm_episode_loss(&tables, id))
                .collect::<Result<Vec<_>>>()?
        };

        let mut head_losses = HeadLosses::default();
        let mut total: Option<Tensor> = None;
        for (loss, partial) in person_losses.into_iter().chain(firm_losses) {
            head_losses.add(&partial);
            total = Some(match total {
                Some(acc) => (acc + loss)?,
                None => loss,
            });
        }

        let Some(total) = total else {
            return Ok(0.0);
        };
        let loss_value = f64::from(total.to_scalar::<f32>()?);

        let grads = total.backward()?;
        for head in self.heads_mut() {
            head.step(&grads)?;
        }

        // Schedulers see this episode's per-head losses.
        self.purchase.update_lr(head_losses.purchase);
        self.firm_purchase.update_lr(head_losses.firm_purchase);
        self.labor_search.update_lr(head_losses.labor_search);
        self.consumption.update_lr(head_losses.consumption);
        self.production.update_lr(head_losses.production);
        self.offer.update_lr(head_losses.offer);
        self.job_offer.update_lr(head_losses.job_offer);
        self.value.update_lr(head_losses.value);
        self.firm_value.update_lr(head_losses.firm_value);

        Ok(loss_value)
    }

    fn heads_mut(&mut self) -> [&mut Head; 9] {
        [
            &mut self.purchase,
            &mut self.firm_purchase,
            &mut self.labor_search,
            &mut self.consumption,
            &mut self.production,
            &mut self.offer,
            &mut self.job_offer,
            &mut self.value,
            &mut self.firm_value,
        ]
    }
}

// ============================================================================
// Per-agent episode losses
// ============================================================================

/// Discounted returns over an episode: `q_t = r_t + gamma * q_{t+1}` with
/// `q_{T-1} = r_{T-1}`.
pub fn discounted_returns(rewards: &[f64], discount: f64) -> Vec<f64> {
    let mut returns = vec![0.0; rewards.len()];
    let mut q = 0.0;
    for t in (0..rewards.len()).rev() {
        q = rewards[t] + discount * q;
        returns[t] = q;
    }
    returns
}

/// Critic loss plus per-head policy losses for one person.
fn person_episode_loss(
    tables: &EpisodeTables,
    agent: AgentId,
    discount: f64,
) -> Result<(Tensor, HeadLosses)> {
    let steps = tables.values.len();
    let (critic, advantage) =
        advantage_series(&tables.rewards, &tables.values, agent, steps, discount)?;

    let mut losses = HeadLosses::default();
    let mut loss = critic.clone();
    losses.value = f64::from(critic.to_scalar::<f32>()?);

    for (table, slot) in [
        (&tables.purchase, 0usize),
        (&tables.labor_search, 1),
        (&tables.consumption, 2),
    ] {
        let term = policy_loss(table, agent, &advantage)?;
        let value = f64::from(term.to_scalar::<f32>()?);
        match slot {
            0 => losses.purchase = value,
            1 => losses.labor_search = value,
            _ => losses.consumption = value,
        }
        loss = (loss + term)?;
    }
    Ok((loss, losses))
}

/// Critic loss plus per-head policy losses for one firm.
///
/// Firms are not discounted, and the final step is discarded: the payoff of
/// its decisions is only observed on the step after the episode ends.
fn firm_episode_loss(tables: &EpisodeTables, agent: AgentId) -> Result<(Tensor, HeadLosses)> {
    let steps = tables.values.len().saturating_sub(1);
    let (critic, advantage) = advantage_series(&tables.rewards, &tables.values, agent, steps, 1.0)?;

    let mut losses = HeadLosses::default();
    let mut loss = critic.clone();
    losses.firm_value = f64::from(critic.to_scalar::<f32>()?);

    for (table, slot) in [
        (&tables.firm_purchase, 0usize),
        (&tables.production, 1),
        (&tables.offer, 2),
        (&tables.job_offer, 3),
    ] {
        let term = policy_loss(table, agent, &advantage)?;
        let value = f64::from(term.to_scalar::<f32>()?);
        match slot {
            0 => losses.firm_purchase = value,
            1 => losses.production = value,
            2 => losses.offer = value,
            _ => losses.job_offer = value,
        }
        loss = (loss + term)?;
    }
    Ok((loss, losses))
}

/// Walk the reward/value history in reverse time. Returns the critic loss
/// `sum_t (q_t - v_t)^2` (graph kept through the value net) and the
/// detached advantages `q_t - v_t`.
fn advantage_series(
    rewards: &[HashMap<AgentId, f64>],
    values: &[HashMap<AgentId, Tensor>],
    agent: AgentId,
    steps: usize,
    discount: f64,
) -> Result<(Tensor, Vec<Option<f64>>)> {
    let mut advantage = vec![None; steps];
    let mut critic: Option<Tensor> = None;
    let mut q = 0.0;

    for t in (0..steps).rev() {
        let (Some(&reward), Some(value)) = (
            rewards.get(t).and_then(|row| row.get(&agent)),
            values.get(t).and_then(|row| row.get(&agent)),
        ) else {
            tracing::warn!(
                target: "training",
                agent = agent.0,
                t,
                "missing reward or value record",
            );
            continue;
        };
        q = reward + discount * q;
        let value_scalar = f64::from(value.to_scalar::<f32>()?);
        advantage[t] = Some(q - value_scalar);

        // (q - v)^2 with the graph flowing through v only.
        let residual = value.affine(-1.0, q)?;
        let term = residual.sqr()?;
        critic = Some(match critic {
            Some(acc) => (acc + term)?,
            None => term,
        });
    }

    let critic = match critic {
        Some(c) => c,
        None => Tensor::new(0f32, values_device(values)?)?,
    };
    Ok((critic, advantage))
}

/// `sum_t logp_t * detach(advantage_t)`, skipping NaN log-probabilities
/// (steps where no decision was possible) and steps with no advantage.
fn policy_loss(
    table: &[HashMap<AgentId, Tensor>],
    agent: AgentId,
    advantage: &[Option<f64>],
) -> Result<Tensor> {
    let mut loss: Option<Tensor> = None;
    for (t, adv) in advantage.iter().enumerate() {
        let Some(adv) = adv else { continue };
        let Some(log_proba) = table.get(t).and_then(|row| row.get(&agent)) else {
            continue;
        };
        if f64::from(log_proba.to_scalar::<f32>()?).is_nan() {
            continue;
        }
        let term = log_proba.affine(*adv, 0.0)?;
        loss = Some(match loss {
            Some(acc) => (acc + term)?,
            None => term,
        });
    }
    match loss {
        Some(l) => Ok(l),
        None => Ok(Tensor::new(0f32, &candle_core::Device::Cpu)?),
    }
}

fn values_device(values: &[HashMap<AgentId, Tensor>]) -> Result<&candle_core::Device> {
    Ok(values
        .iter()
        .flat_map(|row| row.values())
        .next()
        .map(|t| t.device())
        .unwrap_or(&candle_core::Device::Cpu))
}
