//! Scenario seeding and the episode training loop.
//!
//! A scenario draws each agent's initial endowment and preference/technology
//! parameters from per-field normal distributions, clamps them into their
//! valid ranges, and registers the population with neural decision makers
//! wired to one shared handler. The training loop rebuilds the economy for
//! every episode, steps it, and hands the recorded episode to the trainer.

use std::path::PathBuf;
use std::sync::Arc;

use candle_core::Device;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CHECKPOINT_EVERY_N_EPISODES, DEFAULT_EPISODE_LENGTH, DEFAULT_NUM_EPISODES,
    DEFAULT_SAVE_DIR, DEFAULT_UPDATE_EVERY_N_EPISODES, EPS,
};
use crate::economy::{Economy, FirmSeed, PersonSeed};
use crate::error::{Result, SimError};
use crate::functions::{ces_vec_to_vec, VecToScalar};
use crate::neural::nets::NetConfig;
use crate::neural::{
    A2cTrainer, HeadLearningRates, LrDecayConfig, NetHandler, NeuralFirmDecisionMaker,
    NeuralPersonDecisionMaker,
};
use crate::types::AgentId;

// ============================================================================
// Parameter distributions
// ============================================================================

/// A normally-distributed scenario field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MuSigma {
    pub mu: f64,
    pub sigma: f64,
}

impl MuSigma {
    pub fn new(mu: f64, sigma: f64) -> Self {
        MuSigma { mu, sigma }
    }

    fn sample(&self, rng: &mut StdRng) -> f64 {
        // A non-positive sigma degenerates to the mean.
        match Normal::new(self.mu, self.sigma.max(0.0)) {
            Ok(normal) => normal.sample(rng),
            Err(_) => self.mu,
        }
    }

    fn sample_nonnegative(&self, rng: &mut StdRng) -> f64 {
        self.sample(rng).max(0.0)
    }

    fn sample_positive(&self, rng: &mut StdRng) -> f64 {
        let x = self.sample(rng);
        if x <= 0.0 {
            EPS
        } else {
            x
        }
    }

    /// Sigmoid of a normal draw: a logit-normal value in (0, 1).
    fn sample_logit(&self, rng: &mut StdRng) -> f64 {
        1.0 / (1.0 + (-self.sample(rng)).exp())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonParams {
    /// Initial inventory of each good.
    pub good_quantities: Vec<MuSigma>,
    pub money: MuSigma,
    /// CES share on leisure.
    pub labor_share: MuSigma,
    /// CES share per good.
    pub good_shares: Vec<MuSigma>,
    pub elasticity: MuSigma,
    /// Logit of the per-period discount rate.
    pub discount_logit: MuSigma,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmParams {
    pub good_quantities: Vec<MuSigma>,
    pub money: MuSigma,
    /// Total factor productivity per output good.
    pub tfp: MuSigma,
    /// CES share on labor, per output good.
    pub labor_share: MuSigma,
    /// CES share per input good, per output good.
    pub good_shares: Vec<MuSigma>,
    pub elasticity: MuSigma,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioParams {
    pub goods: Vec<String>,
    pub num_persons: u32,
    pub num_firms: u32,
    pub person: PersonParams,
    pub firm: FirmParams,
}

impl ScenarioParams {
    /// The standard two-good scenario.
    pub fn two_good(num_persons: u32, num_firms: u32) -> Self {
        ScenarioParams {
            goods: vec!["bread".to_string(), "capital".to_string()],
            num_persons,
            num_firms,
            person: PersonParams {
                good_quantities: vec![MuSigma::new(10.0, 2.0), MuSigma::new(10.0, 2.0)],
                money: MuSigma::new(20.0, 5.0),
                labor_share: MuSigma::new(0.5, 0.1),
                good_shares: vec![MuSigma::new(0.5, 0.1), MuSigma::new(0.5, 0.1)],
                elasticity: MuSigma::new(1.3, 0.2),
                discount_logit: MuSigma::new(1.5, 0.5),
            },
            firm: FirmParams {
                good_quantities: vec![MuSigma::new(10.0, 2.0), MuSigma::new(20.0, 5.0)],
                money: MuSigma::new(50.0, 10.0),
                tfp: MuSigma::new(0.75, 0.25),
                labor_share: MuSigma::new(1.0, 0.1),
                good_shares: vec![MuSigma::new(0.5, 0.3), MuSigma::new(0.5, 0.3)],
                elasticity: MuSigma::new(4.0, 1.0),
            },
        }
    }

    fn validate(&self) -> Result<()> {
        let n = self.goods.len();
        if self.person.good_quantities.len() != n {
            return Err(SimError::ScenarioParamLength("person.good_quantities"));
        }
        if self.person.good_shares.len() != n {
            return Err(SimError::ScenarioParamLength("person.good_shares"));
        }
        if self.firm.good_quantities.len() != n {
            return Err(SimError::ScenarioParamLength("firm.good_quantities"));
        }
        if self.firm.good_shares.len() != n {
            return Err(SimError::ScenarioParamLength("firm.good_shares"));
        }
        if self.num_firms > 0 && self.num_persons == 0 {
            // Firms are person-owned; someone must be there to own them.
            return Err(SimError::NoOwners);
        }
        Ok(())
    }

    /// Build a fresh economy for one episode, with every agent driven by
    /// the shared handler.
    pub fn build(&self, handler: &Arc<NetHandler>, rng: &mut StdRng) -> Result<Economy> {
        self.validate()?;
        let num_goods = self.goods.len();
        let mut economy = Economy::new(self.goods.clone(), rng.random());

        let mut person_ids: Vec<AgentId> = Vec::with_capacity(self.num_persons as usize);
        for _ in 0..self.num_persons {
            let p = &self.person;
            let inventory: Vec<f64> = p
                .good_quantities
                .iter()
                .map(|q| q.sample_nonnegative(rng))
                .collect();
            let mut shares = Vec::with_capacity(num_goods + 1);
            shares.push(p.labor_share.sample(rng));
            shares.extend(p.good_shares.iter().map(|s| s.sample(rng)));

            let id = economy.add_person(PersonSeed {
                inventory,
                money: p.money.sample_nonnegative(rng),
                utility: VecToScalar::ces(1.0, shares, p.elasticity.sample_positive(rng)),
                discount_rate: p.discount_logit.sample_logit(rng),
                decision_maker: Box::new(NeuralPersonDecisionMaker::new(Arc::clone(handler))),
            })?;
            person_ids.push(id);
        }

        for i in 0..self.num_firms {
            let f = &self.firm;
            let inventory: Vec<f64> = f
                .good_quantities
                .iter()
                .map(|q| q.sample_nonnegative(rng))
                .collect();
            let mut tfps = Vec::with_capacity(num_goods);
            let mut shares = Vec::with_capacity(num_goods);
            let mut elasticities = Vec::with_capacity(num_goods);
            for _ in 0..num_goods {
                tfps.push(f.tfp.sample_nonnegative(rng));
                let mut row = Vec::with_capacity(num_goods + 1);
                row.push(f.labor_share.sample(rng));
                row.extend(f.good_shares.iter().map(|s| s.sample(rng)));
                shares.push(row);
                elasticities.push(f.elasticity.sample_positive(rng));
            }

            // Each firm starts owned by one person, assigned round-robin.
            let owner = person_ids[i as usize % person_ids.len()];
            economy.add_firm(FirmSeed {
                owners: vec![owner],
                inventory,
                money: f.money.sample_nonnegative(rng),
                production: ces_vec_to_vec(tfps, shares, elasticities)?,
                decision_maker: Box::new(NeuralFirmDecisionMaker::new(Arc::clone(handler))),
            })?;
        }
        Ok(economy)
    }
}

// ============================================================================
// Training configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct TrainingParams {
    pub num_episodes: u32,
    pub episode_length: u32,
    pub update_every_n_episodes: u32,
    pub checkpoint_every_n_episodes: u32,
    pub net: NetConfig,
    pub learning_rates: HeadLearningRates,
    pub lr_decay: LrDecayConfig,
    pub save_dir: PathBuf,
    pub multithreaded: bool,
    pub num_threads: usize,
    pub seed: u64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        TrainingParams {
            num_episodes: DEFAULT_NUM_EPISODES,
            episode_length: DEFAULT_EPISODE_LENGTH,
            update_every_n_episodes: DEFAULT_UPDATE_EVERY_N_EPISODES,
            checkpoint_every_n_episodes: DEFAULT_CHECKPOINT_EVERY_N_EPISODES,
            net: NetConfig::default(),
            learning_rates: HeadLearningRates::default(),
            lr_decay: LrDecayConfig::default(),
            save_dir: PathBuf::from(DEFAULT_SAVE_DIR),
            multithreaded: false,
            num_threads: std::thread::available_parallelism().map_or(1, |n| n.get()),
            seed: 0,
        }
    }
}

// ============================================================================
// The training loop
// ============================================================================

/// Run the full training loop. Returns the per-episode losses.
///
/// A NaN episode loss reverts the nets to the last checkpoint and reuses
/// the previous episode's loss; a NaN before the first checkpoint aborts.
pub fn train(scenario: &ScenarioParams, training: &TrainingParams) -> Result<Vec<f64>> {
    let handler = Arc::new(NetHandler::new(
        scenario.goods.len(),
        &training.net,
        Device::Cpu,
        training.seed,
    )?);
    train_with_handler(scenario, training, handler)
}

/// As `train`, but on an existing handler (e.g. one with loaded weights).
pub fn train_with_handler(
    scenario: &ScenarioParams,
    training: &TrainingParams,
    handler: Arc<NetHandler>,
) -> Result<Vec<f64>> {
    let mut trainer = A2cTrainer::new(
        Arc::clone(&handler),
        training.learning_rates,
        training.lr_decay,
    )?;
    trainer.multithreaded = training.multithreaded;
    trainer.num_threads = training.num_threads;

    let mut rng = StdRng::seed_from_u64(training.seed);
    let mut losses: Vec<f64> = Vec::with_capacity(training.num_episodes as usize);
    let mut has_checkpoint = false;

    for episode in 0..training.num_episodes {
        handler.reset();
        let mut economy = scenario.build(&handler, &mut rng)?;
        for _ in 0..training.episode_length {
            economy.time_step();
        }

        let mut loss = trainer.train_on_episode(&economy)?;
        if loss.is_nan() {
            if !has_checkpoint {
                tracing::error!(target: "training", episode, "diverged before first checkpoint");
                return Err(SimError::EarlyDivergence);
            }
            tracing::warn!(
                target: "training",
                episode,
                "NaN loss; reverting to last checkpoint",
            );
            handler.load_models(&training.save_dir)?;
            loss = losses.last().copied().unwrap_or(0.0);
        } else if training.checkpoint_every_n_episodes > 0
            && ((episode + 1) % training.checkpoint_every_n_episodes == 0
                || episode + 1 == training.num_episodes)
        {
            handler.save_models(&training.save_dir)?;
            has_checkpoint = true;
        }
        losses.push(loss);

        if training.update_every_n_episodes > 0
            && (episode + 1) % training.update_every_n_episodes == 0
        {
            let window = training.update_every_n_episodes as usize;
            let avg: f64 = losses[losses.len() - window..].iter().sum::<f64>() / window as f64;
            tracing::info!(
                target: "training",
                episode = episode + 1,
                avg_loss = avg,
                window,
            );
        }
    }
    Ok(losses)
}

/// As `train`, but starting from the checkpoints in `save_dir`.
pub fn train_from_pretrained(
    scenario: &ScenarioParams,
    training: &TrainingParams,
) -> Result<Vec<f64>> {
    let handler = Arc::new(NetHandler::new(
        scenario.goods.len(),
        &training.net,
        Device::Cpu,
        training.seed,
    )?);
    handler.load_models(&training.save_dir)?;
    train_with_handler(scenario, training, handler)
}

/// Run one episode with trained policies and no gradient update, returning
/// a market snapshot per step.
pub fn run(
    scenario: &ScenarioParams,
    training: &TrainingParams,
) -> Result<Vec<crate::economy::MarketReport>> {
    let handler = Arc::new(NetHandler::new(
        scenario.goods.len(),
        &training.net,
        Device::Cpu,
        training.seed,
    )?);
    handler.load_models(&training.save_dir)?;

    let mut rng = StdRng::seed_from_u64(training.seed);
    let mut economy = scenario.build(&handler, &mut rng)?;
    let mut reports = Vec::with_capacity(training.episode_length as usize);
    for _ in 0..training.episode_length {
        economy.time_step();
        reports.push(economy.market_report());
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discount_rates_land_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(1);
        let field = MuSigma::new(0.0, 3.0);
        for _ in 0..100 {
            let d = field.sample_logit(&mut rng);
            assert!(d > 0.0 && d < 1.0);
        }
    }

    #[test]
    fn clamps_respect_bounds() {
        let mut rng = StdRng::seed_from_u64(2);
        let field = MuSigma::new(-5.0, 0.5);
        for _ in 0..50 {
            assert!(field.sample_nonnegative(&mut rng) >= 0.0);
            assert!(field.sample_positive(&mut rng) > 0.0);
        }
    }

    #[test]
    fn scenario_validation_catches_length_mismatch() {
        let mut scenario = ScenarioParams::two_good(2, 1);
        scenario.person.good_shares.pop();
        assert!(matches!(
            scenario.validate(),
            Err(SimError::ScenarioParamLength(_))
        ));
    }

    #[test]
    fn scenario_params_round_trip_as_json() {
        let scenario = ScenarioParams::two_good(4, 2);
        let json = serde_json::to_string(&scenario).unwrap();
        let back: ScenarioParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back.goods, scenario.goods);
        assert_eq!(back.num_persons, 4);
    }
}
