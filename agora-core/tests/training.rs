//! End-to-end properties of the neural path: handler bookkeeping, gradient
//! flow through the shared encoders, the A2C identities, and the training
//! loop with checkpointing.

use std::sync::Arc;

use candle_core::{Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};

use agora_core::neural::training::discounted_returns;
use agora_core::{
    ces_vec_to_vec, A2cTrainer, Economy, FirmSeed, HeadLearningRates, LrDecayConfig, MuSigma,
    NetConfig, NetHandler, NeuralFirmDecisionMaker, NeuralPersonDecisionMaker, PersonSeed,
    ScenarioParams, TrainingParams, VecToScalar,
};

fn small_net_config() -> NetConfig {
    NetConfig {
        stack_size: 4,
        encoding_size: 6,
        hidden_size: 16,
        n_hidden: 2,
        n_hidden_small: 1,
    }
}

/// A two-good economy with all-neural agents on a shared handler.
fn neural_economy(handler: &Arc<NetHandler>, num_persons: usize) -> Economy {
    let mut economy = Economy::new(vec!["bread".into(), "capital".into()], 5);
    let mut owner = None;
    for _ in 0..num_persons {
        let id = economy
            .add_person(PersonSeed {
                inventory: vec![10.0, 10.0],
                money: 20.0,
                utility: VecToScalar::ces(1.0, vec![0.5, 0.5, 0.5], 1.3),
                discount_rate: 0.8,
                decision_maker: Box::new(NeuralPersonDecisionMaker::new(Arc::clone(handler))),
            })
            .unwrap();
        owner.get_or_insert(id);
    }
    economy
        .add_firm(FirmSeed {
            owners: vec![owner.unwrap()],
            inventory: vec![10.0, 20.0],
            money: 50.0,
            production: ces_vec_to_vec(
                vec![0.5, 1.0],
                vec![vec![1.0, 0.0, 1.0], vec![1.0, 0.0, 1.0]],
                vec![3.0, 5.0],
            )
            .unwrap(),
            decision_maker: Box::new(NeuralFirmDecisionMaker::new(Arc::clone(handler))),
        })
        .unwrap();
    economy
}

// ============================================================================
// A2C identities
// ============================================================================

#[test]
fn discounted_returns_match_the_recursion() {
    // q_t = r_t + gamma * q_{t+1}, q_{T-1} = r_{T-1}.
    let q = discounted_returns(&[1.0, 2.0, 3.0], 0.5);
    assert_eq!(q, vec![2.75, 3.5, 3.0]);

    // Against zero values the advantage equals q, and the critic loss is
    // the sum of squared advantages.
    let critic: f64 = q.iter().map(|a| a * a).sum();
    approx::assert_relative_eq!(critic, 2.75 * 2.75 + 3.5 * 3.5 + 3.0 * 3.0);
}

// ============================================================================
// Gradient flow through the shared encoder
// ============================================================================

#[test]
fn policy_head_gradients_reach_the_shared_encoder() {
    let cfg = small_net_config();
    let handler = NetHandler::new(2, &cfg, Device::Cpu, 9).unwrap();
    let nets = &handler.nets;

    // Encode a market of three offers, run the purchase head on a stack,
    // and backprop a loss built only from the head's output.
    let features = Tensor::from_vec(
        vec![1.0f32, 0.0, 1.0, 0.0, 2.0, 1.5, 3.0, 0.0, 0.7],
        (3, 3),
        &Device::Cpu,
    )
    .unwrap();
    let encoded = nets.offer_encoder.forward(&features).unwrap();
    let stack = encoded
        .index_select(
            &Tensor::from_vec(vec![0u32, 1, 2, 0], (4,), &Device::Cpu).unwrap(),
            0,
        )
        .unwrap();

    let row = |v: Vec<f32>| {
        let n = v.len();
        Tensor::from_vec(v, (1, n), &Device::Cpu).unwrap()
    };
    let probas = nets
        .purchase_net
        .forward(
            &stack,
            &row(vec![0.5; 5]),
            &row(vec![20.0]),
            &row(vec![0.0]),
            &row(vec![10.0, 10.0]),
        )
        .unwrap();
    let loss = probas.sum_all().unwrap();
    let grads = loss.backward().unwrap();

    let encoder_vars = nets.offer_encoder.vars();
    assert!(
        encoder_vars.iter().any(|v| grads.get(v).is_some()),
        "backprop through the purchase head must reach the encoder"
    );

    // A step on the purchase head's optimizer (whose var-set includes the
    // encoder) must move the encoder weights.
    let before: Vec<Vec<f32>> = encoder_vars
        .iter()
        .map(|v| v.flatten_all().unwrap().to_vec1::<f32>().unwrap())
        .collect();
    let mut optimizer = AdamW::new(
        nets.purchase_vars(),
        ParamsAdamW {
            lr: 0.1,
            weight_decay: 0.0,
            ..Default::default()
        },
    )
    .unwrap();
    optimizer.step(&grads).unwrap();

    let moved = encoder_vars.iter().enumerate().any(|(i, v)| {
        let after = v.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        after
            .iter()
            .zip(&before[i])
            .any(|(a, b)| (a - b).abs() > 1e-7)
    });
    assert!(moved, "the shared encoder must move with the head's update");
}

// ============================================================================
// Handler bookkeeping over a real episode
// ============================================================================

#[test]
fn handler_records_one_row_per_step_per_agent() {
    let handler = Arc::new(NetHandler::new(2, &small_net_config(), Device::Cpu, 17).unwrap());
    let mut economy = neural_economy(&handler, 2);

    let steps = 3;
    for _ in 0..steps {
        assert!(economy.time_step());
    }

    let tables = handler.episode_tables();
    assert_eq!(tables.time, steps as u64);
    assert_eq!(tables.purchase.len(), steps);
    assert_eq!(tables.values.len(), steps);
    assert_eq!(tables.rewards.len(), steps);

    let person_ids: Vec<_> = economy.persons.iter().map(|p| p.id()).collect();
    let firm_id = economy.firms[0].id();
    for t in 0..steps {
        for id in &person_ids {
            // Exactly one log-probability write per (time, agent, head),
            // possibly the NaN no-decision marker.
            assert!(tables.purchase[t].contains_key(id));
            assert!(tables.labor_search[t].contains_key(id));
            assert!(tables.consumption[t].contains_key(id));
            assert!(tables.values[t].contains_key(id));
            assert!(tables.rewards[t].contains_key(id));
        }
        assert!(tables.firm_purchase[t].contains_key(&firm_id));
        assert!(tables.production[t].contains_key(&firm_id));
        assert!(tables.offer[t].contains_key(&firm_id));
        assert!(tables.job_offer[t].contains_key(&firm_id));
        assert!(tables.values[t].contains_key(&firm_id));
    }

    // On the first step no market exists yet when decisions run, so the
    // purchase head records the no-decision marker.
    let first = tables.purchase[0].get(&person_ids[0]).unwrap();
    assert!(first.to_scalar::<f32>().unwrap().is_nan());

    // Firm rewards land one step behind and the last step has none.
    assert!(tables.rewards[0].contains_key(&firm_id));
    assert!(tables.rewards[1].contains_key(&firm_id));
    assert!(!tables.rewards[steps - 1].contains_key(&firm_id));
}

// ============================================================================
// One full gradient update
// ============================================================================

#[test]
fn trainer_produces_a_finite_loss_and_updates_weights() {
    let handler = Arc::new(NetHandler::new(2, &small_net_config(), Device::Cpu, 23).unwrap());
    let mut economy = neural_economy(&handler, 2);
    for _ in 0..3 {
        economy.time_step();
    }

    let mut trainer = A2cTrainer::new(
        Arc::clone(&handler),
        HeadLearningRates::uniform(0.05),
        LrDecayConfig::default(),
    )
    .unwrap();

    let before: Vec<Vec<f32>> = handler
        .nets
        .value_net
        .vars()
        .iter()
        .map(|v| v.flatten_all().unwrap().to_vec1::<f32>().unwrap())
        .collect();

    let loss = trainer.train_on_episode(&economy).unwrap();
    assert!(loss.is_finite(), "fresh nets on a tiny episode: loss {loss}");

    let moved = handler
        .nets
        .value_net
        .vars()
        .iter()
        .enumerate()
        .any(|(i, v)| {
            let after = v.flatten_all().unwrap().to_vec1::<f32>().unwrap();
            after
                .iter()
                .zip(&before[i])
                .any(|(a, b)| (a - b).abs() > 1e-9)
        });
    assert!(moved, "the critic must move after a gradient update");
}

#[test]
fn multithreaded_loss_matches_the_agent_partition() {
    // Same episode trained with the rayon partition: still finite, same
    // table shapes consumed without panics.
    let handler = Arc::new(NetHandler::new(2, &small_net_config(), Device::Cpu, 29).unwrap());
    let mut economy = neural_economy(&handler, 4);
    for _ in 0..3 {
        economy.time_step();
    }

    let mut trainer = A2cTrainer::new(
        Arc::clone(&handler),
        HeadLearningRates::default(),
        LrDecayConfig::default(),
    )
    .unwrap();
    trainer.multithreaded = true;
    trainer.num_threads = 2;

    let loss = trainer.train_on_episode(&economy).unwrap();
    assert!(loss.is_finite());
}

// ============================================================================
// The training loop
// ============================================================================

#[test]
fn training_loop_runs_and_checkpoints() {
    let dir = tempfile::tempdir().unwrap();

    // Tight sigmas keep every sampled share positive so no agent draws a
    // pathological technology.
    let mut scenario = ScenarioParams::two_good(2, 1);
    let tighten = |field: &mut MuSigma| field.sigma = 0.01;
    scenario.person.good_quantities.iter_mut().for_each(tighten);
    scenario.person.good_shares.iter_mut().for_each(tighten);
    tighten(&mut scenario.person.money);
    tighten(&mut scenario.person.labor_share);
    tighten(&mut scenario.person.elasticity);
    scenario.firm.good_quantities.iter_mut().for_each(tighten);
    scenario.firm.good_shares.iter_mut().for_each(tighten);
    tighten(&mut scenario.firm.money);
    tighten(&mut scenario.firm.tfp);
    tighten(&mut scenario.firm.labor_share);
    tighten(&mut scenario.firm.elasticity);

    let training = TrainingParams {
        num_episodes: 2,
        episode_length: 2,
        update_every_n_episodes: 1,
        checkpoint_every_n_episodes: 1,
        net: small_net_config(),
        save_dir: dir.path().to_path_buf(),
        seed: 3,
        ..TrainingParams::default()
    };

    let losses = agora_core::train(&scenario, &training).unwrap();
    assert_eq!(losses.len(), 2);

    // Eleven checkpoint files, one per encoder/head.
    let files = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(files, 11);

    // The saved policies drive a no-gradient run with one report per step.
    let reports = agora_core::run(&scenario, &training).unwrap();
    assert_eq!(reports.len(), training.episode_length as usize);

    // And training can resume from the checkpoints.
    let more = agora_core::train_from_pretrained(&scenario, &training).unwrap();
    assert_eq!(more.len(), 2);
}

// ============================================================================
// Checkpoint round trip through the handler
// ============================================================================

#[test]
fn handler_checkpoints_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let handler = NetHandler::new(2, &small_net_config(), Device::Cpu, 31).unwrap();
    handler.save_models(dir.path()).unwrap();

    // Loading back into the same family is a no-op on the values.
    let before: Vec<f32> = handler.nets.offer_encoder.vars()[0]
        .flatten_all()
        .unwrap()
        .to_vec1::<f32>()
        .unwrap();
    handler.load_models(dir.path()).unwrap();
    let after: Vec<f32> = handler.nets.offer_encoder.vars()[0]
        .flatten_all()
        .unwrap()
        .to_vec1::<f32>()
        .unwrap();
    assert_eq!(before, after);
}
