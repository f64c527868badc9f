use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use agora_core::{run, train, train_from_pretrained, ScenarioParams, TrainingParams};

/// Train neural decision policies on a simulated market economy.
#[derive(Parser, Debug)]
#[command(name = "agora", version, about)]
struct Cli {
    /// Number of persons in the economy.
    #[arg(default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..))]
    num_persons: u32,

    /// Number of firms in the economy.
    #[arg(default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..))]
    num_firms: u32,

    /// Number of training episodes.
    #[arg(default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    num_episodes: u32,

    /// Steps per episode.
    #[arg(default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    episode_length: u32,

    /// RNG seed for the scenario and the policies.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Directory for model checkpoints.
    #[arg(long, default_value = agora_core::constants::DEFAULT_SAVE_DIR)]
    save_dir: PathBuf,

    /// Compute episode losses on a thread pool.
    #[arg(long, default_value_t = false)]
    multithreaded: bool,

    /// Worker threads for the training pass (0 = all cores).
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Continue training from the checkpoints in the save directory.
    #[arg(long, default_value_t = false)]
    from_pretrained: bool,

    /// Skip training: run one episode with saved policies and print the
    /// market state after every step.
    #[arg(long, default_value_t = false)]
    demo: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    let scenario = ScenarioParams::two_good(cli.num_persons, cli.num_firms);
    let mut training = TrainingParams {
        num_episodes: cli.num_episodes,
        episode_length: cli.episode_length,
        seed: cli.seed,
        save_dir: cli.save_dir,
        multithreaded: cli.multithreaded,
        ..TrainingParams::default()
    };
    if cli.threads > 0 {
        training.num_threads = cli.threads;
    }

    if cli.demo {
        let reports = run(&scenario, &training).context("demo run failed")?;
        for report in reports {
            println!("{report}");
        }
        return Ok(());
    }

    tracing::info!(
        persons = cli.num_persons,
        firms = cli.num_firms,
        episodes = cli.num_episodes,
        episode_length = cli.episode_length,
        "starting training",
    );

    let losses = if cli.from_pretrained {
        train_from_pretrained(&scenario, &training).context("training failed")?
    } else {
        train(&scenario, &training).context("training failed")?
    };
    if let Some(last) = losses.last() {
        println!("final episode loss: {last:.6e}");
    }
    Ok(())
}
