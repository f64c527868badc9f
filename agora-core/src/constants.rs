//! Process-wide constants: market defaults, numeric guards, and the default
//! decision-net architecture and training configuration.

// === MARKET DEFAULTS ===

pub const DEFAULT_PRICE: f64 = 1.0;
pub const PRICE_MULTIPLIER: f64 = 1.1;
pub const DEFAULT_LABOR_BUDGET: f64 = 0.5;
pub const DEFAULT_WAGE: f64 = 1.0;
pub const LABOR_INCREMENT: f64 = 0.25;

/// Firms quantize their good offers into slots of this many units.
pub const AMOUNT_PER_OFFER: f64 = 1.0;
/// Firms quantize their job offers into slots of this much labor.
pub const LABOR_AMOUNT_PER_OFFER: f64 = 0.5;

// === NUMERIC GUARDS ===

pub const EPS: f64 = 1e-4;
/// Clip for log-normal wage samples; keeps the tail finite.
pub const LARGE_NUMBER: f64 = 1e6;

// === DEFAULT NET ARCHITECTURE ===

pub const DEFAULT_STACK_SIZE: usize = 10;
pub const DEFAULT_ENCODING_SIZE: usize = 10;
pub const DEFAULT_HIDDEN_SIZE: usize = 100;
pub const DEFAULT_N_HIDDEN: usize = 6;
pub const DEFAULT_N_HIDDEN_SMALL: usize = 3;

// === DEFAULT TRAINING BEHAVIOR ===

pub const DEFAULT_NUM_EPISODES: u32 = 100;
pub const DEFAULT_EPISODE_LENGTH: u32 = 20;
pub const DEFAULT_UPDATE_EVERY_N_EPISODES: u32 = 10;
pub const DEFAULT_CHECKPOINT_EVERY_N_EPISODES: u32 = 10;

pub const DEFAULT_LEARNING_RATE: f64 = 1e-5;
pub const DEFAULT_EPISODE_BATCH_SIZE_FOR_LR_DECAY: u32 = 10;
pub const DEFAULT_PATIENCE_FOR_LR_DECAY: u32 = 5;
pub const DEFAULT_MULTIPLIER_FOR_LR_DECAY: f64 = 0.5;
pub const DEFAULT_REVERSE_ANNEALING_PERIOD: u32 = 2;

pub const DEFAULT_SAVE_DIR: &str = "models";
