//! Engine configuration.
//!
//! Balance constants (decay intervals, combat multipliers, AI timeouts) are
//! tuning choices rather than structural rules, so they all live here with
//! defaults and can be overridden from a JSON file or in code. Time-pressure
//! budgets are content and are authored on story nodes instead.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Passive decay and survival thresholds.
    pub survival: SurvivalConfig,

    /// Rule-based combat tuning.
    pub combat: CombatTuning,

    /// AI-backed combat strategy settings.
    pub ai: AiConfig,

    /// Total item units the player can carry.
    pub inventory_capacity: u32,

    /// Root directory for checkpoint namespaces.
    pub checkpoint_dir: PathBuf,

    /// Fixed RNG seed. A random seed is drawn per new game when unset.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            survival: SurvivalConfig::default(),
            combat: CombatTuning::default(),
            ai: AiConfig::default(),
            inventory_capacity: 10,
            checkpoint_dir: PathBuf::from("saves"),
            seed: None,
        }
    }
}

impl EngineConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from JSON text. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    /// Fix the RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the checkpoint root directory.
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    /// Set the inventory capacity.
    pub fn with_inventory_capacity(mut self, capacity: u32) -> Self {
        self.inventory_capacity = capacity;
        self
    }

    /// Replace the survival tuning.
    pub fn with_survival(mut self, survival: SurvivalConfig) -> Self {
        self.survival = survival;
        self
    }

    /// Replace the AI settings.
    pub fn with_ai(mut self, ai: AiConfig) -> Self {
        self.ai = ai;
        self
    }

    /// Disable the AI-backed strategy entirely.
    pub fn without_ai(mut self) -> Self {
        self.ai.enabled = false;
        self
    }

    /// Reject values that would make the engine misbehave (zero intervals,
    /// empty inventories, inverted thresholds).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.survival.hunger_interval == 0 {
            return Err(ConfigError::Invalid("survival.hunger_interval must be > 0".into()));
        }
        if self.survival.durability_interval == 0 {
            return Err(ConfigError::Invalid(
                "survival.durability_interval must be > 0".into(),
            ));
        }
        if self.survival.hypothermia_ticks == 0 {
            return Err(ConfigError::Invalid(
                "survival.hypothermia_ticks must be > 0".into(),
            ));
        }
        if self.inventory_capacity == 0 {
            return Err(ConfigError::Invalid("inventory_capacity must be > 0".into()));
        }
        if self.ai.timeout_ms == 0 {
            return Err(ConfigError::Invalid("ai.timeout_ms must be > 0".into()));
        }
        if self.combat.crit_multiplier_pct < 100 {
            return Err(ConfigError::Invalid(
                "combat.crit_multiplier_pct must be >= 100".into(),
            ));
        }
        Ok(())
    }
}

/// Passive decay and death thresholds applied on every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurvivalConfig {
    /// Hunger rises every this many turns.
    pub hunger_interval: u32,
    /// How much hunger rises per interval.
    pub hunger_amount: i32,
    /// Wetness lost per tick.
    pub wetness_dry_rate: i32,
    /// Temperature change per tick.
    pub temperature_drift: i32,
    /// Temperature the body drifts back to when dry.
    pub temperature_neutral: i32,
    /// Wetness at or above this chills the body instead of warming it.
    pub wet_threshold: i32,
    /// Temperature strictly below this counts as a cold tick.
    pub hypothermia_threshold: i32,
    /// Consecutive cold ticks before hypothermia kills.
    pub hypothermia_ticks: u32,
    /// Equipment wears every this many turns.
    pub durability_interval: u32,
    /// Durability percentage lost per interval.
    pub durability_loss: u8,
    /// Stun duration when fear hits the cap.
    pub fear_panic_turns: u32,
    /// Fear level after a panic resolves the spike.
    pub fear_residual: i32,
    /// Slow duration when stamina runs out.
    pub exhaustion_slow_turns: u32,
}

impl Default for SurvivalConfig {
    fn default() -> Self {
        Self {
            hunger_interval: 5,
            hunger_amount: 5,
            wetness_dry_rate: 2,
            temperature_drift: 1,
            temperature_neutral: 50,
            wet_threshold: 50,
            hypothermia_threshold: 15,
            hypothermia_ticks: 3,
            durability_interval: 8,
            durability_loss: 5,
            fear_panic_turns: 2,
            fear_residual: 60,
            exhaustion_slow_turns: 2,
        }
    }
}

/// Rule-based combat tuning. Percentages are integers so resolution stays
/// exact across platforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatTuning {
    pub base_accuracy: i32,
    pub accuracy_per_agility: i32,
    pub dim_accuracy_penalty: i32,
    pub darkness_accuracy_penalty: i32,
    pub blind_accuracy_penalty: i32,
    pub slippery_penalty: i32,
    pub submerged_penalty: i32,
    pub dim_damage_pct: i32,
    pub dark_damage_pct: i32,
    pub kick_bonus: i32,
    pub weak_point_multiplier_pct: i32,
    pub crit_base_pct: i32,
    pub crit_per_agility_pct: i32,
    pub hasted_crit_bonus_pct: i32,
    pub crit_multiplier_pct: i32,
    pub counter_armor_factor: i32,
    pub slowed_enemy_counter_penalty: i32,
    pub dodge_per_agility: i32,
    pub dodge_light_bonus: i32,
    pub missing_leg_penalty: i32,
    pub flee_base: i32,
    pub flee_per_agility: i32,
    pub non_lethal_partial_pct: i32,
    pub damage_variance: i32,
}

impl Default for CombatTuning {
    fn default() -> Self {
        Self {
            base_accuracy: 60,
            accuracy_per_agility: 4,
            dim_accuracy_penalty: 10,
            darkness_accuracy_penalty: 30,
            blind_accuracy_penalty: 25,
            slippery_penalty: 10,
            submerged_penalty: 20,
            dim_damage_pct: 85,
            dark_damage_pct: 50,
            kick_bonus: 2,
            weak_point_multiplier_pct: 200,
            crit_base_pct: 5,
            crit_per_agility_pct: 2,
            hasted_crit_bonus_pct: 5,
            crit_multiplier_pct: 200,
            counter_armor_factor: 3,
            slowed_enemy_counter_penalty: 20,
            dodge_per_agility: 10,
            dodge_light_bonus: 20,
            missing_leg_penalty: 20,
            flee_base: 40,
            flee_per_agility: 4,
            non_lethal_partial_pct: 50,
            damage_variance: 4,
        }
    }
}

/// AI-backed combat strategy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Whether the AI-backed strategy may be used at all.
    pub enabled: bool,
    /// Model override.
    pub model: Option<String>,
    /// Maximum tokens for a judgement.
    pub max_tokens: usize,
    /// Hard bound on one AI evaluation, in milliseconds.
    pub timeout_ms: u64,
    /// Turns to skip the AI after it fails.
    pub cooldown_turns: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: None,
            max_tokens: 1024,
            timeout_ms: 8_000,
            cooldown_turns: 3,
        }
    }
}

impl AiConfig {
    /// The evaluation timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
