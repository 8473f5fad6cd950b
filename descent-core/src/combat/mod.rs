//! Combat resolution.
//!
//! A combat turn takes a [`CombatContext`] (enemy, environment, a snapshot of
//! the player) and a free-text [`PlayerAction`], and produces exactly one
//! [`CombatOutcome`]. Two strategies implement [`CombatStrategy`]: the
//! AI-backed judge in [`ai`] and the deterministic rules in [`rules`]. The
//! [`resolver`] picks between them by availability and health.

pub mod ai;
pub mod resolver;
pub mod rules;

pub use ai::{AiError, AiStrategy, ClaudeBackend, JudgeRequest, ReasoningBackend, Verdict};
pub use resolver::{CombatResolver, FallbackReason, ResolvedTurn, StrategyPreference};
pub use rules::RuleBasedStrategy;

use crate::items::ItemCatalog;
use crate::state::{NodeId, PlayerState, Stats};
use crate::status::{StatusEffects, StatusKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest action text passed to any strategy.
pub const MAX_ACTION_LENGTH: usize = 500;

/// Errors from a single strategy evaluation.
#[derive(Debug, Error)]
pub enum CombatError {
    #[error("AI judge unavailable: {0}")]
    AiUnavailable(#[from] AiError),

    #[error("Invalid combat context: {0}")]
    InvalidContext(String),
}

/// Ambient light.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightLevel {
    #[default]
    Dark,
    Dim,
    Lit,
}

/// Ground conditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Footing {
    #[default]
    Stable,
    Slippery,
    Submerged,
}

/// Environmental modifiers for a fight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub light: LightLevel,
    #[serde(default)]
    pub footing: Footing,
}

/// An enemy as authored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enemy {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub health: i32,
    /// Damage per landed counterattack.
    pub attack: i32,
    /// Flat reduction on incoming damage.
    #[serde(default)]
    pub defense: i32,
    /// Base counterattack chance, percent.
    #[serde(default = "default_aggression")]
    pub aggression: i32,
    /// Named weak points ("eyes", "fire").
    #[serde(default)]
    pub weaknesses: Vec<String>,
    /// Lethal enemies kill a defenceless attacker outright.
    #[serde(default)]
    pub lethal: bool,
}

fn default_aggression() -> i32 {
    50
}

impl Enemy {
    pub fn new(name: &str, health: i32, attack: i32) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            health,
            attack,
            defense: 0,
            aggression: default_aggression(),
            weaknesses: Vec::new(),
            lethal: false,
        }
    }

    pub fn with_defense(mut self, defense: i32) -> Self {
        self.defense = defense;
        self
    }

    pub fn with_aggression(mut self, aggression: i32) -> Self {
        self.aggression = aggression;
        self
    }

    pub fn with_weakness(mut self, weakness: &str) -> Self {
        self.weaknesses.push(weakness.to_lowercase());
        self
    }

    pub fn lethal(mut self) -> Self {
        self.lethal = true;
        self
    }
}

/// A fight attached to a choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encounter {
    pub enemy: Enemy,
    #[serde(default)]
    pub environment: Environment,
    /// Destination after a successful escape. Escape is impossible without one.
    #[serde(default)]
    pub flee_node: Option<NodeId>,
    /// Destination on death. Defaults to the dead end.
    #[serde(default)]
    pub defeat_node: Option<NodeId>,
}

impl Encounter {
    pub fn new(enemy: Enemy) -> Self {
        Self {
            enemy,
            environment: Environment::default(),
            flee_node: None,
            defeat_node: None,
        }
    }

    pub fn in_environment(mut self, light: LightLevel, footing: Footing) -> Self {
        self.environment = Environment { light, footing };
        self
    }

    pub fn fleeing_to(mut self, node: &str) -> Self {
        self.flee_node = Some(NodeId::from(node));
        self
    }

    pub fn defeat_at(mut self, node: &str) -> Self {
        self.defeat_node = Some(NodeId::from(node));
        self
    }
}

/// The equipped weapon as seen in combat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaponSnapshot {
    pub name: String,
    /// Zero when broken.
    pub bonus: i32,
    pub crit_bonus: i32,
    pub ranged: bool,
    pub broken: bool,
}

/// The player at the moment of resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub stats: Stats,
    /// Agility after status modifiers.
    pub agility: i32,
    pub health: i32,
    pub max_health: i32,
    pub weapon: Option<WeaponSnapshot>,
    pub armor_bonus: i32,
    pub has_light: bool,
    pub arms: usize,
    pub legs: usize,
    pub can_see: bool,
    pub can_act: bool,
    /// Extra critical chance from statuses.
    pub crit_bonus: i32,
    pub statuses: Vec<StatusKind>,
}

impl PlayerSnapshot {
    pub fn capture(state: &PlayerState, catalog: &ItemCatalog) -> Self {
        let weapon = state
            .equipment
            .get(crate::state::EquipSlot::Weapon)
            .and_then(|equipped| {
                let def = catalog.get(&equipped.item)?;
                let broken = equipped.is_broken();
                Some(WeaponSnapshot {
                    name: def.name.clone(),
                    bonus: if broken { 0 } else { def.bonus },
                    crit_bonus: if broken { 0 } else { def.crit_bonus },
                    ranged: def.ranged && !broken,
                    broken,
                })
            });
        Self {
            stats: state.stats.clone(),
            agility: state.effective_agility(),
            health: state.vitals.health,
            max_health: state.vitals.max_health,
            weapon,
            armor_bonus: state.armor_bonus(catalog),
            has_light: state.has_light(catalog),
            arms: state.body.arms(),
            legs: state.body.legs(),
            can_see: state.body.can_see(),
            can_act: state.capabilities.can_act && !state.status.has(StatusKind::Stunned),
            crit_bonus: state.capabilities.crit_bonus,
            statuses: state.status.kinds(),
        }
    }

    pub fn weapon_bonus(&self) -> i32 {
        self.weapon.as_ref().map(|w| w.bonus).unwrap_or(0)
    }

    pub fn has_ranged_weapon(&self) -> bool {
        self.weapon.as_ref().map(|w| w.ranged).unwrap_or(false)
    }
}

/// Everything a strategy needs to judge one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatContext {
    pub enemy: Enemy,
    /// Remaining enemy health.
    pub enemy_health: i32,
    pub enemy_statuses: Vec<StatusKind>,
    pub environment: Environment,
    pub player: PlayerSnapshot,
    /// Turn within this fight, starting at 1.
    pub round: u32,
}

impl CombatContext {
    /// Light the player actually fights in: their own light source beats the
    /// surroundings.
    pub fn effective_light(&self) -> LightLevel {
        if self.player.has_light {
            LightLevel::Lit
        } else {
            self.environment.light
        }
    }

    pub fn enemy_has(&self, kind: StatusKind) -> bool {
        self.enemy_statuses.contains(&kind)
    }
}

/// A fight in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveEncounter {
    pub encounter: Encounter,
    /// Reached on victory.
    pub victory_node: NodeId,
    pub enemy_health: i32,
    pub enemy_status: StatusEffects,
    pub round: u32,
}

impl ActiveEncounter {
    pub fn start(encounter: Encounter, victory_node: NodeId) -> Self {
        Self {
            enemy_health: encounter.enemy.health,
            encounter,
            victory_node,
            enemy_status: StatusEffects::default(),
            round: 0,
        }
    }

    pub fn context(&self, state: &PlayerState, catalog: &ItemCatalog) -> CombatContext {
        CombatContext {
            enemy: self.encounter.enemy.clone(),
            enemy_health: self.enemy_health,
            enemy_statuses: self.enemy_status.kinds(),
            environment: self.encounter.environment,
            player: PlayerSnapshot::capture(state, catalog),
            round: self.round + 1,
        }
    }

    pub fn enemy_defeated(&self) -> bool {
        self.enemy_health <= 0
    }

    /// Tick enemy statuses once per round. Returns damage taken by the enemy.
    pub fn tick_enemy(&mut self) -> i32 {
        let mut damage = 0;
        let mut next = StatusEffects::default();
        for effect in self.enemy_status.iter() {
            if effect.kind.deals_damage() {
                damage += effect.magnitude;
            }
            if effect.remaining > 1 {
                next.apply(effect.kind, effect.remaining - 1, effect.magnitude);
            }
        }
        self.enemy_status = next;
        self.enemy_health = (self.enemy_health - damage).max(0);
        damage
    }
}

/// How an attack is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackStyle {
    Melee,
    Kick,
    Ranged,
}

/// What the player is trying to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// `target` is a named enemy weakness when the text aims at one.
    Attack {
        style: AttackStyle,
        target: Option<String>,
    },
    Dodge,
    Flee,
    /// Nothing recognizable. Always fails.
    Vague,
}

impl ActionKind {
    pub fn is_offensive(&self) -> bool {
        matches!(self, ActionKind::Attack { .. })
    }
}

const FLEE_WORDS: &[&str] = &["flee", "run", "escape", "retreat", "bolt"];
const DODGE_WORDS: &[&str] = &["dodge", "evade", "duck", "sidestep", "roll", "jump aside"];
const KICK_WORDS: &[&str] = &["kick", "stomp"];
const RANGED_WORDS: &[&str] = &["shoot", "sling", "throw", "hurl"];
const ATTACK_WORDS: &[&str] = &[
    "attack", "strike", "hit", "stab", "slash", "punch", "swing", "bash", "smash", "cut",
    "thrust", "jab", "gouge", "burn",
];

/// A player's combat input, bounded and classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerAction {
    pub text: String,
    pub kind: ActionKind,
}

impl PlayerAction {
    /// Classify free text against the enemy's weaknesses. Text is cut to
    /// [`MAX_ACTION_LENGTH`] characters first.
    pub fn parse(text: &str, enemy: &Enemy) -> Self {
        let text: String = text.trim().chars().take(MAX_ACTION_LENGTH).collect();
        let lower = text.to_lowercase();
        let words = split_words(&lower);
        let mentions = |phrases: &[&str]| phrases.iter().any(|p| contains_phrase(&words, p));

        let target = enemy
            .weaknesses
            .iter()
            .find(|weak| contains_phrase(&words, &weak.to_lowercase()))
            .cloned();

        let kind = if mentions(FLEE_WORDS) {
            ActionKind::Flee
        } else if mentions(DODGE_WORDS) {
            ActionKind::Dodge
        } else if mentions(KICK_WORDS) {
            ActionKind::Attack {
                style: AttackStyle::Kick,
                target,
            }
        } else if mentions(RANGED_WORDS) {
            ActionKind::Attack {
                style: AttackStyle::Ranged,
                target,
            }
        } else if mentions(ATTACK_WORDS) || target.is_some() {
            ActionKind::Attack {
                style: AttackStyle::Melee,
                target,
            }
        } else {
            ActionKind::Vague
        };

        Self { text, kind }
    }
}

fn split_words(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Whole-word match, so "troll" never reads as "roll".
fn contains_phrase(words: &[&str], phrase: &str) -> bool {
    let needle = split_words(phrase);
    !needle.is_empty()
        && words
            .windows(needle.len())
            .any(|window| window == needle.as_slice())
}

/// Who a combat status lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatTarget {
    Player,
    Enemy,
}

/// A status effect produced by a combat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusApplication {
    pub target: CombatTarget,
    pub kind: StatusKind,
    pub duration: u32,
    #[serde(default)]
    pub magnitude: i32,
}

/// The single authoritative result of one combat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatOutcome {
    pub success: bool,
    pub narrative: String,
    pub damage_dealt: i32,
    pub damage_taken: i32,
    pub status_effects: Vec<StatusApplication>,
    pub instant_death: bool,
    /// The player got away.
    #[serde(default)]
    pub escaped: bool,
}

impl CombatOutcome {
    /// The outcome used when no strategy could judge the turn: the player
    /// backs off and nothing else happens.
    pub fn flee_attempt() -> Self {
        Self {
            success: false,
            narrative: "You stagger back, looking for an opening to get away. Neither of you lands a blow."
                .to_string(),
            damage_dealt: 0,
            damage_taken: 0,
            status_effects: Vec::new(),
            instant_death: false,
            escaped: false,
        }
    }

    pub fn failure(narrative: impl Into<String>) -> Self {
        Self {
            success: false,
            narrative: narrative.into(),
            damage_dealt: 0,
            damage_taken: 0,
            status_effects: Vec::new(),
            instant_death: false,
            escaped: false,
        }
    }
}

/// Which strategy produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    AiBacked,
    RuleBased,
    SafeFallback,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::AiBacked => write!(f, "ai-backed"),
            StrategyKind::RuleBased => write!(f, "rule-based"),
            StrategyKind::SafeFallback => write!(f, "safe fallback"),
        }
    }
}

/// One way of judging a combat turn.
#[async_trait]
pub trait CombatStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Judge `action` in `context`. `seed` drives every random draw.
    async fn evaluate(
        &self,
        context: &CombatContext,
        action: &PlayerAction,
        seed: u64,
    ) -> Result<CombatOutcome, CombatError>;
}
