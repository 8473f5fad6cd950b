//! Timed status effects and the per-turn tick.
//!
//! The tick runs in a fixed order:
//!
//! 1. Purge effects already at zero duration (left by a zero-length apply).
//! 2. Apply each active effect (damage or capability flags), then decrement.
//! 3. Remove effects that reached zero.
//! 4. Passive decay: hunger, wetness, temperature, equipment durability,
//!    fear and stamina escalation.
//! 5. Death check. One cause is reported; proximate causes (status, combat,
//!    hazard) win over accumulated decay.

use crate::config::SurvivalConfig;
use crate::state::{Capabilities, DeathCause, PlayerState, Vital, VITAL_CAP};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Kinds of timed status effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Bleeding,
    Poisoned,
    Burning,
    Infected,
    Stunned,
    Slowed,
    Hasted,
}

impl StatusKind {
    pub fn name(&self) -> &'static str {
        match self {
            StatusKind::Bleeding => "bleeding",
            StatusKind::Poisoned => "poison",
            StatusKind::Burning => "burning",
            StatusKind::Infected => "infection",
            StatusKind::Stunned => "stun",
            StatusKind::Slowed => "slow",
            StatusKind::Hasted => "haste",
        }
    }

    /// Whether this effect deals damage each tick.
    pub fn deals_damage(&self) -> bool {
        matches!(
            self,
            StatusKind::Bleeding | StatusKind::Poisoned | StatusKind::Burning | StatusKind::Infected
        )
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One active effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEffect {
    pub kind: StatusKind,
    /// Ticks left. Never negative.
    pub remaining: u32,
    /// Per-tick damage, or capability strength for non-damaging kinds.
    pub magnitude: i32,
}

/// Active effects keyed by kind. At most one entry per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEffects {
    effects: BTreeMap<StatusKind, StatusEffect>,
}

impl StatusEffects {
    /// Apply an effect. Reapplying a kind refreshes its duration to the
    /// greater of current and new, and replaces the magnitude.
    pub fn apply(&mut self, kind: StatusKind, duration: u32, magnitude: i32) {
        let magnitude = magnitude.max(0);
        match self.effects.get_mut(&kind) {
            Some(existing) => {
                existing.remaining = existing.remaining.max(duration);
                existing.magnitude = magnitude;
            }
            None => {
                self.effects.insert(
                    kind,
                    StatusEffect {
                        kind,
                        remaining: duration,
                        magnitude,
                    },
                );
            }
        }
    }

    /// Remove an effect. Returns true if it was active.
    pub fn cure(&mut self, kind: StatusKind) -> bool {
        self.effects.remove(&kind).is_some()
    }

    pub fn get(&self, kind: StatusKind) -> Option<&StatusEffect> {
        self.effects.get(&kind)
    }

    pub fn has(&self, kind: StatusKind) -> bool {
        self.effects.get(&kind).map(|e| e.remaining > 0).unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StatusEffect> {
        self.effects.values()
    }

    pub fn kinds(&self) -> Vec<StatusKind> {
        self.effects.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    fn purge_expired(&mut self) -> Vec<StatusKind> {
        let expired: Vec<StatusKind> = self
            .effects
            .values()
            .filter(|e| e.remaining == 0)
            .map(|e| e.kind)
            .collect();
        for kind in &expired {
            self.effects.remove(kind);
        }
        expired
    }
}

/// What happened during one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    /// Turn number after the tick.
    pub turn: u32,
    /// Damage dealt by each damaging effect.
    pub status_damage: Vec<(StatusKind, i32)>,
    /// Effects removed this tick.
    pub expired: Vec<StatusKind>,
    pub hunger_rose: bool,
    /// Durability lost by equipped items, when the wear interval elapsed.
    pub equipment_wear: Option<u8>,
    /// Fear hit the cap and the player panicked.
    pub panicked: bool,
    /// Stamina ran out and the player slowed.
    pub exhausted: bool,
    pub death: Option<DeathCause>,
}

/// Ticks status effects and passive decay.
#[derive(Debug, Clone, Default)]
pub struct StatusEffectEngine {
    config: SurvivalConfig,
}

impl StatusEffectEngine {
    pub fn new(config: SurvivalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SurvivalConfig {
        &self.config
    }

    /// Apply or refresh a status effect on the player.
    pub fn apply_effect(state: &mut PlayerState, kind: StatusKind, duration: u32, magnitude: i32) {
        state.status.apply(kind, duration, magnitude);
    }

    /// Advance one turn. A dead player does not tick.
    pub fn tick(&self, state: &mut PlayerState) -> TickReport {
        let mut report = TickReport {
            turn: state.turn,
            ..Default::default()
        };
        if state.is_dead() {
            report.death = state.death.clone();
            return report;
        }

        report.expired.extend(state.status.purge_expired());

        // Active effects
        let mut capabilities = Capabilities::default();
        let mut last_damaging = None;
        for effect in state.status.effects.values_mut() {
            match effect.kind {
                kind if kind.deals_damage() => {
                    let dealt = -state.vitals.adjust(Vital::Health, -effect.magnitude);
                    report.status_damage.push((kind, dealt));
                    if dealt > 0 {
                        last_damaging = Some(kind);
                    }
                }
                StatusKind::Stunned => capabilities.can_act = false,
                StatusKind::Slowed => capabilities.agility_modifier -= effect.magnitude.max(1),
                StatusKind::Hasted => {
                    capabilities.agility_modifier += effect.magnitude.max(1);
                    capabilities.crit_bonus += 5;
                }
                _ => {}
            }
            effect.remaining = effect.remaining.saturating_sub(1);
        }
        state.capabilities = capabilities;
        report.expired.extend(state.status.purge_expired());

        self.passive_decay(state, &mut report);

        report.death = self.check_death(state, last_damaging);
        if let Some(cause) = &report.death {
            state.record_death(cause.clone());
            report.death = state.death.clone();
        }

        debug!(
            turn = state.turn,
            health = state.vitals.health,
            hunger = state.vitals.hunger,
            temperature = state.vitals.temperature,
            effects = state.status.len(),
            "Tick"
        );
        report
    }

    fn passive_decay(&self, state: &mut PlayerState, report: &mut TickReport) {
        let cfg = &self.config;
        state.turn += 1;
        report.turn = state.turn;

        if state.turn % cfg.hunger_interval == 0 {
            state.vitals.adjust(Vital::Hunger, cfg.hunger_amount);
            report.hunger_rose = true;
        }

        state.vitals.adjust(Vital::Wetness, -cfg.wetness_dry_rate);
        if state.vitals.wetness >= cfg.wet_threshold {
            state.vitals.adjust(Vital::Temperature, -cfg.temperature_drift);
        } else {
            let gap = cfg.temperature_neutral - state.vitals.temperature;
            let step = gap.clamp(-cfg.temperature_drift, cfg.temperature_drift);
            state.vitals.adjust(Vital::Temperature, step);
        }
        if state.vitals.temperature < cfg.hypothermia_threshold {
            state.cold_ticks += 1;
        } else {
            state.cold_ticks = 0;
        }

        if state.turn % cfg.durability_interval == 0 {
            state.equipment.wear_all(cfg.durability_loss);
            report.equipment_wear = Some(cfg.durability_loss);
        }

        if state.vitals.fear >= VITAL_CAP {
            state.status.apply(StatusKind::Stunned, cfg.fear_panic_turns, 0);
            state.vitals.set(Vital::Fear, cfg.fear_residual);
            report.panicked = true;
        }

        if state.vitals.stamina <= 0 && !state.status.has(StatusKind::Slowed) {
            state.status.apply(StatusKind::Slowed, cfg.exhaustion_slow_turns, 2);
            report.exhausted = true;
        }
    }

    fn check_death(&self, state: &PlayerState, last_damaging: Option<StatusKind>) -> Option<DeathCause> {
        if let Some(cause) = &state.death {
            return Some(cause.clone());
        }
        if state.vitals.health <= 0 {
            return Some(match last_damaging {
                Some(kind) => DeathCause::Status { kind },
                None => DeathCause::Hazard {
                    source: "wounds".to_string(),
                },
            });
        }
        if state.vitals.hunger >= VITAL_CAP {
            return Some(DeathCause::Starvation);
        }
        if state.vitals.sanity <= 0 {
            return Some(DeathCause::Madness);
        }
        if state.cold_ticks >= self.config.hypothermia_ticks {
            return Some(DeathCause::Hypothermia);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::ItemCatalog;
    use crate::state::{EquipSlot, ItemId, NodeId};

    fn fresh() -> PlayerState {
        let mut state = PlayerState::new_game(NodeId::from("start"), 10, 1);
        // Dry and warm so decay does not interfere.
        state.vitals.set(Vital::Wetness, 0);
        state.vitals.set(Vital::Temperature, 50);
        state
    }

    fn engine() -> StatusEffectEngine {
        StatusEffectEngine::new(SurvivalConfig::default())
    }

    #[test]
    fn test_reapply_refreshes_to_max_duration() {
        let mut effects = StatusEffects::default();
        effects.apply(StatusKind::Bleeding, 5, 3);
        effects.apply(StatusKind::Bleeding, 2, 1);
        let bleeding = effects.get(StatusKind::Bleeding).unwrap();
        assert_eq!(bleeding.remaining, 5);
        assert_eq!(bleeding.magnitude, 1);

        effects.apply(StatusKind::Bleeding, 8, 4);
        let bleeding = effects.get(StatusKind::Bleeding).unwrap();
        assert_eq!(bleeding.remaining, 8);
        assert_eq!(bleeding.magnitude, 4);
        assert_eq!(effects.len(), 1);
    }

    #[test]
    fn test_bleeding_ticks_then_expires() {
        let mut state = fresh();
        StatusEffectEngine::apply_effect(&mut state, StatusKind::Bleeding, 2, 4);
        let engine = engine();

        let report = engine.tick(&mut state);
        assert_eq!(report.status_damage, vec![(StatusKind::Bleeding, 4)]);
        assert_eq!(state.vitals.health, 56);
        assert!(report.expired.is_empty());

        let report = engine.tick(&mut state);
        assert_eq!(state.vitals.health, 52);
        assert_eq!(report.expired, vec![StatusKind::Bleeding]);

        let report = engine.tick(&mut state);
        assert!(report.status_damage.is_empty());
        assert_eq!(state.vitals.health, 52);
    }

    #[test]
    fn test_zero_duration_purged_before_processing() {
        let mut state = fresh();
        state.status.apply(StatusKind::Poisoned, 0, 10);
        let report = engine().tick(&mut state);
        assert!(report.status_damage.is_empty());
        assert_eq!(report.expired, vec![StatusKind::Poisoned]);
        assert_eq!(state.vitals.health, 60);
    }

    #[test]
    fn test_stun_sets_capability() {
        let mut state = fresh();
        state.status.apply(StatusKind::Stunned, 1, 0);
        engine().tick(&mut state);
        assert!(!state.capabilities.can_act);
        engine().tick(&mut state);
        assert!(state.capabilities.can_act);
    }

    #[test]
    fn test_slow_and_haste_modify_agility() {
        let mut state = fresh();
        state.status.apply(StatusKind::Slowed, 3, 2);
        engine().tick(&mut state);
        assert_eq!(state.effective_agility(), 3);

        let mut state = fresh();
        state.status.apply(StatusKind::Hasted, 3, 1);
        engine().tick(&mut state);
        assert_eq!(state.effective_agility(), 6);
        assert_eq!(state.capabilities.crit_bonus, 5);
    }

    #[test]
    fn test_health_never_negative() {
        let mut state = fresh();
        state.status.apply(StatusKind::Burning, 3, 500);
        let report = engine().tick(&mut state);
        assert_eq!(state.vitals.health, 0);
        assert_eq!(report.status_damage, vec![(StatusKind::Burning, 60)]);
        assert_eq!(
            report.death,
            Some(DeathCause::Status {
                kind: StatusKind::Burning
            })
        );
    }

    #[test]
    fn test_hunger_every_interval() {
        let mut state = fresh();
        let engine = engine();
        for _ in 0..4 {
            assert!(!engine.tick(&mut state).hunger_rose);
        }
        assert!(engine.tick(&mut state).hunger_rose);
        assert_eq!(state.vitals.hunger, 35);
    }

    #[test]
    fn test_wet_player_cools_then_warms() {
        let mut state = PlayerState::new_game(NodeId::from("start"), 10, 1);
        let engine = engine();
        engine.tick(&mut state);
        assert_eq!(state.vitals.wetness, 78);
        assert_eq!(state.vitals.temperature, 39);

        state.vitals.set(Vital::Wetness, 10);
        engine.tick(&mut state);
        assert_eq!(state.vitals.temperature, 40);
    }

    #[test]
    fn test_hypothermia_after_consecutive_cold_ticks() {
        let mut state = fresh();
        state.vitals.set(Vital::Wetness, 100);
        state.vitals.set(Vital::Temperature, 12);
        let engine = engine();
        assert!(engine.tick(&mut state).death.is_none());
        assert!(engine.tick(&mut state).death.is_none());
        assert_eq!(engine.tick(&mut state).death, Some(DeathCause::Hypothermia));
        assert!(state.is_dead());
    }

    #[test]
    fn test_durability_decay() {
        let catalog = ItemCatalog::standard();
        let mut state = fresh();
        state.inventory.add(ItemId::from("shiv"), 1).unwrap();
        state
            .equip(&catalog, &ItemId::from("shiv"), EquipSlot::Weapon)
            .unwrap();
        let engine = engine();
        for n in 1..=3u32 {
            for _ in 0..8 {
                state.vitals.set(Vital::Hunger, 0);
                engine.tick(&mut state);
            }
            assert_eq!(
                state.equipment.durability(EquipSlot::Weapon),
                Some((100 - 5 * n) as u8)
            );
        }
    }

    #[test]
    fn test_fear_panic() {
        let mut state = fresh();
        state.vitals.set(Vital::Fear, 100);
        let report = engine().tick(&mut state);
        assert!(report.panicked);
        assert!(state.status.has(StatusKind::Stunned));
        assert_eq!(state.vitals.fear, 60);
    }

    #[test]
    fn test_exhaustion_slows() {
        let mut state = fresh();
        state.vitals.set(Vital::Stamina, 0);
        assert!(engine().tick(&mut state).exhausted);
        assert!(state.status.has(StatusKind::Slowed));
        // Not reapplied while still slowed.
        assert!(!engine().tick(&mut state).exhausted);
    }

    #[test]
    fn test_proximate_cause_wins() {
        let mut state = fresh();
        state.vitals.set(Vital::Hunger, 100);
        state.vitals.set(Vital::Sanity, 0);
        state.status.apply(StatusKind::Poisoned, 2, 100);
        let report = engine().tick(&mut state);
        assert_eq!(
            report.death,
            Some(DeathCause::Status {
                kind: StatusKind::Poisoned
            })
        );
    }

    #[test]
    fn test_starvation_before_madness() {
        let mut state = fresh();
        state.vitals.set(Vital::Hunger, 100);
        state.vitals.set(Vital::Sanity, 0);
        assert_eq!(engine().tick(&mut state).death, Some(DeathCause::Starvation));
    }

    #[test]
    fn test_dead_player_does_not_tick() {
        let mut state = fresh();
        state.record_death(DeathCause::Madness);
        let turn = state.turn;
        let report = engine().tick(&mut state);
        assert_eq!(state.turn, turn);
        assert_eq!(report.death, Some(DeathCause::Madness));
    }
}
