//! State deltas as a closed set of tagged variants.
//!
//! Node `on_enter` effects, choice effects, and item use effects are all
//! `Effect` values interpreted by [`apply_effect`]. Effects apply in declared
//! order so later effects observe earlier ones; a list stops at the first
//! effect that kills the player.

use crate::state::{BodyPart, DeathCause, EquipSlot, ItemId, PlayerState, Stat, Vital};
use crate::status::StatusKind;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A single state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    /// Lose health to a named hazard.
    Damage { amount: i32, source: String },

    /// Restore health, up to the maximum.
    Heal { amount: i32 },

    AdjustStat { stat: Stat, delta: i32 },

    AdjustVital { vital: Vital, delta: i32 },

    SetFlag { flag: String },

    ClearFlag { flag: String },

    /// Add items. Units that do not fit are lost.
    GrantItem {
        item: ItemId,
        #[serde(default = "one")]
        count: u32,
    },

    /// Forced item loss. Removes what is held, up to `count`.
    RemoveItem {
        item: ItemId,
        #[serde(default = "one")]
        count: u32,
    },

    ApplyStatus {
        kind: StatusKind,
        duration: u32,
        #[serde(default)]
        magnitude: i32,
    },

    CureStatus { kind: StatusKind },

    LoseBodyPart { part: BodyPart },

    DamageEquipment { slot: EquipSlot, amount: u8 },
}

fn one() -> u32 {
    1
}

/// Result of applying one effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EffectResult {
    /// The effect changed state; `delta` is the numeric change where one applies.
    Applied { delta: i32 },
    /// Nothing to change (already at bound, flag already set, item absent).
    NoChange,
    /// Some granted units did not fit and were left behind.
    Overflow { granted: u32, lost: u32 },
    /// Losing the last arm released held items; these did not fit in the pack.
    Dropped { items: Vec<ItemId> },
}

/// An effect together with what it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedEffect {
    pub effect: Effect,
    pub result: EffectResult,
}

pub type EffectLog = Vec<AppliedEffect>;

/// Apply effects in order. Stops after the effect that kills the player.
pub fn apply_effects(state: &mut PlayerState, effects: &[Effect]) -> EffectLog {
    let mut log = Vec::with_capacity(effects.len());
    for effect in effects {
        if state.is_dead() {
            break;
        }
        let result = apply_effect(state, effect);
        log.push(AppliedEffect {
            effect: effect.clone(),
            result,
        });
    }
    log
}

/// Apply a single effect.
pub fn apply_effect(state: &mut PlayerState, effect: &Effect) -> EffectResult {
    debug!(?effect, "Applying effect");
    match effect {
        Effect::Damage { amount, source } => {
            let delta = state.vitals.adjust(Vital::Health, -amount.saturating_abs());
            if state.vitals.is_dead() {
                state.record_death(DeathCause::Hazard {
                    source: source.clone(),
                });
            }
            changed(delta)
        }
        Effect::Heal { amount } => changed(state.vitals.adjust(Vital::Health, amount.saturating_abs())),
        Effect::AdjustStat { stat, delta } => {
            let before = state.stats.get(*stat);
            state.stats.adjust(*stat, *delta);
            changed(state.stats.get(*stat) - before)
        }
        Effect::AdjustVital { vital, delta } => {
            let applied = state.vitals.adjust(*vital, *delta);
            if *vital == Vital::Health && state.vitals.is_dead() {
                state.record_death(DeathCause::Hazard {
                    source: "injury".to_string(),
                });
            }
            changed(applied)
        }
        Effect::SetFlag { flag } => {
            if state.flags.insert(flag.clone()) {
                EffectResult::Applied { delta: 1 }
            } else {
                EffectResult::NoChange
            }
        }
        Effect::ClearFlag { flag } => {
            if state.flags.remove(flag) {
                EffectResult::Applied { delta: -1 }
            } else {
                EffectResult::NoChange
            }
        }
        Effect::GrantItem { item, count } => {
            let granted = (*count).min(state.inventory.free());
            if granted > 0 {
                // Cannot fail: granted <= free.
                let _ = state.inventory.add(item.clone(), granted);
            }
            if granted < *count {
                EffectResult::Overflow {
                    granted,
                    lost: count - granted,
                }
            } else {
                changed(granted as i32)
            }
        }
        Effect::RemoveItem { item, count } => {
            let removed = state.inventory.remove_up_to(item, *count);
            changed(-(removed as i32))
        }
        Effect::ApplyStatus {
            kind,
            duration,
            magnitude,
        } => {
            state.status.apply(*kind, *duration, *magnitude);
            EffectResult::Applied {
                delta: *duration as i32,
            }
        }
        Effect::CureStatus { kind } => {
            if state.status.cure(*kind) {
                EffectResult::Applied { delta: -1 }
            } else {
                EffectResult::NoChange
            }
        }
        Effect::LoseBodyPart { part } => {
            if !state.body.lose(*part) {
                return EffectResult::NoChange;
            }
            let dropped = state.release_held_items();
            if dropped.is_empty() {
                EffectResult::Applied { delta: -1 }
            } else {
                EffectResult::Dropped { items: dropped }
            }
        }
        Effect::DamageEquipment { slot, amount } => {
            let before = state.equipment.durability(*slot);
            match (before, state.equipment.wear(*slot, *amount)) {
                (Some(before), Some(after)) => changed(after as i32 - before as i32),
                _ => EffectResult::NoChange,
            }
        }
    }
}

fn changed(delta: i32) -> EffectResult {
    if delta == 0 {
        EffectResult::NoChange
    } else {
        EffectResult::Applied { delta }
    }
}
