//! Player state: stats, vitals, inventory, equipment, body.
//!
//! `PlayerState` is owned by the session driver and passed explicitly to
//! every operation that reads or mutates it. Everything needed to replay
//! play exactly (turn counter, history, roll seed) lives here so a
//! checkpoint of this struct is a complete snapshot.

use crate::dice;
use crate::effects::{self, EffectLog};
use crate::items::{ItemCatalog, ItemKind};
use crate::status::{StatusEffects, StatusKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Full durability percentage.
pub const MAX_DURABILITY: u8 = 100;

/// Errors from local state operations. The action is rejected and the
/// state left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Item not found in inventory: {0}")]
    ItemNotFound(ItemId),

    #[error("Unknown item: {0}")]
    UnknownItem(ItemId),

    #[error("{item} cannot be equipped in the {slot} slot")]
    InvalidSlot { item: ItemId, slot: EquipSlot },

    #[error("{0} cannot be consumed")]
    NotConsumable(ItemId),

    #[error("Inventory full ({capacity} items)")]
    InventoryFull { capacity: u32 },

    #[error("Requires a missing body part: {0}")]
    BodyPartMissing(BodyPart),

    #[error("Nothing equipped in the {0} slot")]
    SlotEmpty(EquipSlot),

    #[error("The player is dead")]
    PlayerDead,
}

/// Identifier of a story node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of an item definition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Stats and vitals
// ============================================================================

/// Core stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stat {
    Strength,
    Agility,
    Mind,
}

impl Stat {
    pub fn name(&self) -> &'static str {
        match self {
            Stat::Strength => "Strength",
            Stat::Agility => "Agility",
            Stat::Mind => "Mind",
        }
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Core stat values. Unbounded upward, floored at zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub strength: i32,
    pub agility: i32,
    pub mind: i32,
}

impl Stats {
    pub fn get(&self, stat: Stat) -> i32 {
        match stat {
            Stat::Strength => self.strength,
            Stat::Agility => self.agility,
            Stat::Mind => self.mind,
        }
    }

    pub fn adjust(&mut self, stat: Stat, delta: i32) {
        let value = match stat {
            Stat::Strength => &mut self.strength,
            Stat::Agility => &mut self.agility,
            Stat::Mind => &mut self.mind,
        };
        *value = value.saturating_add(delta).max(0);
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            strength: 5,
            agility: 5,
            mind: 5,
        }
    }
}

/// Survival vitals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vital {
    Health,
    MaxHealth,
    Stamina,
    Hunger,
    Wetness,
    Temperature,
    Sanity,
    Fear,
}

/// Upper bound for every percentage-style vital.
pub const VITAL_CAP: i32 = 100;

/// Vital values. Health stays within `[0, max_health]`; the rest within
/// `[0, 100]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vitals {
    pub health: i32,
    pub max_health: i32,
    pub stamina: i32,
    pub hunger: i32,
    pub wetness: i32,
    pub temperature: i32,
    pub sanity: i32,
    pub fear: i32,
}

impl Vitals {
    pub fn get(&self, vital: Vital) -> i32 {
        match vital {
            Vital::Health => self.health,
            Vital::MaxHealth => self.max_health,
            Vital::Stamina => self.stamina,
            Vital::Hunger => self.hunger,
            Vital::Wetness => self.wetness,
            Vital::Temperature => self.temperature,
            Vital::Sanity => self.sanity,
            Vital::Fear => self.fear,
        }
    }

    /// Adjust a vital by `delta`, clamping to its bounds. Returns the
    /// change actually applied.
    pub fn adjust(&mut self, vital: Vital, delta: i32) -> i32 {
        let before = self.get(vital);
        match vital {
            Vital::Health => {
                self.health = self.health.saturating_add(delta).clamp(0, self.max_health);
            }
            Vital::MaxHealth => {
                self.max_health = self.max_health.saturating_add(delta).max(1);
                self.health = self.health.min(self.max_health);
            }
            Vital::Stamina => self.stamina = clamp_pct(self.stamina, delta),
            Vital::Hunger => self.hunger = clamp_pct(self.hunger, delta),
            Vital::Wetness => self.wetness = clamp_pct(self.wetness, delta),
            Vital::Temperature => self.temperature = clamp_pct(self.temperature, delta),
            Vital::Sanity => self.sanity = clamp_pct(self.sanity, delta),
            Vital::Fear => self.fear = clamp_pct(self.fear, delta),
        }
        self.get(vital) - before
    }

    /// Set a vital to an absolute value, clamped.
    pub fn set(&mut self, vital: Vital, value: i32) {
        let current = self.get(vital);
        self.adjust(vital, value.saturating_sub(current));
    }

    pub fn is_dead(&self) -> bool {
        self.health <= 0
    }
}

fn clamp_pct(value: i32, delta: i32) -> i32 {
    value.saturating_add(delta).clamp(0, VITAL_CAP)
}

impl Default for Vitals {
    fn default() -> Self {
        // Soaked and chilled in a flooding cell.
        Self {
            health: 60,
            max_health: 100,
            stamina: 50,
            hunger: 30,
            wetness: 80,
            temperature: 40,
            sanity: 70,
            fear: 0,
        }
    }
}

// ============================================================================
// Body
// ============================================================================

/// Body parts that can be lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyPart {
    LeftArm,
    RightArm,
    LeftLeg,
    RightLeg,
    Eyes,
}

impl BodyPart {
    pub fn all() -> [BodyPart; 5] {
        [
            BodyPart::LeftArm,
            BodyPart::RightArm,
            BodyPart::LeftLeg,
            BodyPart::RightLeg,
            BodyPart::Eyes,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BodyPart::LeftArm => "left arm",
            BodyPart::RightArm => "right arm",
            BodyPart::LeftLeg => "left leg",
            BodyPart::RightLeg => "right leg",
            BodyPart::Eyes => "eyes",
        }
    }
}

impl fmt::Display for BodyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Presence map for body parts. Loss is permanent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    parts: BTreeMap<BodyPart, bool>,
}

impl Body {
    pub fn has(&self, part: BodyPart) -> bool {
        self.parts.get(&part).copied().unwrap_or(false)
    }

    /// Mark a part missing. Returns true if it was present.
    pub fn lose(&mut self, part: BodyPart) -> bool {
        let was_present = self.has(part);
        self.parts.insert(part, false);
        was_present
    }

    pub fn arms(&self) -> usize {
        [BodyPart::LeftArm, BodyPart::RightArm]
            .iter()
            .filter(|p| self.has(**p))
            .count()
    }

    pub fn legs(&self) -> usize {
        [BodyPart::LeftLeg, BodyPart::RightLeg]
            .iter()
            .filter(|p| self.has(**p))
            .count()
    }

    pub fn has_arm(&self) -> bool {
        self.arms() > 0
    }

    pub fn can_see(&self) -> bool {
        self.has(BodyPart::Eyes)
    }

    pub fn missing(&self) -> Vec<BodyPart> {
        BodyPart::all().into_iter().filter(|p| !self.has(*p)).collect()
    }
}

impl Default for Body {
    fn default() -> Self {
        Self {
            parts: BodyPart::all().into_iter().map(|p| (p, true)).collect(),
        }
    }
}

// ============================================================================
// Inventory and equipment
// ============================================================================

/// Carried items with counts. The capacity bounds the total unit count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    items: BTreeMap<ItemId, u32>,
    capacity: u32,
}

impl Inventory {
    pub fn new(capacity: u32) -> Self {
        Self {
            items: BTreeMap::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn total(&self) -> u32 {
        self.items.values().sum()
    }

    pub fn free(&self) -> u32 {
        self.capacity.saturating_sub(self.total())
    }

    pub fn count(&self, item: &ItemId) -> u32 {
        self.items.get(item).copied().unwrap_or(0)
    }

    pub fn has(&self, item: &ItemId) -> bool {
        self.count(item) > 0
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ItemId, u32)> {
        self.items.iter().map(|(id, count)| (id, *count))
    }

    /// Add `count` units. Fails without change if they do not all fit.
    pub fn add(&mut self, item: ItemId, count: u32) -> Result<(), StateError> {
        if count > self.free() {
            return Err(StateError::InventoryFull {
                capacity: self.capacity,
            });
        }
        if count > 0 {
            *self.items.entry(item).or_insert(0) += count;
        }
        Ok(())
    }

    /// Remove `count` units. Fails without change if fewer are held.
    pub fn remove(&mut self, item: &ItemId, count: u32) -> Result<(), StateError> {
        let held = self.count(item);
        if held < count || held == 0 {
            return Err(StateError::ItemNotFound(item.clone()));
        }
        if held == count {
            self.items.remove(item);
        } else {
            self.items.insert(item.clone(), held - count);
        }
        Ok(())
    }

    /// Remove up to `count` units, returning how many were removed.
    pub fn remove_up_to(&mut self, item: &ItemId, count: u32) -> u32 {
        let removed = self.count(item).min(count);
        if removed > 0 {
            // Cannot fail: removed <= held.
            let _ = self.remove(item, removed);
        }
        removed
    }
}

/// Equipment slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipSlot {
    Weapon,
    Armor,
    Light,
    Offhand,
    Accessory,
}

impl EquipSlot {
    pub fn all() -> [EquipSlot; 5] {
        [
            EquipSlot::Weapon,
            EquipSlot::Armor,
            EquipSlot::Light,
            EquipSlot::Offhand,
            EquipSlot::Accessory,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            EquipSlot::Weapon => "weapon",
            EquipSlot::Armor => "armor",
            EquipSlot::Light => "light",
            EquipSlot::Offhand => "offhand",
            EquipSlot::Accessory => "accessory",
        }
    }

    /// Slots that need a hand to hold.
    pub fn needs_hand(&self) -> bool {
        matches!(self, EquipSlot::Weapon | EquipSlot::Offhand | EquipSlot::Light)
    }
}

impl fmt::Display for EquipSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An item sitting in an equipment slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquippedItem {
    pub item: ItemId,
    /// Durability percentage, 0-100.
    pub durability: u8,
}

impl EquippedItem {
    pub fn new(item: ItemId) -> Self {
        Self {
            item,
            durability: MAX_DURABILITY,
        }
    }

    /// Broken items stay in the slot but contribute nothing.
    pub fn is_broken(&self) -> bool {
        self.durability == 0
    }
}

/// Slot-to-item mapping, plus the remembered wear of items that were
/// unequipped so swapping gear does not repair it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    slots: BTreeMap<EquipSlot, EquippedItem>,
    #[serde(default)]
    stored_wear: BTreeMap<ItemId, u8>,
}

impl Equipment {
    pub fn get(&self, slot: EquipSlot) -> Option<&EquippedItem> {
        self.slots.get(&slot)
    }

    /// The item in a slot if it is still functional.
    pub fn working(&self, slot: EquipSlot) -> Option<&EquippedItem> {
        self.get(slot).filter(|e| !e.is_broken())
    }

    pub fn durability(&self, slot: EquipSlot) -> Option<u8> {
        self.get(slot).map(|e| e.durability)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EquipSlot, &EquippedItem)> {
        self.slots.iter().map(|(slot, item)| (*slot, item))
    }

    fn put(&mut self, slot: EquipSlot, item: ItemId) -> Option<EquippedItem> {
        let durability = self.stored_wear.remove(&item).unwrap_or(MAX_DURABILITY);
        self.slots.insert(slot, EquippedItem { item, durability })
    }

    fn take(&mut self, slot: EquipSlot) -> Option<EquippedItem> {
        let removed = self.slots.remove(&slot)?;
        if removed.durability < MAX_DURABILITY {
            self.stored_wear.insert(removed.item.clone(), removed.durability);
        }
        Some(removed)
    }

    /// Reduce durability of every equipped item by `amount`, floored at 0.
    pub fn wear_all(&mut self, amount: u8) {
        for equipped in self.slots.values_mut() {
            equipped.durability = equipped.durability.saturating_sub(amount);
        }
    }

    /// Reduce durability of one slot. Returns the new durability.
    pub fn wear(&mut self, slot: EquipSlot, amount: u8) -> Option<u8> {
        let equipped = self.slots.get_mut(&slot)?;
        equipped.durability = equipped.durability.saturating_sub(amount);
        Some(equipped.durability)
    }
}

// ============================================================================
// Capabilities and death
// ============================================================================

/// Next-turn capability flags derived from status effects each tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// False while stunned.
    pub can_act: bool,
    /// Added to agility for combat rolls (negative when slowed).
    pub agility_modifier: i32,
    /// Extra critical chance percentage (hasted).
    pub crit_bonus: i32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            can_act: true,
            agility_modifier: 0,
            crit_bonus: 0,
        }
    }
}

/// Why the player died. Exactly one cause is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeathCause {
    Combat { enemy: String },
    Hazard { source: String },
    Status { kind: StatusKind },
    Starvation,
    Madness,
    Hypothermia,
    TimeExpired { scenario: String },
    Story { node: NodeId },
}

impl DeathCause {
    /// Proximate causes outrank accumulated decay.
    pub fn is_proximate(&self) -> bool {
        !matches!(
            self,
            DeathCause::Starvation | DeathCause::Madness | DeathCause::Hypothermia
        )
    }
}

impl fmt::Display for DeathCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeathCause::Combat { enemy } => write!(f, "killed by {enemy}"),
            DeathCause::Hazard { source } => write!(f, "killed by {source}"),
            DeathCause::Status { kind } => write!(f, "succumbed to {}", kind.name()),
            DeathCause::Starvation => write!(f, "starved"),
            DeathCause::Madness => write!(f, "lost to madness"),
            DeathCause::Hypothermia => write!(f, "froze to death"),
            DeathCause::TimeExpired { scenario } => write!(f, "ran out of time in {scenario}"),
            DeathCause::Story { node } => write!(f, "met their end at {node}"),
        }
    }
}

// ============================================================================
// PlayerState
// ============================================================================

/// The complete mutable state of one playthrough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    pub stats: Stats,
    pub vitals: Vitals,
    pub inventory: Inventory,
    pub equipment: Equipment,
    pub status: StatusEffects,
    pub body: Body,
    pub flags: BTreeSet<String>,
    pub capabilities: Capabilities,
    pub current_node: NodeId,
    /// Visited nodes in order, including revisits.
    pub history: Vec<NodeId>,
    /// Completed ticks.
    pub turn: u32,
    /// Consecutive ticks spent below the hypothermia threshold.
    pub cold_ticks: u32,
    /// Seed for the next random draw.
    pub roll_seed: u64,
    pub death: Option<DeathCause>,
}

impl PlayerState {
    /// Fresh starting state at `start`.
    pub fn new_game(start: NodeId, inventory_capacity: u32, seed: u64) -> Self {
        Self {
            stats: Stats::default(),
            vitals: Vitals::default(),
            inventory: Inventory::new(inventory_capacity),
            equipment: Equipment::default(),
            status: StatusEffects::default(),
            body: Body::default(),
            flags: BTreeSet::new(),
            capabilities: Capabilities::default(),
            history: vec![start.clone()],
            current_node: start,
            turn: 0,
            cold_ticks: 0,
            roll_seed: seed,
            death: None,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.death.is_some() || self.vitals.is_dead()
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    pub fn has_visited(&self, node: &NodeId) -> bool {
        self.history.contains(node)
    }

    /// Record a move to `node`.
    pub fn visit(&mut self, node: NodeId) {
        self.history.push(node.clone());
        self.current_node = node;
    }

    /// Record a death unless one is already recorded.
    pub fn record_death(&mut self, cause: DeathCause) {
        if self.death.is_none() {
            self.death = Some(cause);
        }
    }

    /// Take the current roll seed and advance it.
    pub fn next_roll_seed(&mut self) -> u64 {
        let seed = self.roll_seed;
        self.roll_seed = dice::advance_seed(seed);
        seed
    }

    /// Effective agility including status modifiers, floored at zero.
    pub fn effective_agility(&self) -> i32 {
        (self.stats.agility + self.capabilities.agility_modifier).max(0)
    }

    /// Whether the player can carry or use an item: held in inventory or
    /// equipped in any slot.
    pub fn possesses(&self, item: &ItemId) -> bool {
        self.inventory.has(item)
            || self
                .equipment
                .iter()
                .any(|(_, equipped)| &equipped.item == item)
    }

    /// Equip an inventory item into `slot`. The previous occupant goes back
    /// to the inventory.
    pub fn equip(
        &mut self,
        catalog: &ItemCatalog,
        item: &ItemId,
        slot: EquipSlot,
    ) -> Result<Option<ItemId>, StateError> {
        let def = catalog.require(item)?;
        if !self.inventory.has(item) {
            return Err(StateError::ItemNotFound(item.clone()));
        }
        if def.kind.slot() != Some(slot) {
            return Err(StateError::InvalidSlot {
                item: item.clone(),
                slot,
            });
        }
        if slot.needs_hand() && !self.body.has_arm() {
            return Err(StateError::BodyPartMissing(BodyPart::RightArm));
        }

        // Removing one unit frees room for the returning item.
        let mut inventory = self.inventory.clone();
        inventory.remove(item, 1)?;
        let mut equipment = self.equipment.clone();
        let previous = equipment.take(slot);
        if let Some(prev) = &previous {
            inventory.add(prev.item.clone(), 1)?;
        }
        equipment.put(slot, item.clone());

        self.inventory = inventory;
        self.equipment = equipment;
        Ok(previous.map(|p| p.item))
    }

    /// Move the item in `slot` back to the inventory.
    pub fn unequip(&mut self, slot: EquipSlot) -> Result<ItemId, StateError> {
        let Some(current) = self.equipment.get(slot) else {
            return Err(StateError::SlotEmpty(slot));
        };
        let item = current.item.clone();
        self.inventory.add(item.clone(), 1)?;
        self.equipment.take(slot);
        Ok(item)
    }

    /// Use up one consumable and apply its effects.
    pub fn consume_item(
        &mut self,
        catalog: &ItemCatalog,
        item: &ItemId,
    ) -> Result<EffectLog, StateError> {
        if self.is_dead() {
            return Err(StateError::PlayerDead);
        }
        if !self.inventory.has(item) {
            return Err(StateError::ItemNotFound(item.clone()));
        }
        let def = catalog.require(item)?;
        if !def.is_consumable() {
            return Err(StateError::NotConsumable(item.clone()));
        }
        self.inventory.remove(item, 1)?;
        Ok(effects::apply_effects(self, &def.use_effects))
    }

    /// Discard items from the inventory.
    pub fn drop_item(&mut self, item: &ItemId, count: u32) -> Result<(), StateError> {
        self.inventory.remove(item, count)
    }

    /// Remove held items when no arm remains. Items go to the inventory
    /// while it has room and are dropped otherwise. Returns dropped items.
    pub(crate) fn release_held_items(&mut self) -> Vec<ItemId> {
        if self.body.has_arm() {
            return Vec::new();
        }
        let mut dropped = Vec::new();
        for slot in EquipSlot::all().into_iter().filter(|s| s.needs_hand()) {
            if let Some(held) = self.equipment.take(slot) {
                if self.inventory.add(held.item.clone(), 1).is_err() {
                    dropped.push(held.item);
                }
            }
        }
        dropped
    }

    /// Weapon bonus, zero when unarmed or the weapon is broken.
    pub fn weapon_bonus(&self, catalog: &ItemCatalog) -> i32 {
        self.slot_bonus(catalog, EquipSlot::Weapon)
    }

    /// Armor bonus, zero when none or broken.
    pub fn armor_bonus(&self, catalog: &ItemCatalog) -> i32 {
        self.slot_bonus(catalog, EquipSlot::Armor)
    }

    /// Bonus from the item in a slot. Broken items count as unequipped.
    pub fn slot_bonus(&self, catalog: &ItemCatalog, slot: EquipSlot) -> i32 {
        self.equipment
            .working(slot)
            .and_then(|e| catalog.get(&e.item))
            .map(|def| def.bonus)
            .unwrap_or(0)
    }

    /// Whether a working light source is held.
    pub fn has_light(&self, catalog: &ItemCatalog) -> bool {
        self.equipment
            .working(EquipSlot::Light)
            .and_then(|e| catalog.get(&e.item))
            .map(|def| def.kind == ItemKind::Light)
            .unwrap_or(false)
    }

    /// Whether a working ranged weapon is equipped.
    pub fn has_ranged_weapon(&self, catalog: &ItemCatalog) -> bool {
        self.equipment
            .working(EquipSlot::Weapon)
            .and_then(|e| catalog.get(&e.item))
            .map(|def| def.ranged)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> PlayerState {
        PlayerState::new_game(NodeId::from("start"), 10, 7)
    }

    #[test]
    fn test_new_game_values() {
        let state = fresh();
        assert_eq!(state.vitals.health, 60);
        assert_eq!(state.vitals.max_health, 100);
        assert_eq!(state.vitals.wetness, 80);
        assert_eq!(state.stats, Stats::default());
        assert_eq!(state.history, vec![NodeId::from("start")]);
        assert!(BodyPart::all().iter().all(|p| state.body.has(*p)));
        assert!(!state.is_dead());
    }

    #[test]
    fn test_health_clamped() {
        let mut vitals = Vitals::default();
        assert_eq!(vitals.adjust(Vital::Health, 500), 40);
        assert_eq!(vitals.health, 100);
        assert_eq!(vitals.adjust(Vital::Health, -1000), -100);
        assert_eq!(vitals.health, 0);
        assert!(vitals.is_dead());
    }

    #[test]
    fn test_max_health_drop_pulls_health_down() {
        let mut vitals = Vitals::default();
        vitals.set(Vital::Health, 90);
        vitals.adjust(Vital::MaxHealth, -30);
        assert_eq!(vitals.max_health, 70);
        assert_eq!(vitals.health, 70);
    }

    #[test]
    fn test_percent_vitals_capped() {
        let mut vitals = Vitals::default();
        vitals.adjust(Vital::Hunger, 200);
        vitals.adjust(Vital::Sanity, -200);
        assert_eq!(vitals.hunger, 100);
        assert_eq!(vitals.sanity, 0);
    }

    #[test]
    fn test_stats_floor_at_zero() {
        let mut stats = Stats::default();
        stats.adjust(Stat::Mind, -20);
        stats.adjust(Stat::Strength, 40);
        assert_eq!(stats.mind, 0);
        assert_eq!(stats.strength, 45);
    }

    #[test]
    fn test_inventory_capacity_counts_units() {
        let mut inv = Inventory::new(3);
        inv.add(ItemId::from("copper_coins"), 2).unwrap();
        assert!(matches!(
            inv.add(ItemId::from("shiv"), 2),
            Err(StateError::InventoryFull { capacity: 3 })
        ));
        assert_eq!(inv.total(), 2);
        inv.add(ItemId::from("shiv"), 1).unwrap();
        assert_eq!(inv.free(), 0);
    }

    #[test]
    fn test_inventory_remove() {
        let mut inv = Inventory::new(10);
        let coins = ItemId::from("copper_coins");
        inv.add(coins.clone(), 3).unwrap();
        inv.remove(&coins, 2).unwrap();
        assert_eq!(inv.count(&coins), 1);
        assert!(inv.remove(&coins, 2).is_err());
        assert_eq!(inv.count(&coins), 1);
        inv.remove(&coins, 1).unwrap();
        assert!(!inv.has(&coins));
        assert!(inv.is_empty());
    }

    #[test]
    fn test_equip_swaps_previous() {
        let catalog = ItemCatalog::standard();
        let mut state = fresh();
        state.inventory.add(ItemId::from("shiv"), 1).unwrap();
        state.inventory.add(ItemId::from("guard_sword"), 1).unwrap();

        let prev = state
            .equip(&catalog, &ItemId::from("shiv"), EquipSlot::Weapon)
            .unwrap();
        assert_eq!(prev, None);
        let prev = state
            .equip(&catalog, &ItemId::from("guard_sword"), EquipSlot::Weapon)
            .unwrap();
        assert_eq!(prev, Some(ItemId::from("shiv")));
        assert!(state.inventory.has(&ItemId::from("shiv")));
        assert!(!state.inventory.has(&ItemId::from("guard_sword")));
    }

    #[test]
    fn test_equip_wrong_slot() {
        let catalog = ItemCatalog::standard();
        let mut state = fresh();
        state.inventory.add(ItemId::from("moldy_bread"), 1).unwrap();
        let before = state.clone();
        let err = state.equip(&catalog, &ItemId::from("moldy_bread"), EquipSlot::Weapon);
        assert!(matches!(err, Err(StateError::InvalidSlot { .. })));
        assert_eq!(state, before);
    }

    #[test]
    fn test_equip_missing_item() {
        let catalog = ItemCatalog::standard();
        let mut state = fresh();
        let err = state.equip(&catalog, &ItemId::from("shiv"), EquipSlot::Weapon);
        assert_eq!(err, Err(StateError::ItemNotFound(ItemId::from("shiv"))));
    }

    #[test]
    fn test_equip_weapon_without_arms() {
        let catalog = ItemCatalog::standard();
        let mut state = fresh();
        state.inventory.add(ItemId::from("shiv"), 1).unwrap();
        state.body.lose(BodyPart::LeftArm);
        state.body.lose(BodyPart::RightArm);
        let err = state.equip(&catalog, &ItemId::from("shiv"), EquipSlot::Weapon);
        assert!(matches!(err, Err(StateError::BodyPartMissing(_))));
        // Armor does not need hands.
        state.inventory.add(ItemId::from("leather_jerkin"), 1).unwrap();
        assert!(state
            .equip(&catalog, &ItemId::from("leather_jerkin"), EquipSlot::Armor)
            .is_ok());
    }

    #[test]
    fn test_unequip_keeps_wear() {
        let catalog = ItemCatalog::standard();
        let mut state = fresh();
        let shiv = ItemId::from("shiv");
        state.inventory.add(shiv.clone(), 1).unwrap();
        state.equip(&catalog, &shiv, EquipSlot::Weapon).unwrap();
        state.equipment.wear_all(30);

        assert_eq!(state.unequip(EquipSlot::Weapon).unwrap(), shiv);
        assert!(state.equipment.get(EquipSlot::Weapon).is_none());
        state.equip(&catalog, &shiv, EquipSlot::Weapon).unwrap();
        assert_eq!(state.equipment.durability(EquipSlot::Weapon), Some(70));

        assert_eq!(
            state.unequip(EquipSlot::Armor),
            Err(StateError::SlotEmpty(EquipSlot::Armor))
        );
    }

    #[test]
    fn test_broken_weapon_gives_no_bonus() {
        let catalog = ItemCatalog::standard();
        let mut state = fresh();
        let sword = ItemId::from("guard_sword");
        state.inventory.add(sword.clone(), 1).unwrap();
        state.equip(&catalog, &sword, EquipSlot::Weapon).unwrap();
        assert!(state.weapon_bonus(&catalog) > 0);

        state.equipment.wear_all(MAX_DURABILITY);
        assert_eq!(state.weapon_bonus(&catalog), 0);
        // Still shown in the slot as broken.
        assert!(state.equipment.get(EquipSlot::Weapon).unwrap().is_broken());
    }

    #[test]
    fn test_release_held_items_when_armless() {
        let catalog = ItemCatalog::standard();
        let mut state = fresh();
        state.inventory.add(ItemId::from("shiv"), 1).unwrap();
        state
            .equip(&catalog, &ItemId::from("shiv"), EquipSlot::Weapon)
            .unwrap();
        state.body.lose(BodyPart::LeftArm);
        assert!(state.release_held_items().is_empty());
        assert!(state.equipment.get(EquipSlot::Weapon).is_some());

        state.body.lose(BodyPart::RightArm);
        assert!(state.release_held_items().is_empty());
        assert!(state.equipment.get(EquipSlot::Weapon).is_none());
        assert!(state.inventory.has(&ItemId::from("shiv")));
    }

    #[test]
    fn test_consume_item() {
        let catalog = ItemCatalog::standard();
        let mut state = fresh();
        let herbs = ItemId::from("healing_herbs");
        state.inventory.add(herbs.clone(), 1).unwrap();
        state.status.apply(StatusKind::Poisoned, 4, 2);

        let log = state.consume_item(&catalog, &herbs).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(state.vitals.health, 80);
        assert!(!state.status.has(StatusKind::Poisoned));
        assert!(!state.inventory.has(&herbs));

        assert_eq!(
            state.consume_item(&catalog, &herbs),
            Err(StateError::ItemNotFound(herbs))
        );
    }

    #[test]
    fn test_consume_non_consumable() {
        let catalog = ItemCatalog::standard();
        let mut state = fresh();
        state.inventory.add(ItemId::from("torch"), 1).unwrap();
        let before = state.clone();
        assert_eq!(
            state.consume_item(&catalog, &ItemId::from("torch")),
            Err(StateError::NotConsumable(ItemId::from("torch")))
        );
        assert_eq!(state, before);
    }

    #[test]
    fn test_roll_seed_advances() {
        let mut state = fresh();
        let first = state.next_roll_seed();
        let second = state.next_roll_seed();
        assert_eq!(first, 7);
        assert_ne!(first, second);
    }

    #[test]
    fn test_record_death_keeps_first() {
        let mut state = fresh();
        state.record_death(DeathCause::Combat {
            enemy: "ghoul".into(),
        });
        state.record_death(DeathCause::Starvation);
        assert_eq!(
            state.death,
            Some(DeathCause::Combat {
                enemy: "ghoul".into()
            })
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut state = fresh();
        state.flags.insert("saw_corpse".into());
        state.inventory.add(ItemId::from("tinderbox"), 1).unwrap();
        let json = serde_json::to_string(&state).unwrap();
        let back: PlayerState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }
}
