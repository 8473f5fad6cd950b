//! Item definitions and the standard dungeon catalog.
//!
//! Story content references items by id; the catalog maps ids to their kind,
//! slot, combat bonuses, and use effects. Content may add items on top of the
//! standard set.

use crate::effects::Effect;
use crate::state::{EquipSlot, ItemId, StateError, Vital};
use crate::status::StatusKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Broad item category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Weapon,
    Armor,
    Light,
    Offhand,
    Accessory,
    Consumable,
    Key,
    Misc,
}

impl ItemKind {
    /// The slot this kind equips into, if any.
    pub fn slot(&self) -> Option<EquipSlot> {
        match self {
            ItemKind::Weapon => Some(EquipSlot::Weapon),
            ItemKind::Armor => Some(EquipSlot::Armor),
            ItemKind::Light => Some(EquipSlot::Light),
            ItemKind::Offhand => Some(EquipSlot::Offhand),
            ItemKind::Accessory => Some(EquipSlot::Accessory),
            ItemKind::Consumable | ItemKind::Key | ItemKind::Misc => None,
        }
    }
}

/// A single item definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDef {
    pub id: ItemId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: ItemKind,
    /// Damage bonus for weapons, damage reduction for armor.
    #[serde(default)]
    pub bonus: i32,
    /// Extra critical chance percentage.
    #[serde(default)]
    pub crit_bonus: i32,
    /// Usable without arms at range.
    #[serde(default)]
    pub ranged: bool,
    /// Effects applied when consumed.
    #[serde(default)]
    pub use_effects: Vec<Effect>,
}

impl ItemDef {
    pub fn new(id: &str, name: &str, kind: ItemKind) -> Self {
        Self {
            id: ItemId::from(id),
            name: name.to_string(),
            description: String::new(),
            kind,
            bonus: 0,
            crit_bonus: 0,
            ranged: false,
            use_effects: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_bonus(mut self, bonus: i32) -> Self {
        self.bonus = bonus;
        self
    }

    pub fn with_crit_bonus(mut self, crit_bonus: i32) -> Self {
        self.crit_bonus = crit_bonus;
        self
    }

    pub fn ranged(mut self) -> Self {
        self.ranged = true;
        self
    }

    pub fn with_use_effects(mut self, effects: Vec<Effect>) -> Self {
        self.use_effects = effects;
        self
    }

    pub fn is_consumable(&self) -> bool {
        self.kind == ItemKind::Consumable
    }
}

lazy_static::lazy_static! {
    /// Items found in the flooded prison level.
    pub static ref STANDARD_ITEMS: Vec<ItemDef> = vec![
        // Tools
        ItemDef::new("tinderbox", "Tinderbox", ItemKind::Misc)
            .with_description("Flint and a scrap of dry tinder wrapped in oilcloth."),
        ItemDef::new("torch", "Torch", ItemKind::Light)
            .with_description("Pitch-soaked rags on a stick."),
        ItemDef::new("cell_key", "Cell Key", ItemKind::Key)
            .with_description("A heavy iron key stamped with a cell number."),
        ItemDef::new("copper_coins", "Copper Coins", ItemKind::Misc)
            .with_description("Green with age."),

        // Weapons
        ItemDef::new("rusty_chain", "Rusty Chain", ItemKind::Weapon)
            .with_description("A length of shackle chain, still heavy enough to hurt.")
            .with_bonus(3),
        ItemDef::new("shiv", "Bone Shiv", ItemKind::Weapon)
            .with_description("A sharpened sliver of bone.")
            .with_bonus(4)
            .with_crit_bonus(10),
        ItemDef::new("guard_sword", "Guard's Sword", ItemKind::Weapon)
            .with_description("Standard issue, notched but sound.")
            .with_bonus(10),
        ItemDef::new("sling", "Sling", ItemKind::Weapon)
            .with_description("Leather strap and a pouch of river stones.")
            .with_bonus(5)
            .ranged(),

        // Armor
        ItemDef::new("leather_jerkin", "Leather Jerkin", ItemKind::Armor)
            .with_description("Stiff with old sweat.")
            .with_bonus(2),

        // Consumables
        ItemDef::new("moldy_bread", "Moldy Bread", ItemKind::Consumable)
            .with_description("More green than brown.")
            .with_use_effects(vec![
                Effect::AdjustVital { vital: Vital::Hunger, delta: -20 },
                Effect::ApplyStatus { kind: StatusKind::Poisoned, duration: 3, magnitude: 2 },
            ]),
        ItemDef::new("rat_meat", "Raw Rat Meat", ItemKind::Consumable)
            .with_description("You would rather not think about it.")
            .with_use_effects(vec![
                Effect::AdjustVital { vital: Vital::Hunger, delta: -25 },
                Effect::AdjustVital { vital: Vital::Sanity, delta: -5 },
            ]),
        ItemDef::new("healing_herbs", "Healing Herbs", ItemKind::Consumable)
            .with_description("Bitter leaves that numb the tongue.")
            .with_use_effects(vec![
                Effect::Heal { amount: 20 },
                Effect::CureStatus { kind: StatusKind::Poisoned },
            ]),
        ItemDef::new("bandage", "Bandage", ItemKind::Consumable)
            .with_description("A strip of cleanish linen.")
            .with_use_effects(vec![
                Effect::CureStatus { kind: StatusKind::Bleeding },
                Effect::Heal { amount: 5 },
            ]),
    ];
}

/// Lookup table from item id to definition.
#[derive(Debug, Clone, Default)]
pub struct ItemCatalog {
    items: HashMap<ItemId, ItemDef>,
}

impl ItemCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard dungeon items.
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        for item in STANDARD_ITEMS.iter() {
            catalog.insert(item.clone());
        }
        catalog
    }

    /// Add or replace a definition.
    pub fn insert(&mut self, item: ItemDef) {
        self.items.insert(item.id.clone(), item);
    }

    pub fn get(&self, id: &ItemId) -> Option<&ItemDef> {
        self.items.get(id)
    }

    /// Look up an item, failing with `UnknownItem`.
    pub fn require(&self, id: &ItemId) -> Result<&ItemDef, StateError> {
        self.get(id).ok_or_else(|| StateError::UnknownItem(id.clone()))
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.items.contains_key(id)
    }

    /// Display name, falling back to the id.
    pub fn name_of(&self, id: &ItemId) -> String {
        self.get(id)
            .map(|def| def.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
