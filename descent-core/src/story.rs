//! The story graph: nodes, gated choices, and traversal.
//!
//! Nodes live in an id-indexed arena and reference each other only by
//! [`NodeId`]. Every reference is checked when the graph is built, so a
//! loaded graph never contains a dangling edge. Two reserved nodes always
//! exist: [`DEAD_END`] and the diagnostic terminal used when an unknown id is
//! requested at runtime.

use crate::combat::Encounter;
use crate::effects::{self, Effect, EffectLog};
use crate::items::{ItemCatalog, ItemDef};
use crate::state::{BodyPart, ItemId, NodeId, PlayerState, Stat};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

/// Reserved target for paths that simply end.
pub const DEAD_END: &str = "deadEnd";

/// Reserved terminal reached when content asks for a node that does not exist.
pub const DIAGNOSTIC_NODE: &str = "__diagnostic__";

/// Errors from loading or querying the story graph.
#[derive(Debug, Error)]
pub enum StoryError {
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(NodeId),

    #[error("Node {from} references missing node {to}")]
    DanglingReference { from: NodeId, to: NodeId },

    #[error("Node {node} references unknown item {item}")]
    UnknownItem { node: NodeId, item: ItemId },

    #[error("Start node {0} does not exist")]
    MissingStart(NodeId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// How an ending resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ending {
    Survival,
    Death,
    /// Content error routed to a safe terminal.
    Diagnostic,
}

/// Item, stat, flag, and body predicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Requirements {
    /// Items that must be carried or equipped.
    pub items: Vec<ItemId>,
    pub min_stats: BTreeMap<Stat, i32>,
    pub flags: Vec<String>,
    /// Flags that must not be set.
    pub absent_flags: Vec<String>,
    pub body_parts: Vec<BodyPart>,
}

/// A single failed requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Unmet {
    MissingItem { item: ItemId },
    StatTooLow { stat: Stat, required: i32, actual: i32 },
    MissingFlag { flag: String },
    ForbiddenFlag { flag: String },
    MissingBodyPart { part: BodyPart },
}

impl Requirements {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
            && self.min_stats.is_empty()
            && self.flags.is_empty()
            && self.absent_flags.is_empty()
            && self.body_parts.is_empty()
    }

    pub fn is_met(&self, state: &PlayerState) -> bool {
        self.unmet(state).is_empty()
    }

    /// Every requirement that does not hold, in declaration order.
    pub fn unmet(&self, state: &PlayerState) -> Vec<Unmet> {
        let mut unmet = Vec::new();
        for item in &self.items {
            if !state.possesses(item) {
                unmet.push(Unmet::MissingItem { item: item.clone() });
            }
        }
        for (stat, required) in &self.min_stats {
            let actual = state.stats.get(*stat);
            if actual < *required {
                unmet.push(Unmet::StatTooLow {
                    stat: *stat,
                    required: *required,
                    actual,
                });
            }
        }
        for flag in &self.flags {
            if !state.has_flag(flag) {
                unmet.push(Unmet::MissingFlag { flag: flag.clone() });
            }
        }
        for flag in &self.absent_flags {
            if state.has_flag(flag) {
                unmet.push(Unmet::ForbiddenFlag { flag: flag.clone() });
            }
        }
        for part in &self.body_parts {
            if !state.body.has(*part) {
                unmet.push(Unmet::MissingBodyPart { part: *part });
            }
        }
        unmet
    }
}

/// A percentile check against a stat. Failure diverts to `on_failure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatCheck {
    pub stat: Stat,
    #[serde(default = "default_chance_per_point")]
    pub chance_per_point: i32,
    #[serde(default = "default_max_chance")]
    pub max_chance: i32,
    pub on_failure: NodeId,
}

fn default_chance_per_point() -> i32 {
    10
}

fn default_max_chance() -> i32 {
    95
}

impl StatCheck {
    /// Success chance for a given stat value.
    pub fn chance(&self, stat_value: i32) -> i32 {
        stat_value
            .saturating_mul(self.chance_per_point)
            .clamp(0, self.max_chance.min(100))
    }
}

/// A gated transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub label: String,
    pub next: NodeId,
    #[serde(default)]
    pub requirements: Requirements,
    /// Items removed on selection. Holding them is implied.
    #[serde(default)]
    pub consumes: Vec<ItemId>,
    /// Applied after consumes, before the transition.
    #[serde(default)]
    pub effects: Vec<Effect>,
    #[serde(default)]
    pub check: Option<StatCheck>,
    /// Selecting this choice starts a fight; `next` is reached on victory.
    #[serde(default)]
    pub combat: Option<Encounter>,
}

impl Choice {
    pub fn new(label: impl Into<String>, next: &str) -> Self {
        Self {
            label: label.into(),
            next: NodeId::from(next),
            requirements: Requirements::default(),
            consumes: Vec::new(),
            effects: Vec::new(),
            check: None,
            combat: None,
        }
    }

    pub fn requiring_item(mut self, item: &str) -> Self {
        self.requirements.items.push(ItemId::from(item));
        self
    }

    pub fn requiring_stat(mut self, stat: Stat, min: i32) -> Self {
        self.requirements.min_stats.insert(stat, min);
        self
    }

    pub fn requiring_flag(mut self, flag: &str) -> Self {
        self.requirements.flags.push(flag.to_string());
        self
    }

    pub fn consuming(mut self, item: &str) -> Self {
        self.consumes.push(ItemId::from(item));
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_check(mut self, check: StatCheck) -> Self {
        self.check = Some(check);
        self
    }

    pub fn with_combat(mut self, encounter: Encounter) -> Self {
        self.combat = Some(encounter);
        self
    }

    /// Requirements not met by `state`, including consumed items not held.
    pub fn unmet(&self, state: &PlayerState) -> Vec<Unmet> {
        let mut unmet = self.requirements.unmet(state);
        for item in &self.consumes {
            if !state.inventory.has(item) && !unmet.contains(&Unmet::MissingItem { item: item.clone() }) {
                unmet.push(Unmet::MissingItem { item: item.clone() });
            }
        }
        unmet
    }

    fn targets(&self) -> Vec<&NodeId> {
        let mut targets = vec![&self.next];
        if let Some(check) = &self.check {
            targets.push(&check.on_failure);
        }
        if let Some(encounter) = &self.combat {
            targets.extend(encounter.flee_node.iter());
            targets.extend(encounter.defeat_node.iter());
        }
        targets
    }

    fn items(&self) -> impl Iterator<Item = &ItemId> {
        self.requirements
            .items
            .iter()
            .chain(self.consumes.iter())
            .chain(self.effects.iter().filter_map(effect_item))
    }
}

fn effect_item(effect: &Effect) -> Option<&ItemId> {
    match effect {
        Effect::GrantItem { item, .. } | Effect::RemoveItem { item, .. } => Some(item),
        _ => None,
    }
}

/// An action-budgeted stretch of the story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedScenario {
    pub id: String,
    /// Actions allowed before the clock runs out.
    pub budget: u32,
    /// Forced destination once the budget is exceeded.
    pub death_node: NodeId,
    /// Reaching any of these ends the scenario.
    pub exit_nodes: Vec<NodeId>,
}

/// A single narrative state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryNode {
    pub id: NodeId,
    pub text: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
    /// Gate on entering this node through any choice.
    #[serde(default)]
    pub requirements: Requirements,
    #[serde(default)]
    pub on_enter: Vec<Effect>,
    #[serde(default)]
    pub is_checkpoint: bool,
    #[serde(default)]
    pub ending: Option<Ending>,
    #[serde(default)]
    pub starts_scenario: Option<TimedScenario>,
}

impl StoryNode {
    pub fn new(id: &str, text: impl Into<String>) -> Self {
        Self {
            id: NodeId::from(id),
            text: text.into(),
            choices: Vec::new(),
            requirements: Requirements::default(),
            on_enter: Vec::new(),
            is_checkpoint: false,
            ending: None,
            starts_scenario: None,
        }
    }

    pub fn with_choice(mut self, choice: Choice) -> Self {
        self.choices.push(choice);
        self
    }

    pub fn with_on_enter(mut self, effect: Effect) -> Self {
        self.on_enter.push(effect);
        self
    }

    pub fn checkpoint(mut self) -> Self {
        self.is_checkpoint = true;
        self
    }

    pub fn ending(mut self, ending: Ending) -> Self {
        self.ending = Some(ending);
        self
    }

    pub fn starting_scenario(mut self, scenario: TimedScenario) -> Self {
        self.starts_scenario = Some(scenario);
        self
    }

    pub fn with_requirements(mut self, requirements: Requirements) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.ending.is_some()
    }

    fn references(&self) -> Vec<&NodeId> {
        let mut refs: Vec<&NodeId> = self.choices.iter().flat_map(|c| c.targets()).collect();
        if let Some(scenario) = &self.starts_scenario {
            refs.push(&scenario.death_node);
            refs.extend(scenario.exit_nodes.iter());
        }
        refs
    }
}

/// Story content as authored: nodes plus any items beyond the standard set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryContent {
    pub start: NodeId,
    pub nodes: Vec<StoryNode>,
    #[serde(default)]
    pub items: Vec<ItemDef>,
}

impl StoryContent {
    pub fn from_json(json: &str) -> Result<Self, StoryError> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StoryError> {
        let content = fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    /// Validate and build the graph, plus the standard catalog extended
    /// with this content's items.
    pub fn build(self) -> Result<(StoryGraph, ItemCatalog), StoryError> {
        let mut catalog = ItemCatalog::standard();
        for item in self.items {
            catalog.insert(item);
        }
        let graph = StoryGraph::new(self.start, self.nodes)?;
        graph.validate_items(&catalog)?;
        Ok((graph, catalog))
    }
}

/// Immutable node arena.
#[derive(Debug, Clone)]
pub struct StoryGraph {
    start: NodeId,
    nodes: HashMap<NodeId, StoryNode>,
}

impl StoryGraph {
    /// Build a graph, rejecting duplicate ids, a missing start, and any
    /// reference to a node that does not exist.
    pub fn new(start: NodeId, nodes: Vec<StoryNode>) -> Result<Self, StoryError> {
        let mut map = HashMap::with_capacity(nodes.len() + 2);
        for node in nodes {
            if map.contains_key(&node.id) {
                return Err(StoryError::DuplicateNode(node.id));
            }
            map.insert(node.id.clone(), node);
        }
        map.entry(NodeId::from(DEAD_END)).or_insert_with(|| {
            StoryNode::new(DEAD_END, "The way ends here. There is nothing further.").ending(Ending::Death)
        });
        map.entry(NodeId::from(DIAGNOSTIC_NODE)).or_insert_with(|| {
            StoryNode::new(
                DIAGNOSTIC_NODE,
                "The story lost its thread. This path leads nowhere that was written.",
            )
            .ending(Ending::Diagnostic)
        });

        if !map.contains_key(&start) {
            return Err(StoryError::MissingStart(start));
        }
        for node in map.values() {
            for target in node.references() {
                if !map.contains_key(target) {
                    return Err(StoryError::DanglingReference {
                        from: node.id.clone(),
                        to: target.clone(),
                    });
                }
            }
        }
        debug!(nodes = map.len(), start = %start, "Story graph loaded");
        Ok(Self { start, nodes: map })
    }

    fn validate_items(&self, catalog: &ItemCatalog) -> Result<(), StoryError> {
        for node in self.nodes.values() {
            let node_items = node
                .choices
                .iter()
                .flat_map(|c| c.items())
                .chain(node.requirements.items.iter())
                .chain(node.on_enter.iter().filter_map(effect_item));
            for item in node_items {
                if !catalog.contains(item) {
                    return Err(StoryError::UnknownItem {
                        node: node.id.clone(),
                        item: item.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn start(&self) -> &NodeId {
        &self.start
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &StoryNode> {
        self.nodes.values()
    }

    pub fn get_node(&self, id: &NodeId) -> Result<&StoryNode, StoryError> {
        self.nodes
            .get(id)
            .ok_or_else(|| StoryError::UnknownNode(id.clone()))
    }

    /// Look up a node, routing unknown ids to the diagnostic terminal.
    pub fn node_or_diagnostic(&self, id: &NodeId) -> &StoryNode {
        match self.nodes.get(id) {
            Some(node) => node,
            None => {
                warn!(node = %id, "Unknown node requested, routing to diagnostic ending");
                self.diagnostic()
            }
        }
    }

    pub fn diagnostic(&self) -> &StoryNode {
        // Inserted in `new` and never removed.
        &self.nodes[&NodeId::from(DIAGNOSTIC_NODE)]
    }

    /// Choices selectable in `state`, in authoring order. A choice is
    /// hidden when its own requirements fail, when it consumes items not
    /// held, or when its target node's requirements fail.
    pub fn available_choices<'a>(&self, node: &'a StoryNode, state: &PlayerState) -> Vec<&'a Choice> {
        node.choices
            .iter()
            .filter(|choice| self.is_available(choice, state))
            .collect()
    }

    /// Choices not selectable in `state`, with the reasons.
    pub fn locked_choices<'a>(
        &self,
        node: &'a StoryNode,
        state: &PlayerState,
    ) -> Vec<(&'a Choice, Vec<Unmet>)> {
        node.choices
            .iter()
            .filter_map(|choice| {
                let mut unmet = choice.unmet(state);
                if let Some(target) = self.nodes.get(&choice.next) {
                    unmet.extend(target.requirements.unmet(state));
                }
                (!unmet.is_empty()).then_some((choice, unmet))
            })
            .collect()
    }

    pub fn is_available(&self, choice: &Choice, state: &PlayerState) -> bool {
        choice.unmet(state).is_empty()
            && self
                .nodes
                .get(&choice.next)
                .map(|target| target.requirements.is_met(state))
                .unwrap_or(true)
    }

    /// Apply a node's automatic effects in declared order.
    pub fn apply_on_enter(&self, node: &StoryNode, state: &mut PlayerState) -> EffectLog {
        if node.on_enter.is_empty() {
            return Vec::new();
        }
        debug!(node = %node.id, count = node.on_enter.len(), "Applying on-enter effects");
        effects::apply_effects(state, &node.on_enter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Vital;

    fn small_graph() -> StoryGraph {
        StoryGraph::new(
            NodeId::from("cell"),
            vec![
                StoryNode::new("cell", "A cell.")
                    .with_choice(Choice::new("Wait", "cell"))
                    .with_choice(Choice::new("Light the tinder", "lit").requiring_item("tinderbox"))
                    .with_choice(Choice::new("Force the bars", "hall").requiring_stat(Stat::Strength, 8))
                    .with_choice(Choice::new("Give up", DEAD_END)),
                StoryNode::new("lit", "Light.")
                    .with_on_enter(Effect::AdjustVital {
                        vital: Vital::Fear,
                        delta: -10,
                    })
                    .with_on_enter(Effect::Damage {
                        amount: 5,
                        source: "burned fingers".into(),
                    }),
                StoryNode::new("hall", "A hall.").ending(Ending::Survival),
            ],
        )
        .unwrap()
    }

    fn state() -> PlayerState {
        PlayerState::new_game(NodeId::from("cell"), 10, 0)
    }

    #[test]
    fn test_reserved_nodes_exist() {
        let graph = small_graph();
        assert!(graph.contains(&NodeId::from(DEAD_END)));
        assert_eq!(graph.diagnostic().ending, Some(Ending::Diagnostic));
        assert!(graph.get_node(&NodeId::from(DEAD_END)).unwrap().is_terminal());
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let err = StoryGraph::new(
            NodeId::from("a"),
            vec![StoryNode::new("a", "A").with_choice(Choice::new("go", "nowhere"))],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            StoryError::DanglingReference { ref to, .. } if to.as_str() == "nowhere"
        ));
    }

    #[test]
    fn test_dangling_check_failure_node_rejected() {
        let check = StatCheck {
            stat: Stat::Agility,
            chance_per_point: 10,
            max_chance: 90,
            on_failure: NodeId::from("fall"),
        };
        let err = StoryGraph::new(
            NodeId::from("a"),
            vec![StoryNode::new("a", "A").with_choice(Choice::new("leap", "a").with_check(check))],
        )
        .unwrap_err();
        assert!(matches!(err, StoryError::DanglingReference { .. }));
    }

    #[test]
    fn test_duplicate_and_missing_start() {
        let dup = StoryGraph::new(
            NodeId::from("a"),
            vec![StoryNode::new("a", "A"), StoryNode::new("a", "again")],
        );
        assert!(matches!(dup, Err(StoryError::DuplicateNode(_))));

        let missing = StoryGraph::new(NodeId::from("b"), vec![StoryNode::new("a", "A")]);
        assert!(matches!(missing, Err(StoryError::MissingStart(_))));
    }

    #[test]
    fn test_unknown_node_routes_to_diagnostic() {
        let graph = small_graph();
        let id = NodeId::from("nope");
        assert!(matches!(graph.get_node(&id), Err(StoryError::UnknownNode(_))));
        assert_eq!(graph.node_or_diagnostic(&id).id.as_str(), DIAGNOSTIC_NODE);
    }

    #[test]
    fn test_available_choices_preserve_order() {
        let graph = small_graph();
        let node = graph.get_node(&NodeId::from("cell")).unwrap();
        let mut state = state();

        let labels: Vec<&str> = graph
            .available_choices(node, &state)
            .iter()
            .map(|c| c.label.as_str())
            .collect();
        assert_eq!(labels, vec!["Wait", "Give up"]);

        state.inventory.add(ItemId::from("tinderbox"), 1).unwrap();
        state.stats.strength = 8;
        let labels: Vec<&str> = graph
            .available_choices(node, &state)
            .iter()
            .map(|c| c.label.as_str())
            .collect();
        assert_eq!(labels, vec!["Wait", "Light the tinder", "Force the bars", "Give up"]);
    }

    #[test]
    fn test_locked_choices_report_reasons() {
        let graph = small_graph();
        let node = graph.get_node(&NodeId::from("cell")).unwrap();
        let locked = graph.locked_choices(node, &state());
        assert_eq!(locked.len(), 2);
        assert_eq!(
            locked[0].1,
            vec![Unmet::MissingItem {
                item: ItemId::from("tinderbox")
            }]
        );
        assert_eq!(
            locked[1].1,
            vec![Unmet::StatTooLow {
                stat: Stat::Strength,
                required: 8,
                actual: 5
            }]
        );
    }

    #[test]
    fn test_target_node_requirements_gate_choice() {
        let mut guarded = Requirements::default();
        guarded.flags.push("has_map".into());
        let graph = StoryGraph::new(
            NodeId::from("a"),
            vec![
                StoryNode::new("a", "A").with_choice(Choice::new("Follow the map", "b")),
                StoryNode::new("b", "B").with_requirements(guarded),
            ],
        )
        .unwrap();
        let node = graph.get_node(&NodeId::from("a")).unwrap();
        let mut state = state();
        assert!(graph.available_choices(node, &state).is_empty());
        state.flags.insert("has_map".into());
        assert_eq!(graph.available_choices(node, &state).len(), 1);
    }

    #[test]
    fn test_consumed_item_must_be_held() {
        let choice = Choice::new("Pay the ferryman", "a").consuming("copper_coins");
        let mut state = state();
        assert_eq!(choice.unmet(&state).len(), 1);
        state.inventory.add(ItemId::from("copper_coins"), 1).unwrap();
        assert!(choice.unmet(&state).is_empty());
    }

    #[test]
    fn test_on_enter_effects_in_order() {
        let graph = small_graph();
        let node = graph.get_node(&NodeId::from("lit")).unwrap();
        let mut state = state();
        state.vitals.fear = 30;
        let log = graph.apply_on_enter(node, &mut state);
        assert_eq!(log.len(), 2);
        assert_eq!(state.vitals.fear, 20);
        assert_eq!(state.vitals.health, 55);
    }

    #[test]
    fn test_stat_check_chance() {
        let check = StatCheck {
            stat: Stat::Strength,
            chance_per_point: 10,
            max_chance: 90,
            on_failure: NodeId::from("a"),
        };
        assert_eq!(check.chance(5), 50);
        assert_eq!(check.chance(12), 90);
        assert_eq!(check.chance(0), 0);
        assert_eq!(check.chance(i32::MAX), 90);
    }

    #[test]
    fn test_content_build_checks_items() {
        let content = StoryContent::from_json(
            r#"{
                "start": "a",
                "nodes": [
                    {"id": "a", "text": "A", "choices": [
                        {"label": "Take lantern", "next": "a",
                         "effects": [{"type": "grant_item", "item": "lantern"}]}
                    ]}
                ]
            }"#,
        )
        .unwrap();
        assert!(matches!(
            content.clone().build(),
            Err(StoryError::UnknownItem { .. })
        ));

        let mut content = content;
        content.items.push(ItemDef::new("lantern", "Lantern", crate::items::ItemKind::Light));
        let (graph, catalog) = content.build().unwrap();
        assert!(catalog.contains(&ItemId::from("lantern")));
        assert!(graph.contains(&NodeId::from("a")));
    }
}
