//! Testing utilities for the engine.
//!
//! This module provides tools for integration testing:
//! - `sample_story` with the flooded-cell opening
//! - `MockReasoner` for deterministic AI verdicts without API calls
//! - `TestHarness` for scripted playthroughs
//! - Assertion helpers for verifying session state

use crate::combat::{
    AiError, AiStrategy, CombatResolver, Encounter, Enemy, Footing, JudgeRequest, LightLevel,
    ReasoningBackend, RuleBasedStrategy,
};
use crate::config::EngineConfig;
use crate::effects::Effect;
use crate::items::ItemCatalog;
use crate::session::{GameSession, SessionError, TurnReport};
use crate::state::{ItemId, NodeId, PlayerState, Stat, Vital};
use crate::status::StatusKind;
use crate::story::{Choice, Ending, StatCheck, StoryError, StoryGraph, StoryNode, TimedScenario};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Actions allowed in the flooding cell before the water wins.
pub const FLOODING_BUDGET: u32 = 5;

/// The flooded-cell opening.
///
/// `start` begins a five-action flooding scenario that ends at `corridor` or
/// drowns the player in `drowned`. The corpse in the water holds a tinderbox,
/// a shiv, a torch, and a moldy crust of bread. The corridor holds a lethal
/// ghoul weak to fire and to its eyes.
pub fn sample_story() -> Result<(StoryGraph, ItemCatalog), StoryError> {
    let flooding = TimedScenario {
        id: "flooding_cell".into(),
        budget: FLOODING_BUDGET,
        death_node: NodeId::from("drowned"),
        exit_nodes: vec![NodeId::from("corridor")],
    };

    let ghoul = Enemy::new("Ghoul", 40, 9)
        .with_defense(1)
        .with_aggression(60)
        .with_weakness("fire")
        .with_weakness("eyes")
        .lethal();
    let fight = Encounter::new(ghoul)
        .in_environment(LightLevel::Dark, Footing::Slippery)
        .fleeing_to("lit_cell")
        .defeat_at("combat_death");

    let strike = || Choice::new("Strike the tinderbox", "lit_cell").requiring_item("tinderbox");

    let nodes = vec![
        StoryNode::new(
            "start",
            "You wake chained to a wall. Black water is already at your knees, and rising.",
        )
        .starting_scenario(flooding)
        .with_choice(Choice::new("Search the water", "search_cell_water"))
        .with_choice(Choice::new("Wait and listen", "start")),
        StoryNode::new(
            "search_cell_water",
            "Your hands close on cloth, then on a cold, bloated arm.",
        )
        .with_on_enter(Effect::AdjustVital {
            vital: Vital::Fear,
            delta: 10,
        })
        .with_choice(Choice::new("Examine the corpse", "search_corpse"))
        .with_choice(strike())
        .with_choice(Choice::new("Wait and listen", "search_cell_water")),
        StoryNode::new(
            "search_corpse",
            "A dead prisoner. A pouch at the belt, a blade in the boot, bread in a pocket.",
        )
        .with_choice(
            Choice::new("Take the tinderbox", "tinderbox_only").with_effect(Effect::GrantItem {
                item: ItemId::from("tinderbox"),
                count: 1,
            }),
        )
        .with_choice(
            Choice::new("Take everything", "after_corpse_loot")
                .with_effect(Effect::GrantItem {
                    item: ItemId::from("tinderbox"),
                    count: 1,
                })
                .with_effect(Effect::GrantItem {
                    item: ItemId::from("shiv"),
                    count: 1,
                })
                .with_effect(Effect::GrantItem {
                    item: ItemId::from("torch"),
                    count: 1,
                })
                .with_effect(Effect::GrantItem {
                    item: ItemId::from("moldy_bread"),
                    count: 1,
                }),
        ),
        StoryNode::new("tinderbox_only", "The tinderbox is dry inside its oilskin.")
            .with_choice(strike())
            .with_choice(Choice::new("Wade back", "search_cell_water")),
        StoryNode::new("after_corpse_loot", "Your pockets are heavy. The water is at your chest.")
            .with_choice(strike())
            .with_choice(Choice::new("Eat the moldy bread", "eat_moldy_bread").consuming("moldy_bread")),
        StoryNode::new("eat_moldy_bread", "It tastes of rot. Your stomach knots at once.")
            .with_on_enter(Effect::ApplyStatus {
                kind: StatusKind::Poisoned,
                duration: 3,
                magnitude: 2,
            })
            .with_choice(Choice::new("Double over, retching", "death_poison")),
        StoryNode::new(
            "lit_cell",
            "Sparks catch. In the light you see a rusted grate above the waterline.",
        )
        .checkpoint()
        .with_choice(
            Choice::new("Pry the grate with the shiv", "corridor").requiring_item("shiv"),
        )
        .with_choice(Choice::new("Force the grate", "corridor").with_check(StatCheck {
            stat: Stat::Strength,
            chance_per_point: 10,
            max_chance: 95,
            on_failure: NodeId::from("grate_fail"),
        }))
        .with_choice(
            Choice::new("Squeeze through the drain", "corridor").requiring_stat(Stat::Agility, 8),
        ),
        StoryNode::new("grate_fail", "The grate holds. Rust bites into your palms.")
            .with_on_enter(Effect::Damage {
                amount: 5,
                source: "rusted grate".into(),
            })
            .with_choice(Choice::new("Try again", "lit_cell")),
        StoryNode::new(
            "corridor",
            "You haul yourself into a dry corridor. Something wet shuffles in the dark ahead.",
        )
        .checkpoint()
        .with_choice(Choice::new("Fight the ghoul", "ghoul_slain").with_combat(fight))
        .with_choice(Choice::new("Climb back down", "lit_cell")),
        StoryNode::new("ghoul_slain", "The ghoul is still. Beyond it, a stair climbs toward air.")
            .ending(Ending::Survival),
        StoryNode::new("drowned", "The water closes over your head.").ending(Ending::Death),
        StoryNode::new("death_poison", "The poison finishes what the dark began.")
            .ending(Ending::Death),
        StoryNode::new("combat_death", "The ghoul drags you down into the water.")
            .ending(Ending::Death),
    ];

    let graph = StoryGraph::new(NodeId::from("start"), nodes)?;
    Ok((graph, ItemCatalog::standard()))
}

// ============================================================================
// Mock reasoning backend
// ============================================================================

/// A scripted reply from the mock judge.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Raw verdict JSON, validated like a real reply.
    Verdict(Value),
    /// A reply that does not match the verdict shape.
    Malformed,
    /// A transport failure.
    Fail,
    /// Never answers.
    Hang,
}

impl MockReply {
    /// A successful hit for `damage`.
    pub fn success(damage: i32) -> Self {
        MockReply::Verdict(json!({
            "success": true,
            "narrative": "You drive the point home and it shrieks.",
            "damage_dealt": damage,
            "damage_taken": 0,
            "instant_death": false,
            "status_effects": []
        }))
    }

    /// A failed action that costs the player `damage_taken` health.
    pub fn failure(damage_taken: i32) -> Self {
        MockReply::Verdict(json!({
            "success": false,
            "narrative": "Your swing finds only air. Claws rake your side.",
            "damage_dealt": 0,
            "damage_taken": damage_taken,
            "instant_death": false,
            "status_effects": []
        }))
    }
}

/// A reasoning backend that returns scripted replies in order. The last
/// reply repeats once the script runs out.
pub struct MockReasoner {
    replies: Vec<MockReply>,
    index: AtomicUsize,
    requests: Mutex<Vec<JudgeRequest>>,
}

impl MockReasoner {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies,
            index: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Number of judgements requested so far.
    pub fn calls(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }

    /// Requests received, oldest first.
    pub fn requests(&self) -> Vec<JudgeRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ReasoningBackend for MockReasoner {
    async fn judge(&self, request: &JudgeRequest) -> Result<Value, AiError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let index = self.index.fetch_add(1, Ordering::SeqCst);
        let Some(reply) = self.replies.get(index).or_else(|| self.replies.last()) else {
            return Err(AiError::Disabled("no scripted replies".into()));
        };
        match reply {
            MockReply::Verdict(value) => Ok(value.clone()),
            MockReply::Malformed => Ok(json!({ "verdict": "it probably works" })),
            MockReply::Fail => Err(AiError::Transport("connection reset".into())),
            MockReply::Hang => std::future::pending().await,
        }
    }
}

// ============================================================================
// Test harness
// ============================================================================

/// Seed used by every harness.
pub const HARNESS_SEED: u64 = 7;

/// Drives a [`GameSession`] over the sample story with a fixed seed.
pub struct TestHarness {
    pub session: GameSession,
    reasoner: Option<Arc<MockReasoner>>,
}

impl TestHarness {
    /// A rules-only harness storing checkpoints under `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, SessionError> {
        let (graph, catalog) = sample_story()?;
        let config = Self::config(dir.as_ref());
        let resolver = CombatResolver::new(RuleBasedStrategy::new(config.combat.clone()));
        Ok(Self {
            session: GameSession::with_resolver(graph, catalog, config, resolver)?,
            reasoner: None,
        })
    }

    /// A harness whose AI judge answers with `replies`. The judge times out
    /// after `ai_timeout`.
    pub fn with_ai(
        dir: impl AsRef<Path>,
        replies: Vec<MockReply>,
        ai_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let (graph, catalog) = sample_story()?;
        let config = Self::config(dir.as_ref());
        let reasoner = Arc::new(MockReasoner::new(replies));
        let resolver = CombatResolver::new(RuleBasedStrategy::new(config.combat.clone()))
            .with_ai(Arc::new(AiStrategy::new(reasoner.clone())))
            .with_timeout(ai_timeout)
            .with_cooldown(config.ai.cooldown_turns);
        Ok(Self {
            session: GameSession::with_resolver(graph, catalog, config, resolver)?,
            reasoner: Some(reasoner),
        })
    }

    fn config(dir: &Path) -> EngineConfig {
        EngineConfig::new()
            .with_seed(HARNESS_SEED)
            .with_checkpoint_dir(dir)
            .without_ai()
    }

    /// The mock judge, when the harness has one.
    pub fn reasoner(&self) -> Option<&MockReasoner> {
        self.reasoner.as_deref()
    }

    pub fn state(&self) -> &PlayerState {
        self.session.state()
    }

    /// Mutable state for setting up scenarios.
    pub fn state_mut(&mut self) -> &mut PlayerState {
        self.session.state_mut()
    }

    /// Labels of the choices available now.
    pub fn choice_labels(&self) -> Vec<String> {
        self.session
            .available_choices()
            .iter()
            .map(|c| c.label.clone())
            .collect()
    }

    pub fn has_choice(&self, label: &str) -> bool {
        self.session
            .available_choices()
            .iter()
            .any(|c| c.label == label)
    }

    /// Take the available choice with this label.
    pub async fn choose(&mut self, label: &str) -> Result<TurnReport, SessionError> {
        let available = self.session.available_choices();
        let index = available.iter().position(|c| c.label == label).ok_or(
            SessionError::InvalidChoice {
                index: usize::MAX,
                available: available.len(),
            },
        )?;
        self.session.choose(index).await
    }

    /// Take several choices in order, stopping at the first error.
    pub async fn walk(&mut self, labels: &[&str]) -> Result<Vec<TurnReport>, SessionError> {
        let mut reports = Vec::with_capacity(labels.len());
        for label in labels {
            reports.push(self.choose(label).await?);
        }
        Ok(reports)
    }

    pub async fn fight(&mut self, action: &str) -> Result<TurnReport, SessionError> {
        self.session.combat_action(action).await
    }

    pub fn at(&self) -> &NodeId {
        &self.session.state().current_node
    }

    pub fn has_item(&self, item: &str) -> bool {
        self.session.state().inventory.has(&ItemId::from(item))
    }

    pub fn health(&self) -> i32 {
        self.session.state().vitals.health
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert the player is at the given node.
#[track_caller]
pub fn assert_at(harness: &TestHarness, node: &str) {
    assert_eq!(
        harness.at().as_str(),
        node,
        "Expected to be at '{node}', history: {:?}",
        harness.state().history
    );
}

/// Assert a choice with this label is available.
#[track_caller]
pub fn assert_choice_available(harness: &TestHarness, label: &str) {
    assert!(
        harness.has_choice(label),
        "Expected choice '{label}' to be available, got {:?}",
        harness.choice_labels()
    );
}

/// Assert no choice with this label is available.
#[track_caller]
pub fn assert_choice_absent(harness: &TestHarness, label: &str) {
    assert!(
        !harness.has_choice(label),
        "Expected choice '{label}' to be absent, got {:?}",
        harness.choice_labels()
    );
}

#[track_caller]
pub fn assert_has_item(harness: &TestHarness, item: &str) {
    assert!(
        harness.has_item(item),
        "Expected '{item}' in inventory: {:?}",
        harness.state().inventory
    );
}

#[track_caller]
pub fn assert_dead(harness: &TestHarness) {
    assert!(harness.session.is_dead(), "Expected the player to be dead");
}

#[track_caller]
pub fn assert_alive(harness: &TestHarness) {
    assert!(
        !harness.session.is_dead(),
        "Expected the player to be alive, died of {:?}",
        harness.state().death
    );
}

#[track_caller]
pub fn assert_in_combat(harness: &TestHarness) {
    assert!(harness.session.in_combat(), "Expected to be in combat");
}

#[track_caller]
pub fn assert_not_in_combat(harness: &TestHarness) {
    assert!(!harness.session.in_combat(), "Expected to NOT be in combat");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::{CombatContext, PlayerAction};

    #[test]
    fn test_sample_story_is_valid() {
        let (graph, catalog) = sample_story().unwrap();
        assert!(graph.contains(&NodeId::from("corridor")));
        assert!(catalog.contains(&ItemId::from("tinderbox")));
        for node in graph.nodes() {
            for choice in &node.choices {
                assert!(graph.contains(&choice.next), "{} -> {}", node.id, choice.next);
            }
        }
    }

    #[tokio::test]
    async fn test_mock_reasoner_script_repeats_last() {
        let reasoner = MockReasoner::new(vec![MockReply::Fail, MockReply::success(3)]);
        let catalog = ItemCatalog::standard();
        let state = PlayerState::new_game(NodeId::from("a"), 10, 0);
        let enemy = Enemy::new("Rat", 5, 1);
        let active = crate::combat::ActiveEncounter::start(Encounter::new(enemy.clone()), NodeId::from("b"));
        let context: CombatContext = active.context(&state, &catalog);
        let request = JudgeRequest::new(&context, &PlayerAction::parse("stab", &enemy));

        assert!(reasoner.judge(&request).await.is_err());
        assert_eq!(reasoner.judge(&request).await.unwrap()["damage_dealt"], 3);
        assert_eq!(reasoner.judge(&request).await.unwrap()["damage_dealt"], 3);
        assert_eq!(reasoner.calls(), 3);
        assert_eq!(reasoner.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_script_is_an_error() {
        let reasoner = MockReasoner::new(Vec::new());
        let catalog = ItemCatalog::standard();
        let state = PlayerState::new_game(NodeId::from("a"), 10, 0);
        let enemy = Enemy::new("Rat", 5, 1);
        let active = crate::combat::ActiveEncounter::start(Encounter::new(enemy.clone()), NodeId::from("b"));
        let request = JudgeRequest::new(
            &active.context(&state, &catalog),
            &PlayerAction::parse("stab", &enemy),
        );
        assert!(matches!(
            reasoner.judge(&request).await,
            Err(AiError::Disabled(_))
        ));
    }
}
