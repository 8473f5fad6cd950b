//! GameSession - the headless driver for one playthrough.
//!
//! The session is the only long-lived owner of [`PlayerState`]. Each
//! operation works on a copy of the state and commits it whole, so a failed
//! operation leaves nothing half-applied. Renderers read the session and
//! [`TurnReport`]s; they never mutate state directly.

use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointId, CheckpointManager, CheckpointSummary};
use crate::combat::{
    ActiveEncounter, AiStrategy, ClaudeBackend, CombatResolver, CombatTarget, PlayerAction,
    ResolvedTurn, RuleBasedStrategy, StrategyPreference,
};
use crate::config::{ConfigError, EngineConfig};
use crate::dice::{PercentRoll, Roller};
use crate::effects::{self, EffectLog};
use crate::items::ItemCatalog;
use crate::state::{DeathCause, EquipSlot, ItemId, NodeId, PlayerState, StateError, Vital};
use crate::status::{StatusEffectEngine, TickReport};
use crate::story::{Choice, Ending, StoryError, StoryGraph, StoryNode, Unmet, DEAD_END};
use crate::timer::{TimePressureTracker, TimerSignal};
use claude::Claude;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Errors from GameSession operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Story error: {0}")]
    Story(#[from] StoryError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Choice {index} is not available ({available} choices)")]
    InvalidChoice { index: usize, available: usize },

    #[error("No fight in progress")]
    NotInCombat,

    #[error("Not possible during a fight")]
    InCombat,

    #[error("The player is dead")]
    PlayerDead,
}

/// Result of an automatic or requested checkpoint during a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointResult {
    Saved { id: CheckpointId, label: String },
    /// Storage failed; play continues without the checkpoint.
    Failed { error: String },
}

/// One combat turn as seen by a renderer.
#[derive(Debug, Clone)]
pub struct CombatReport {
    pub enemy: String,
    pub resolved: ResolvedTurn,
    /// Enemy health after this turn.
    pub enemy_health: i32,
    /// Damage the enemy took from its own statuses.
    pub enemy_status_damage: i32,
    pub victory: bool,
    pub escaped: bool,
}

/// Everything that happened in one turn.
#[derive(Debug, Clone)]
pub struct TurnReport {
    /// Node the player is at after the turn.
    pub node: NodeId,
    /// Choice effects followed by on-enter effects, in application order.
    pub effects: EffectLog,
    pub check: Option<PercentRoll>,
    pub tick: Option<TickReport>,
    /// Set when the turn started a fight.
    pub combat_started: Option<String>,
    pub combat: Option<CombatReport>,
    pub timer: Option<TimerSignal>,
    pub death: Option<DeathCause>,
    pub ending: Option<Ending>,
    pub checkpoint: Option<CheckpointResult>,
}

impl TurnReport {
    fn at(node: NodeId) -> Self {
        Self {
            node,
            effects: Vec::new(),
            check: None,
            tick: None,
            combat_started: None,
            combat: None,
            timer: None,
            death: None,
            ending: None,
            checkpoint: None,
        }
    }

    fn signal(&mut self, signal: TimerSignal) {
        if signal != TimerSignal::Idle {
            self.timer = Some(signal);
        }
    }
}

/// What the player may do after dying. The first option is the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeathOption {
    LoadCheckpoint { id: CheckpointId, label: String },
    Restart,
}

/// A single playthrough.
///
/// State only changes through session operations:
///
/// ```compile_fail
/// fn cheat(session: &mut descent_core::GameSession) {
///     session.state_mut().vitals.health = 100;
/// }
/// ```
pub struct GameSession {
    graph: StoryGraph,
    catalog: ItemCatalog,
    config: EngineConfig,
    state: PlayerState,
    timer: TimePressureTracker,
    engine: StatusEffectEngine,
    resolver: CombatResolver,
    checkpoints: CheckpointManager,
    encounter: Option<ActiveEncounter>,
    preference: StrategyPreference,
}

impl GameSession {
    /// Start a new game. The AI judge is used when enabled in `config` and an
    /// API key is available; otherwise combat uses the rules alone.
    pub fn new(
        graph: StoryGraph,
        catalog: ItemCatalog,
        config: EngineConfig,
    ) -> Result<Self, SessionError> {
        let resolver = default_resolver(&config);
        Self::with_resolver(graph, catalog, config, resolver)
    }

    /// Start a new game with an explicit combat resolver.
    pub fn with_resolver(
        graph: StoryGraph,
        catalog: ItemCatalog,
        config: EngineConfig,
        resolver: CombatResolver,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let checkpoints =
            CheckpointManager::new(&config.checkpoint_dir, &Uuid::new_v4().to_string());
        let state = PlayerState::new_game(graph.start().clone(), config.inventory_capacity, 0);
        let mut session = Self {
            engine: StatusEffectEngine::new(config.survival.clone()),
            graph,
            catalog,
            config,
            state,
            timer: TimePressureTracker::new(),
            resolver,
            checkpoints,
            encounter: None,
            preference: StrategyPreference::default(),
        };
        session.begin();
        Ok(session)
    }

    /// Store checkpoints under a named namespace instead of a fresh one.
    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.checkpoints = CheckpointManager::new(&self.config.checkpoint_dir, namespace);
        self
    }

    pub fn set_strategy_preference(&mut self, preference: StrategyPreference) {
        self.preference = preference;
    }

    fn begin(&mut self) {
        let seed = self.config.seed.unwrap_or_else(rand::random);
        let mut state =
            PlayerState::new_game(self.graph.start().clone(), self.config.inventory_capacity, seed);
        let mut timer = TimePressureTracker::new();
        let start = self.graph.node_or_diagnostic(self.graph.start());
        self.graph.apply_on_enter(start, &mut state);
        timer.on_enter(start);
        self.state = state;
        self.timer = timer;
        self.encounter = None;
        info!(start = %self.state.current_node, seed, "New game");
    }

    /// Throw the current run away and start over. Checkpoints are kept.
    pub fn restart(&mut self) {
        self.begin();
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    /// Direct state access for [`crate::testing::TestHarness`] setup.
    pub(crate) fn state_mut(&mut self) -> &mut PlayerState {
        &mut self.state
    }

    pub fn timer(&self) -> &TimePressureTracker {
        &self.timer
    }

    pub fn graph(&self) -> &StoryGraph {
        &self.graph
    }

    pub fn catalog(&self) -> &ItemCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &CombatResolver {
        &self.resolver
    }

    pub fn checkpoint_manager(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn encounter(&self) -> Option<&ActiveEncounter> {
        self.encounter.as_ref()
    }

    pub fn in_combat(&self) -> bool {
        self.encounter.is_some()
    }

    pub fn is_dead(&self) -> bool {
        self.state.is_dead()
    }

    /// The ending reached, if the current node is terminal.
    pub fn ending(&self) -> Option<Ending> {
        self.current_node().ending
    }

    pub fn current_node(&self) -> &StoryNode {
        self.graph.node_or_diagnostic(&self.state.current_node)
    }

    /// Choices selectable now, in authoring order. Empty during a fight.
    pub fn available_choices(&self) -> Vec<&Choice> {
        if self.in_combat() || self.is_dead() {
            return Vec::new();
        }
        self.graph.available_choices(self.current_node(), &self.state)
    }

    /// Choices that exist here but are locked, with reasons.
    pub fn locked_choices(&self) -> Vec<(&Choice, Vec<Unmet>)> {
        self.graph.locked_choices(self.current_node(), &self.state)
    }

    // ========================================================================
    // Turns
    // ========================================================================

    /// Take the available choice at `index`.
    pub async fn choose(&mut self, index: usize) -> Result<TurnReport, SessionError> {
        self.ensure_exploring()?;
        let choice = {
            let available = self.available_choices();
            match available.get(index) {
                Some(choice) => (*choice).clone(),
                None => {
                    return Err(SessionError::InvalidChoice {
                        index,
                        available: available.len(),
                    })
                }
            }
        };
        debug!(label = %choice.label, next = %choice.next, "Choice taken");

        let mut state = self.state.clone();
        let mut timer = self.timer.clone();
        let mut report = TurnReport::at(state.current_node.clone());

        // The clock runs before the choice does anything.
        let signal = timer.record_action();
        if let TimerSignal::Expired {
            scenario,
            death_node,
        } = &signal
        {
            state.record_death(DeathCause::TimeExpired {
                scenario: scenario.clone(),
            });
            let death_node = death_node.clone();
            report.signal(signal);
            self.enter_node(&mut state, &mut timer, &death_node, &mut report);
            return Ok(self.commit(state, timer, report).await);
        }
        report.signal(signal);

        for item in &choice.consumes {
            state.inventory.remove(item, 1)?;
        }
        report.effects = effects::apply_effects(&mut state, &choice.effects);

        if state.is_dead() {
            self.route_death(&mut state, &mut timer, &mut report, None);
            return Ok(self.commit(state, timer, report).await);
        }

        let mut target = choice.next.clone();
        if let Some(check) = &choice.check {
            let chance = check.chance(state.stats.get(check.stat));
            let roll = Roller::new(state.next_roll_seed()).percent(chance);
            debug!(stat = %check.stat, chance = roll.chance, rolled = roll.rolled, "Stat check");
            if !roll.succeeded() {
                target = check.on_failure.clone();
            }
            report.check = Some(roll);
        }

        match (&choice.combat, target == choice.next) {
            (Some(encounter), true) => {
                info!(enemy = %encounter.enemy.name, "Combat started");
                report.combat_started = Some(encounter.enemy.name.clone());
                self.encounter = Some(ActiveEncounter::start(encounter.clone(), choice.next.clone()));
            }
            _ => self.enter_node(&mut state, &mut timer, &target, &mut report),
        }

        report.tick = Some(self.engine.tick(&mut state));
        self.route_death(&mut state, &mut timer, &mut report, None);
        Ok(self.commit(state, timer, report).await)
    }

    /// Resolve one combat turn from free text.
    pub async fn combat_action(&mut self, text: &str) -> Result<TurnReport, SessionError> {
        if self.is_dead() {
            return Err(SessionError::PlayerDead);
        }
        let Some(mut active) = self.encounter.clone() else {
            return Err(SessionError::NotInCombat);
        };

        let mut state = self.state.clone();
        let mut timer = self.timer.clone();
        let mut report = TurnReport::at(state.current_node.clone());

        let signal = timer.record_action();
        if let TimerSignal::Expired {
            scenario,
            death_node,
        } = &signal
        {
            state.record_death(DeathCause::TimeExpired {
                scenario: scenario.clone(),
            });
            let death_node = death_node.clone();
            report.signal(signal);
            self.encounter = None;
            self.enter_node(&mut state, &mut timer, &death_node, &mut report);
            return Ok(self.commit(state, timer, report).await);
        }
        report.signal(signal);

        let enemy = active.encounter.enemy.name.clone();
        let action = PlayerAction::parse(text, &active.encounter.enemy);
        let context = active.context(&state, &self.catalog);
        let seed = state.next_roll_seed();
        let resolved = self
            .resolver
            .resolve(&context, &action, seed, self.preference)
            .await;
        let outcome = &resolved.outcome;

        active.round = context.round;
        active.enemy_health = (active.enemy_health - outcome.damage_dealt.max(0)).max(0);
        state.vitals.adjust(Vital::Health, -outcome.damage_taken.max(0));
        for status in &outcome.status_effects {
            match status.target {
                CombatTarget::Player => StatusEffectEngine::apply_effect(
                    &mut state,
                    status.kind,
                    status.duration,
                    status.magnitude,
                ),
                CombatTarget::Enemy => {
                    active
                        .enemy_status
                        .apply(status.kind, status.duration, status.magnitude)
                }
            }
        }
        if outcome.instant_death {
            state.vitals.set(Vital::Health, 0);
        }
        if state.vitals.is_dead() {
            state.record_death(DeathCause::Combat {
                enemy: enemy.clone(),
            });
        }

        let enemy_status_damage = if active.enemy_defeated() {
            0
        } else {
            active.tick_enemy()
        };
        let victory = !state.is_dead() && active.enemy_defeated();
        let escaped = !state.is_dead()
            && !victory
            && outcome.escaped
            && active.encounter.flee_node.is_some();

        report.combat = Some(CombatReport {
            enemy: enemy.clone(),
            resolved: resolved.clone(),
            enemy_health: active.enemy_health,
            enemy_status_damage,
            victory,
            escaped,
        });

        if state.is_dead() {
            info!(enemy = %enemy, "Killed in combat");
            self.encounter = None;
            let defeat = active.encounter.defeat_node.clone();
            self.route_death(&mut state, &mut timer, &mut report, defeat.as_ref());
            return Ok(self.commit(state, timer, report).await);
        }

        if victory {
            info!(enemy = %enemy, rounds = active.round, "Enemy defeated");
            self.encounter = None;
            self.enter_node(&mut state, &mut timer, &active.victory_node, &mut report);
        } else if escaped {
            info!(enemy = %enemy, "Escaped combat");
            self.encounter = None;
            if let Some(flee) = &active.encounter.flee_node {
                self.enter_node(&mut state, &mut timer, flee, &mut report);
            }
        } else {
            self.encounter = Some(active);
        }

        report.tick = Some(self.engine.tick(&mut state));
        self.route_death(&mut state, &mut timer, &mut report, None);
        Ok(self.commit(state, timer, report).await)
    }

    fn ensure_exploring(&self) -> Result<(), SessionError> {
        if self.is_dead() {
            return Err(SessionError::PlayerDead);
        }
        if self.in_combat() {
            return Err(SessionError::InCombat);
        }
        Ok(())
    }

    /// Move to `id`, applying its on-enter effects and timer rules. Unknown
    /// ids land on the diagnostic ending.
    fn enter_node(
        &self,
        state: &mut PlayerState,
        timer: &mut TimePressureTracker,
        id: &NodeId,
        report: &mut TurnReport,
    ) {
        let node = self.graph.node_or_diagnostic(id);
        debug!(node = %node.id, "Entering node");
        state.visit(node.id.clone());
        report.node = node.id.clone();
        report.effects.extend(self.graph.apply_on_enter(node, state));
        if let Some(signal) = timer.on_enter(node) {
            report.signal(signal);
        }
        if node.ending == Some(Ending::Death) {
            state.record_death(DeathCause::Story {
                node: node.id.clone(),
            });
        }
        report.ending = node.ending;
    }

    /// Send a dead player to a death node if they are not on one already.
    fn route_death(
        &self,
        state: &mut PlayerState,
        timer: &mut TimePressureTracker,
        report: &mut TurnReport,
        destination: Option<&NodeId>,
    ) {
        if !state.is_dead() {
            return;
        }
        if state.death.is_none() {
            state.record_death(DeathCause::Hazard {
                source: "wounds".into(),
            });
        }
        let here = self.graph.node_or_diagnostic(&state.current_node);
        if destination.is_none() && here.ending == Some(Ending::Death) {
            return;
        }
        let dead_end = NodeId::from(DEAD_END);
        self.enter_node(state, timer, destination.unwrap_or(&dead_end), report);
    }

    /// Commit a finished turn and take an auto checkpoint if the node asks.
    async fn commit(
        &mut self,
        state: PlayerState,
        timer: TimePressureTracker,
        mut report: TurnReport,
    ) -> TurnReport {
        self.state = state;
        self.timer = timer;
        report.node = self.state.current_node.clone();
        report.death = self.state.death.clone();

        if let Some(cause) = &report.death {
            info!(cause = %cause, node = %report.node, "Player died");
            self.encounter = None;
            return report;
        }
        if report.ending == Some(Ending::Survival) {
            info!(node = %report.node, turn = self.state.turn, "Survived");
        }
        if self.in_combat() {
            return report;
        }

        let node = self.graph.node_or_diagnostic(&self.state.current_node);
        match self
            .checkpoints
            .auto_save_if_flagged(node, &self.state, &self.timer)
            .await
        {
            Ok(Some(checkpoint)) => {
                report.checkpoint = Some(CheckpointResult::Saved {
                    id: checkpoint.id(),
                    label: checkpoint.label().to_string(),
                })
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, node = %node.id, "Auto checkpoint failed, continuing without it");
                report.checkpoint = Some(CheckpointResult::Failed {
                    error: e.to_string(),
                });
            }
        }
        report
    }

    // ========================================================================
    // Inventory
    // ========================================================================

    /// Use a consumable from the inventory.
    pub fn use_item(&mut self, item: &ItemId) -> Result<EffectLog, SessionError> {
        if self.is_dead() {
            return Err(SessionError::PlayerDead);
        }
        let mut state = self.state.clone();
        let log = state.consume_item(&self.catalog, item)?;
        debug!(item = %item, effects = log.len(), "Item used");
        self.state = state;
        Ok(log)
    }

    /// Equip an item. Returns the item it replaced.
    pub fn equip(&mut self, item: &ItemId, slot: EquipSlot) -> Result<Option<ItemId>, SessionError> {
        if self.is_dead() {
            return Err(SessionError::PlayerDead);
        }
        Ok(self.state.equip(&self.catalog, item, slot)?)
    }

    pub fn unequip(&mut self, slot: EquipSlot) -> Result<ItemId, SessionError> {
        if self.is_dead() {
            return Err(SessionError::PlayerDead);
        }
        Ok(self.state.unequip(slot)?)
    }

    pub fn drop_item(&mut self, item: &ItemId, count: u32) -> Result<(), SessionError> {
        if self.is_dead() {
            return Err(SessionError::PlayerDead);
        }
        Ok(self.state.drop_item(item, count)?)
    }

    // ========================================================================
    // Checkpoints
    // ========================================================================

    /// Save the current state under an optional label.
    pub async fn save_checkpoint(&self, label: Option<&str>) -> Result<Checkpoint, SessionError> {
        self.ensure_exploring()?;
        Ok(self.checkpoints.save(&self.state, &self.timer, label).await?)
    }

    /// Checkpoints for this playthrough, most recent first.
    pub async fn checkpoints(&self) -> Result<Vec<CheckpointSummary>, SessionError> {
        Ok(self.checkpoints.list().await?)
    }

    pub async fn delete_checkpoint(&self, id: CheckpointId) -> Result<(), SessionError> {
        Ok(self.checkpoints.delete(id).await?)
    }

    /// Replace the current state with a checkpoint. Returns the node reached.
    pub async fn restore(&mut self, id: CheckpointId) -> Result<NodeId, SessionError> {
        let checkpoint = self.checkpoints.restore(id).await?;
        self.state = checkpoint.state().clone();
        self.timer = checkpoint.timer().clone();
        self.encounter = None;
        info!(id = %id, node = %checkpoint.node_id(), "Checkpoint loaded");
        Ok(checkpoint.node_id().clone())
    }

    /// Options after death: the most recent checkpoint first when one
    /// exists, then restart.
    pub async fn death_options(&self) -> Vec<DeathOption> {
        let mut options = Vec::new();
        match self.checkpoints.most_recent().await {
            Ok(Some(latest)) => options.push(DeathOption::LoadCheckpoint {
                id: latest.id,
                label: latest.label,
            }),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Could not list checkpoints"),
        }
        options.push(DeathOption::Restart);
        options
    }
}

fn default_resolver(config: &EngineConfig) -> CombatResolver {
    let resolver = CombatResolver::new(RuleBasedStrategy::new(config.combat.clone()))
        .with_timeout(config.ai.timeout())
        .with_cooldown(config.ai.cooldown_turns);
    if !config.ai.enabled {
        return resolver;
    }
    match Claude::from_env().and_then(|client| client.with_timeout(config.ai.timeout())) {
        Ok(client) => {
            let client = match &config.ai.model {
                Some(model) => client.with_model(model.clone()),
                None => client,
            };
            let backend = ClaudeBackend::new(client).with_max_tokens(config.ai.max_tokens);
            resolver.with_ai(Arc::new(AiStrategy::new(Arc::new(backend))))
        }
        Err(e) => {
            warn!(error = %e, "AI combat judge unavailable, using rules only");
            resolver
        }
    }
}
