//! Action-budgeted scenarios.
//!
//! At most one timed scenario runs at a time. Each player action inside it
//! is recorded before the action's own effects apply; the action that
//! exceeds the budget forces the scenario's death node.

use crate::state::NodeId;
use crate::story::{Ending, StoryNode, TimedScenario};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A running scenario and the actions spent in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    pub scenario: TimedScenario,
    pub actions: u32,
}

impl TimerState {
    pub fn new(scenario: TimedScenario) -> Self {
        Self {
            scenario,
            actions: 0,
        }
    }

    /// Actions left before the budget runs out.
    pub fn remaining(&self) -> u32 {
        self.scenario.budget.saturating_sub(self.actions)
    }
}

/// What the tracker reports for the renderer and the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum TimerSignal {
    /// No scenario running.
    Idle,
    Started { scenario: String, budget: u32 },
    Ticking { scenario: String, remaining: u32 },
    /// One action or fewer left.
    Warning { scenario: String, remaining: u32 },
    /// Budget exceeded; the driver must move to `death_node`.
    Expired { scenario: String, death_node: NodeId },
    Cleared { scenario: String },
}

impl TimerSignal {
    pub fn is_expired(&self) -> bool {
        matches!(self, TimerSignal::Expired { .. })
    }
}

/// Tracks the active timed scenario, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePressureTracker {
    active: Option<TimerState>,
}

impl TimePressureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&TimerState> {
        self.active.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Start a scenario, replacing any running one.
    pub fn start_scenario(&mut self, scenario: TimedScenario) -> TimerSignal {
        info!(scenario = %scenario.id, budget = scenario.budget, "Timed scenario started");
        let signal = TimerSignal::Started {
            scenario: scenario.id.clone(),
            budget: scenario.budget,
        };
        self.active = Some(TimerState::new(scenario));
        signal
    }

    pub fn clear(&mut self) -> Option<TimerSignal> {
        self.active.take().map(|state| {
            debug!(scenario = %state.scenario.id, "Timed scenario cleared");
            TimerSignal::Cleared {
                scenario: state.scenario.id,
            }
        })
    }

    /// Count one action. Returns `Expired` once the count exceeds the budget,
    /// which also ends the scenario.
    pub fn record_action(&mut self) -> TimerSignal {
        let Some(state) = self.active.as_mut() else {
            return TimerSignal::Idle;
        };
        state.actions += 1;
        let scenario = state.scenario.id.clone();

        if state.actions > state.scenario.budget {
            let death_node = state.scenario.death_node.clone();
            info!(scenario = %scenario, actions = state.actions, "Timed scenario expired");
            self.active = None;
            return TimerSignal::Expired {
                scenario,
                death_node,
            };
        }

        let remaining = state.remaining();
        if remaining <= 1 {
            TimerSignal::Warning {
                scenario,
                remaining,
            }
        } else {
            TimerSignal::Ticking {
                scenario,
                remaining,
            }
        }
    }

    /// Update for entering `node`: exit nodes and death endings clear the
    /// scenario, and a node that starts a different scenario replaces it.
    /// Re-entering the node that started the running scenario keeps its clock.
    pub fn on_enter(&mut self, node: &StoryNode) -> Option<TimerSignal> {
        let mut signal = None;
        if let Some(state) = &self.active {
            let exits = state.scenario.exit_nodes.contains(&node.id);
            let died = node.ending == Some(Ending::Death);
            if exits || died {
                signal = self.clear();
            }
        }
        if let Some(scenario) = &node.starts_scenario {
            let same = self
                .active
                .as_ref()
                .map(|s| s.scenario.id == scenario.id)
                .unwrap_or(false);
            if !same {
                signal = Some(self.start_scenario(scenario.clone()));
            }
        }
        signal
    }
}
