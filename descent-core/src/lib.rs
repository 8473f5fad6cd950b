//! State and resolution engine for a dark interactive-fiction dungeon crawl.
//!
//! This crate provides:
//! - A validated story graph with gated choices and on-enter effects
//! - Player state with survival vitals, status effects, equipment, and body parts
//! - Combat resolution by an AI judge with a deterministic rule-based fallback
//! - Action-budgeted timed scenarios
//! - Atomic checkpoint persistence
//!
//! # Quick Start
//!
//! ```ignore
//! use descent_core::{EngineConfig, GameSession, StoryContent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (graph, catalog) = StoryContent::load("story.json").await?.build()?;
//!     let config = EngineConfig::load("descent.json").await?;
//!
//!     let mut session = GameSession::new(graph, catalog, config)?;
//!     println!("{}", session.current_node().text);
//!
//!     let report = session.choose(0).await?;
//!     if let Some(cause) = report.death {
//!         println!("You died: {cause}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod combat;
pub mod config;
pub mod dice;
pub mod effects;
pub mod items;
pub mod session;
pub mod state;
pub mod status;
pub mod story;
pub mod testing;
pub mod timer;

// Primary public API
pub use checkpoint::{Checkpoint, CheckpointError, CheckpointId, CheckpointManager, CheckpointSummary};
pub use combat::{
    CombatOutcome, CombatResolver, CombatStrategy, Encounter, Enemy, PlayerAction,
    RuleBasedStrategy, StrategyPreference,
};
pub use config::{ConfigError, EngineConfig};
pub use effects::Effect;
pub use items::{ItemCatalog, ItemDef, ItemKind};
pub use session::{DeathOption, GameSession, SessionError, TurnReport};
pub use state::{DeathCause, EquipSlot, ItemId, NodeId, PlayerState, StateError};
pub use status::{StatusEffectEngine, StatusKind};
pub use story::{Choice, Ending, StoryContent, StoryError, StoryGraph, StoryNode};
pub use testing::{MockReasoner, MockReply, TestHarness};
pub use timer::{TimePressureTracker, TimerSignal};
