//! AI-backed combat judgement.
//!
//! The full combat context and the player's action text go to a reasoning
//! backend under a strict contract. The reply must be a complete structured
//! verdict; anything missing, malformed, or contradicting the contract is an
//! [`AiError`] and the resolver falls back to the rules.

use super::{
    ActionKind, AttackStyle, CombatContext, CombatError, CombatOutcome, CombatStrategy,
    PlayerAction, StatusApplication, StrategyKind,
};
use async_trait::async_trait;
use claude::{Claude, Message, Request, Tool};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Name of the forced tool the judge must answer through.
pub const VERDICT_TOOL: &str = "report_combat_outcome";

/// Rules the judge is bound by.
pub const JUDGE_INSTRUCTIONS: &str = "\
You are the impartial combat judge of a grim dungeon survival story. \
Judge exactly one player action against the combat context you are given and \
report the result with the report_combat_outcome tool. Rules you must follow:
- A player with no arms cannot perform melee actions; those always fail.
- Generic or vague actions (\"attack\", \"fight it\", \"do something\") always fail.
- Only actions that target a listed weakness, dodge, flee, or are clearly \
creative and physically plausible with the player's body, equipment, and \
surroundings may succeed.
- A player who cannot act (stunned) always fails.
- Damage must be small integers consistent with the player's strength and \
weapon. Use instant_death only when the enemy is lethal and the player is \
helpless.
- Keep the narrative to two or three sentences in second person.";

/// Errors from the AI judge. All are recoverable by falling back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AiError {
    #[error("AI request timed out")]
    Timeout,

    #[error("AI transport error: {0}")]
    Transport(String),

    #[error("Malformed AI response: {0}")]
    Malformed(String),

    #[error("AI verdict broke the combat contract: {0}")]
    ContractViolation(String),

    #[error("AI judge disabled: {0}")]
    Disabled(String),
}

impl From<claude::Error> for AiError {
    fn from(err: claude::Error) -> Self {
        match err {
            claude::Error::Timeout => AiError::Timeout,
            claude::Error::NoApiKey => AiError::Disabled("no API key".into()),
            claude::Error::Config(msg) => AiError::Disabled(msg),
            claude::Error::Parse(msg) => AiError::Malformed(msg),
            other => AiError::Transport(other.to_string()),
        }
    }
}

/// What the judge is asked.
#[derive(Debug, Clone, Serialize)]
pub struct JudgeRequest {
    pub instructions: &'static str,
    pub context: CombatContext,
    pub action_text: String,
}

impl JudgeRequest {
    pub fn new(context: &CombatContext, action: &PlayerAction) -> Self {
        Self {
            instructions: JUDGE_INSTRUCTIONS,
            context: context.clone(),
            action_text: action.text.clone(),
        }
    }
}

/// A service that can judge a combat action and return raw structured JSON.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    async fn judge(&self, request: &JudgeRequest) -> Result<Value, AiError>;
}

/// Structured verdict. Every field except `escaped` is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Verdict {
    pub success: bool,
    pub narrative: String,
    pub damage_dealt: i32,
    pub damage_taken: i32,
    pub instant_death: bool,
    pub status_effects: Vec<StatusApplication>,
    #[serde(default)]
    pub escaped: bool,
}

impl Verdict {
    /// Parse and validate a raw verdict against the combat contract.
    pub fn parse(
        value: Value,
        context: &CombatContext,
        action: &PlayerAction,
    ) -> Result<Self, AiError> {
        let verdict: Verdict =
            serde_json::from_value(value).map_err(|e| AiError::Malformed(e.to_string()))?;
        verdict.enforce(context, action)?;
        Ok(verdict)
    }

    fn enforce(&self, context: &CombatContext, action: &PlayerAction) -> Result<(), AiError> {
        if self.narrative.trim().is_empty() {
            return Err(AiError::Malformed("empty narrative".into()));
        }
        if self.damage_dealt < 0 || self.damage_taken < 0 {
            return Err(AiError::Malformed("negative damage".into()));
        }
        if self.status_effects.iter().any(|s| s.magnitude < 0) {
            return Err(AiError::Malformed("negative status magnitude".into()));
        }
        if !self.success {
            if self.damage_dealt > 0 {
                return Err(AiError::ContractViolation(
                    "failed action dealt damage".into(),
                ));
            }
            if self.escaped {
                return Err(AiError::ContractViolation("failed action escaped".into()));
            }
            return Ok(());
        }
        if !context.player.can_act {
            return Err(AiError::ContractViolation("stunned player succeeded".into()));
        }
        if self.instant_death {
            return Err(AiError::ContractViolation(
                "successful action killed the player".into(),
            ));
        }
        match &action.kind {
            ActionKind::Vague => Err(AiError::ContractViolation(
                "vague action succeeded".into(),
            )),
            ActionKind::Attack {
                style: AttackStyle::Melee,
                ..
            } if context.player.arms == 0 && !context.player.has_ranged_weapon() => Err(
                AiError::ContractViolation("melee without arms succeeded".into()),
            ),
            ActionKind::Flee | ActionKind::Dodge if context.player.legs == 0 => Err(
                AiError::ContractViolation("movement without legs succeeded".into()),
            ),
            _ => Ok(()),
        }
    }
}

impl From<Verdict> for CombatOutcome {
    fn from(v: Verdict) -> Self {
        CombatOutcome {
            success: v.success,
            narrative: v.narrative,
            damage_dealt: v.damage_dealt,
            damage_taken: v.damage_taken,
            status_effects: v.status_effects,
            instant_death: v.instant_death,
            escaped: v.escaped,
        }
    }
}

/// Strategy that delegates to a [`ReasoningBackend`].
#[derive(Clone)]
pub struct AiStrategy {
    backend: Arc<dyn ReasoningBackend>,
}

impl AiStrategy {
    pub fn new(backend: Arc<dyn ReasoningBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl CombatStrategy for AiStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AiBacked
    }

    async fn evaluate(
        &self,
        context: &CombatContext,
        action: &PlayerAction,
        _seed: u64,
    ) -> Result<CombatOutcome, CombatError> {
        let request = JudgeRequest::new(context, action);
        let raw = self.backend.judge(&request).await?;
        debug!(round = context.round, "AI verdict received");
        let verdict = Verdict::parse(raw, context, action)?;
        Ok(verdict.into())
    }
}

/// Claude as a reasoning backend, answering through a forced tool call.
#[derive(Clone)]
pub struct ClaudeBackend {
    client: Claude,
    max_tokens: usize,
}

impl ClaudeBackend {
    pub fn new(client: Claude) -> Self {
        Self {
            client,
            max_tokens: 1024,
        }
    }

    /// Create a backend from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env() -> Result<Self, AiError> {
        Ok(Self::new(Claude::from_env()?))
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn verdict_tool() -> Tool {
        Tool {
            name: VERDICT_TOOL.to_string(),
            description: "Report the single authoritative outcome of the player's combat action."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "success": {
                        "type": "boolean",
                        "description": "Whether the action achieved what the player intended"
                    },
                    "narrative": {
                        "type": "string",
                        "description": "Two or three sentences describing what happened"
                    },
                    "damage_dealt": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Damage dealt to the enemy"
                    },
                    "damage_taken": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Damage the player takes this turn"
                    },
                    "instant_death": {
                        "type": "boolean",
                        "description": "The player dies outright"
                    },
                    "escaped": {
                        "type": "boolean",
                        "description": "The player got away from the fight"
                    },
                    "status_effects": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "target": { "type": "string", "enum": ["player", "enemy"] },
                                "kind": {
                                    "type": "string",
                                    "enum": ["bleeding", "poisoned", "burning", "infected",
                                             "stunned", "slowed", "hasted"]
                                },
                                "duration": { "type": "integer", "minimum": 0 },
                                "magnitude": { "type": "integer", "minimum": 0 }
                            },
                            "required": ["target", "kind", "duration"]
                        }
                    }
                },
                "required": ["success", "narrative", "damage_dealt", "damage_taken",
                             "instant_death", "status_effects"]
            }),
        }
    }
}

#[async_trait]
impl ReasoningBackend for ClaudeBackend {
    async fn judge(&self, request: &JudgeRequest) -> Result<Value, AiError> {
        let payload = json!({
            "combat_context": request.context,
            "player_action": request.action_text,
        });
        let prompt = serde_json::to_string_pretty(&payload)
            .map_err(|e| AiError::Malformed(e.to_string()))?;

        let api_request = Request::new(vec![Message::user(prompt)])
            .with_system(request.instructions)
            .with_max_tokens(self.max_tokens)
            .forcing_tool(Self::verdict_tool());

        let response = self.client.complete(api_request).await?;
        response
            .tool_input(VERDICT_TOOL)
            .cloned()
            .ok_or_else(|| AiError::Malformed(format!("no {VERDICT_TOOL} call in response")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::{CombatTarget, Enemy, Environment, PlayerSnapshot};
    use crate::state::Stats;
    use crate::status::StatusKind;

    fn context() -> CombatContext {
        let enemy = Enemy::new("Ghoul", 40, 8).with_weakness("eyes").lethal();
        CombatContext {
            enemy_health: 40,
            enemy,
            enemy_statuses: Vec::new(),
            environment: Environment::default(),
            player: PlayerSnapshot {
                stats: Stats::default(),
                agility: 5,
                health: 60,
                max_health: 100,
                weapon: None,
                armor_bonus: 0,
                has_light: false,
                arms: 2,
                legs: 2,
                can_see: true,
                can_act: true,
                crit_bonus: 0,
                statuses: Vec::new(),
            },
            round: 1,
        }
    }

    fn good_verdict() -> Value {
        json!({
            "success": true,
            "narrative": "You drive your thumbs into its eyes.",
            "damage_dealt": 12,
            "damage_taken": 0,
            "instant_death": false,
            "status_effects": [
                {"target": "enemy", "kind": "stunned", "duration": 1}
            ]
        })
    }

    #[test]
    fn test_parse_valid_verdict() {
        let ctx = context();
        let action = PlayerAction::parse("gouge its eyes", &ctx.enemy);
        let verdict = Verdict::parse(good_verdict(), &ctx, &action).unwrap();
        assert_eq!(verdict.damage_dealt, 12);
        assert_eq!(verdict.status_effects[0].target, CombatTarget::Enemy);
        assert_eq!(verdict.status_effects[0].kind, StatusKind::Stunned);
        assert!(!verdict.escaped);
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let ctx = context();
        let action = PlayerAction::parse("gouge its eyes", &ctx.enemy);
        let mut value = good_verdict();
        value.as_object_mut().unwrap().remove("damage_taken");
        assert!(matches!(
            Verdict::parse(value, &ctx, &action),
            Err(AiError::Malformed(_))
        ));
    }

    #[test]
    fn test_wrong_type_is_malformed() {
        let ctx = context();
        let action = PlayerAction::parse("gouge its eyes", &ctx.enemy);
        let mut value = good_verdict();
        value["damage_dealt"] = json!("lots");
        assert!(matches!(
            Verdict::parse(value, &ctx, &action),
            Err(AiError::Malformed(_))
        ));
    }

    #[test]
    fn test_vague_success_violates_contract() {
        let ctx = context();
        let action = PlayerAction::parse("I fight bravely", &ctx.enemy);
        assert_eq!(action.kind, ActionKind::Vague);
        assert!(matches!(
            Verdict::parse(good_verdict(), &ctx, &action),
            Err(AiError::ContractViolation(_))
        ));
    }

    #[test]
    fn test_armless_melee_success_violates_contract() {
        let mut ctx = context();
        ctx.player.arms = 0;
        let action = PlayerAction::parse("gouge its eyes", &ctx.enemy);
        assert!(matches!(
            Verdict::parse(good_verdict(), &ctx, &action),
            Err(AiError::ContractViolation(_))
        ));
    }

    #[test]
    fn test_stunned_success_violates_contract() {
        let mut ctx = context();
        ctx.player.can_act = false;
        let action = PlayerAction::parse("gouge its eyes", &ctx.enemy);
        assert!(matches!(
            Verdict::parse(good_verdict(), &ctx, &action),
            Err(AiError::ContractViolation(_))
        ));
    }

    #[test]
    fn test_negative_damage_is_malformed() {
        let ctx = context();
        let action = PlayerAction::parse("gouge its eyes", &ctx.enemy);
        let mut value = good_verdict();
        value["damage_taken"] = json!(-5);
        assert!(matches!(
            Verdict::parse(value, &ctx, &action),
            Err(AiError::Malformed(_))
        ));
    }

    #[test]
    fn test_claude_error_mapping() {
        assert_eq!(AiError::from(claude::Error::Timeout), AiError::Timeout);
        assert!(matches!(
            AiError::from(claude::Error::NoApiKey),
            AiError::Disabled(_)
        ));
        assert!(matches!(
            AiError::from(claude::Error::Network("reset".into())),
            AiError::Transport(_)
        ));
    }

    #[test]
    fn test_verdict_tool_schema() {
        let tool = ClaudeBackend::verdict_tool();
        assert_eq!(tool.name, VERDICT_TOOL);
        let required = tool.input_schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("instant_death")));
        assert!(!required.contains(&json!("escaped")));
    }
}
