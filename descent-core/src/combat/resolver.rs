//! Strategy selection for a combat turn.
//!
//! The AI-backed strategy wins when it is configured, healthy, and answers in
//! time. Any failure (error, timeout, contract violation) puts it on a short
//! cooldown and the rules judge the turn instead. If the rules also fail the
//! turn degrades to a harmless flee attempt. Exactly one outcome is returned.

use super::{
    CombatContext, CombatOutcome, CombatStrategy, PlayerAction, RuleBasedStrategy, StrategyKind,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Which strategies may be tried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyPreference {
    /// AI first when available, rules otherwise.
    #[default]
    Auto,
    /// Skip the AI entirely.
    RuleBasedOnly,
}

/// Why the AI did not judge a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FallbackReason {
    NotConfigured,
    Timeout,
    Failed { error: String },
    CoolingDown { turns_left: u32 },
    /// The rules could not judge either.
    RulesFailed { error: String },
}

/// The outcome of a turn and which strategy produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTurn {
    pub outcome: CombatOutcome,
    pub strategy: StrategyKind,
    pub fallback: Option<FallbackReason>,
}

/// Picks a strategy per turn and guarantees one outcome.
pub struct CombatResolver {
    ai: Option<Arc<dyn CombatStrategy>>,
    rules: Arc<dyn CombatStrategy>,
    ai_timeout: Duration,
    cooldown_turns: u32,
    cooldown_left: u32,
}

impl CombatResolver {
    /// A resolver with rules only.
    pub fn new(rules: RuleBasedStrategy) -> Self {
        Self {
            ai: None,
            rules: Arc::new(rules),
            ai_timeout: Duration::from_secs(8),
            cooldown_turns: 3,
            cooldown_left: 0,
        }
    }

    pub fn with_ai(mut self, ai: Arc<dyn CombatStrategy>) -> Self {
        self.ai = Some(ai);
        self
    }

    /// Replace the rule strategy.
    pub fn with_rules(mut self, rules: Arc<dyn CombatStrategy>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_timeout(mut self, ai_timeout: Duration) -> Self {
        self.ai_timeout = ai_timeout;
        self
    }

    pub fn with_cooldown(mut self, turns: u32) -> Self {
        self.cooldown_turns = turns;
        self
    }

    pub fn has_ai(&self) -> bool {
        self.ai.is_some()
    }

    /// Turns until the AI is tried again.
    pub fn cooldown_left(&self) -> u32 {
        self.cooldown_left
    }

    /// Judge one turn.
    pub async fn resolve(
        &mut self,
        context: &CombatContext,
        action: &PlayerAction,
        seed: u64,
        preference: StrategyPreference,
    ) -> ResolvedTurn {
        let fallback = match (&self.ai, preference) {
            (_, StrategyPreference::RuleBasedOnly) | (None, _) => Some(FallbackReason::NotConfigured),
            (Some(_), _) if self.cooldown_left > 0 => {
                self.cooldown_left -= 1;
                Some(FallbackReason::CoolingDown {
                    turns_left: self.cooldown_left,
                })
            }
            (Some(ai), _) => {
                match timeout(self.ai_timeout, ai.evaluate(context, action, seed)).await {
                    Ok(Ok(outcome)) => {
                        debug!(strategy = %StrategyKind::AiBacked, success = outcome.success, "Combat turn resolved");
                        return ResolvedTurn {
                            outcome,
                            strategy: StrategyKind::AiBacked,
                            fallback: None,
                        };
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "AI combat judge failed, falling back to rules");
                        self.cooldown_left = self.cooldown_turns;
                        Some(FallbackReason::Failed {
                            error: e.to_string(),
                        })
                    }
                    Err(_) => {
                        warn!(timeout_ms = self.ai_timeout.as_millis() as u64, "AI combat judge timed out, falling back to rules");
                        self.cooldown_left = self.cooldown_turns;
                        Some(FallbackReason::Timeout)
                    }
                }
            }
        };

        match self.rules.evaluate(context, action, seed).await {
            Ok(outcome) => {
                debug!(strategy = %StrategyKind::RuleBased, success = outcome.success, "Combat turn resolved");
                ResolvedTurn {
                    outcome,
                    strategy: StrategyKind::RuleBased,
                    fallback,
                }
            }
            Err(e) => {
                warn!(error = %e, "Rule-based combat failed, using safe flee attempt");
                ResolvedTurn {
                    outcome: CombatOutcome::flee_attempt(),
                    strategy: StrategyKind::SafeFallback,
                    fallback: Some(FallbackReason::RulesFailed {
                        error: e.to_string(),
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::{AiStrategy, CombatError, Enemy, Environment, PlayerSnapshot};
    use crate::state::Stats;
    use crate::testing::{MockReasoner, MockReply};
    use async_trait::async_trait;

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
                has_light: true,
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

    fn ai(reply: MockReply) -> Arc<dyn CombatStrategy> {
        Arc::new(AiStrategy::new(Arc::new(MockReasoner::new(vec![reply]))))
    }

    struct BrokenRules;

    #[async_trait]
    impl CombatStrategy for BrokenRules {
        fn kind(&self) -> StrategyKind {
            StrategyKind::RuleBased
        }

        async fn evaluate(
            &self,
            _context: &CombatContext,
            _action: &PlayerAction,
            _seed: u64,
        ) -> Result<CombatOutcome, CombatError> {
            Err(CombatError::InvalidContext("broken".into()))
        }
    }

    #[tokio::test]
    async fn test_rules_only_without_ai() {
        let mut resolver = CombatResolver::new(RuleBasedStrategy::default());
        let ctx = context();
        let action = PlayerAction::parse("gouge its eyes", &ctx.enemy);
        let turn = resolver.resolve(&ctx, &action, 1, StrategyPreference::Auto).await;
        assert_eq!(turn.strategy, StrategyKind::RuleBased);
        assert_eq!(turn.fallback, Some(FallbackReason::NotConfigured));
    }

    #[tokio::test]
    async fn test_ai_wins_when_healthy() {
        let mut resolver =
            CombatResolver::new(RuleBasedStrategy::default()).with_ai(ai(MockReply::success(15)));
        let ctx = context();
        let action = PlayerAction::parse("gouge its eyes", &ctx.enemy);
        let turn = resolver.resolve(&ctx, &action, 1, StrategyPreference::Auto).await;
        assert_eq!(turn.strategy, StrategyKind::AiBacked);
        assert_eq!(turn.outcome.damage_dealt, 15);
        assert!(turn.fallback.is_none());
    }

    #[tokio::test]
    async fn test_rule_preference_skips_ai() {
        let mut resolver =
            CombatResolver::new(RuleBasedStrategy::default()).with_ai(ai(MockReply::success(15)));
        let ctx = context();
        let action = PlayerAction::parse("gouge its eyes", &ctx.enemy);
        let turn = resolver
            .resolve(&ctx, &action, 1, StrategyPreference::RuleBasedOnly)
            .await;
        assert_eq!(turn.strategy, StrategyKind::RuleBased);
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_rules() {
        let mut resolver = CombatResolver::new(RuleBasedStrategy::default())
            .with_ai(ai(MockReply::Hang))
            .with_timeout(Duration::from_millis(50));
        let ctx = context();
        let action = PlayerAction::parse("gouge its eyes", &ctx.enemy);

        let expected = RuleBasedStrategy::default().resolve(&ctx, &action, 9).unwrap();
        let turn = resolver.resolve(&ctx, &action, 9, StrategyPreference::Auto).await;
        assert_eq!(turn.strategy, StrategyKind::RuleBased);
        assert_eq!(turn.fallback, Some(FallbackReason::Timeout));
        assert_eq!(turn.outcome, expected);
    }

    #[tokio::test]
    async fn test_malformed_reply_falls_back_and_cools_down() {
        let mut resolver = CombatResolver::new(RuleBasedStrategy::default())
            .with_ai(ai(MockReply::Malformed))
            .with_cooldown(2);
        let ctx = context();
        let action = PlayerAction::parse("gouge its eyes", &ctx.enemy);

        let turn = resolver.resolve(&ctx, &action, 1, StrategyPreference::Auto).await;
        assert!(matches!(turn.fallback, Some(FallbackReason::Failed { .. })));
        assert_eq!(resolver.cooldown_left(), 2);

        let turn = resolver.resolve(&ctx, &action, 2, StrategyPreference::Auto).await;
        assert_eq!(
            turn.fallback,
            Some(FallbackReason::CoolingDown { turns_left: 1 })
        );
        let turn = resolver.resolve(&ctx, &action, 3, StrategyPreference::Auto).await;
        assert_eq!(
            turn.fallback,
            Some(FallbackReason::CoolingDown { turns_left: 0 })
        );
        assert_eq!(resolver.cooldown_left(), 0);
    }

    #[tokio::test]
    async fn test_both_failing_degrades_to_flee_attempt() {
        let mut resolver = CombatResolver::new(RuleBasedStrategy::default())
            .with_ai(ai(MockReply::Fail))
            .with_rules(Arc::new(BrokenRules));
        let ctx = context();
        let action = PlayerAction::parse("gouge its eyes", &ctx.enemy);
        let turn = resolver.resolve(&ctx, &action, 1, StrategyPreference::Auto).await;
        assert_eq!(turn.strategy, StrategyKind::SafeFallback);
        assert_eq!(turn.outcome, CombatOutcome::flee_attempt());
        assert!(!turn.outcome.instant_death);
    }
}
