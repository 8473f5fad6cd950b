//! Deterministic rule-based combat.
//!
//! Pure closed-form resolution: given the same context, action, and seed the
//! outcome is identical. All maths is integer percentages.

use super::{
    ActionKind, AttackStyle, CombatContext, CombatError, CombatOutcome, CombatStrategy,
    CombatTarget, Footing, LightLevel, PlayerAction, StatusApplication, StrategyKind,
};
use crate::config::CombatTuning;
use crate::dice::Roller;
use crate::status::StatusKind;
use async_trait::async_trait;

/// Closed-form combat rules.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedStrategy {
    tuning: CombatTuning,
}

impl RuleBasedStrategy {
    pub fn new(tuning: CombatTuning) -> Self {
        Self { tuning }
    }

    pub fn tuning(&self) -> &CombatTuning {
        &self.tuning
    }

    /// Resolve one turn.
    pub fn resolve(
        &self,
        ctx: &CombatContext,
        action: &PlayerAction,
        seed: u64,
    ) -> Result<CombatOutcome, CombatError> {
        if ctx.enemy_health <= 0 {
            return Err(CombatError::InvalidContext(format!(
                "{} is already dead",
                ctx.enemy.name
            )));
        }
        if ctx.player.health <= 0 {
            return Err(CombatError::InvalidContext("player is already dead".into()));
        }

        let mut roller = Roller::new(seed);

        if !ctx.player.can_act {
            let mut outcome = CombatOutcome::failure("You are reeling and cannot act.");
            self.counterattack(ctx, &mut roller, &mut outcome);
            return Ok(outcome);
        }

        let outcome = match &action.kind {
            ActionKind::Vague => {
                let mut outcome = CombatOutcome::failure(format!(
                    "You hesitate, without a clear plan. The {} does not.",
                    ctx.enemy.name
                ));
                self.counterattack(ctx, &mut roller, &mut outcome);
                outcome
            }
            ActionKind::Flee => self.flee(ctx, &mut roller),
            ActionKind::Dodge => self.dodge(ctx, &mut roller),
            ActionKind::Attack { style, target } => self.attack(ctx, *style, target.as_deref(), &mut roller),
        };
        Ok(outcome)
    }

    fn footing_penalty(&self, ctx: &CombatContext) -> i32 {
        match ctx.environment.footing {
            Footing::Stable => 0,
            Footing::Slippery => self.tuning.slippery_penalty,
            Footing::Submerged => self.tuning.submerged_penalty,
        }
    }

    fn missing_leg_penalty(&self, ctx: &CombatContext) -> i32 {
        (2 - ctx.player.legs.min(2) as i32) * self.tuning.missing_leg_penalty
    }

    fn flee(&self, ctx: &CombatContext, roller: &mut Roller) -> CombatOutcome {
        if ctx.player.legs == 0 {
            let mut outcome = CombatOutcome::failure("With no legs beneath you, there is no running.");
            self.counterattack(ctx, roller, &mut outcome);
            return outcome;
        }
        let chance = self.tuning.flee_base + ctx.player.agility * self.tuning.flee_per_agility
            - self.missing_leg_penalty(ctx)
            - self.footing_penalty(ctx);
        if roller.percent(chance).succeeded() {
            CombatOutcome {
                success: true,
                escaped: true,
                ..CombatOutcome::failure(format!("You break away from the {} and run.", ctx.enemy.name))
            }
        } else {
            let mut outcome = CombatOutcome::failure(format!(
                "You turn to run, but the {} cuts you off.",
                ctx.enemy.name
            ));
            self.counterattack(ctx, roller, &mut outcome);
            outcome
        }
    }

    fn dodge(&self, ctx: &CombatContext, roller: &mut Roller) -> CombatOutcome {
        if ctx.player.legs == 0 {
            let mut outcome = CombatOutcome::failure("You cannot move out of the way.");
            self.counterattack(ctx, roller, &mut outcome);
            return outcome;
        }
        let light_bonus = if ctx.effective_light() == LightLevel::Lit {
            self.tuning.dodge_light_bonus
        } else {
            0
        };
        let chance = ctx.player.agility * self.tuning.dodge_per_agility + light_bonus
            - self.missing_leg_penalty(ctx)
            - self.footing_penalty(ctx);
        if roller.percent(chance).succeeded() {
            CombatOutcome {
                success: true,
                ..CombatOutcome::failure(format!(
                    "The {} lunges and meets only air.",
                    ctx.enemy.name
                ))
            }
        } else {
            let mut outcome = CombatOutcome::failure("You move too late.");
            self.landed_counter(ctx, roller, &mut outcome);
            outcome
        }
    }

    fn attack(
        &self,
        ctx: &CombatContext,
        style: AttackStyle,
        target: Option<&str>,
        roller: &mut Roller,
    ) -> CombatOutcome {
        let player = &ctx.player;

        // Body-part gating.
        let gated = match style {
            AttackStyle::Melee => player.arms == 0 && !player.has_ranged_weapon(),
            AttackStyle::Kick => player.legs == 0,
            AttackStyle::Ranged => false,
        };
        if gated {
            return self.defenceless(ctx);
        }
        if style == AttackStyle::Ranged && !player.has_ranged_weapon() {
            let mut outcome = CombatOutcome::failure("You have nothing to loose at it.");
            self.counterattack(ctx, roller, &mut outcome);
            return outcome;
        }

        // Fire only works with a flame in hand.
        let target = target.filter(|t| !is_fire(t) || player.has_light);

        let light = ctx.effective_light();
        let light_accuracy = match light {
            LightLevel::Lit => 0,
            LightLevel::Dim => self.tuning.dim_accuracy_penalty,
            LightLevel::Dark => self.tuning.darkness_accuracy_penalty,
        };
        let blind = if player.can_see { 0 } else { self.tuning.blind_accuracy_penalty };
        let accuracy = self.tuning.base_accuracy + player.agility * self.tuning.accuracy_per_agility
            - light_accuracy
            - blind
            - self.footing_penalty(ctx);

        if !roller.percent(accuracy).succeeded() {
            let mut outcome = CombatOutcome::failure(format!("You miss the {}.", ctx.enemy.name));
            self.counterattack(ctx, roller, &mut outcome);
            return outcome;
        }

        let bonus = match style {
            AttackStyle::Kick => self.tuning.kick_bonus,
            AttackStyle::Melee | AttackStyle::Ranged => player.weapon_bonus(),
        };
        let variance = roller.range(0, self.tuning.damage_variance);
        let light_pct = match light {
            LightLevel::Lit => 100,
            LightLevel::Dim => self.tuning.dim_damage_pct,
            LightLevel::Dark => self.tuning.dark_damage_pct,
        };
        let mut damage = (player.stats.strength + bonus + variance) * light_pct / 100;
        if target.is_some() {
            damage = damage * self.tuning.weak_point_multiplier_pct / 100;
        }

        let weapon_crit = if style == AttackStyle::Kick {
            0
        } else {
            player.weapon.as_ref().map(|w| w.crit_bonus).unwrap_or(0)
        };
        let crit_chance = self.tuning.crit_base_pct
            + player.agility * self.tuning.crit_per_agility_pct
            + weapon_crit
            + player.crit_bonus;
        let critical = roller.percent(crit_chance).succeeded();
        if critical {
            damage = damage * self.tuning.crit_multiplier_pct / 100;
        }
        let damage = (damage - ctx.enemy.defense).max(1);

        let mut narrative = match target {
            Some(weak) => format!("You strike the {}'s {}", ctx.enemy.name, weak),
            None => format!("You hit the {}", ctx.enemy.name),
        };
        if critical {
            narrative.push_str(" with brutal precision");
        }
        narrative.push('.');

        let mut outcome = CombatOutcome {
            success: true,
            damage_dealt: damage,
            ..CombatOutcome::failure(narrative)
        };
        if let Some(weak) = target {
            if let Some(status) = weakness_status(weak) {
                outcome.status_effects.push(status);
            }
        }

        if damage < ctx.enemy_health {
            self.counterattack(ctx, roller, &mut outcome);
        }
        outcome
    }

    /// Offensive action the body cannot perform.
    fn defenceless(&self, ctx: &CombatContext) -> CombatOutcome {
        if ctx.enemy.lethal {
            CombatOutcome {
                instant_death: true,
                damage_taken: ctx.player.health,
                ..CombatOutcome::failure(format!(
                    "You have nothing left to fight with. The {} falls on you.",
                    ctx.enemy.name
                ))
            }
        } else {
            let partial = (ctx.enemy.attack * self.tuning.non_lethal_partial_pct / 100).max(1);
            CombatOutcome {
                damage_taken: partial,
                ..CombatOutcome::failure(format!(
                    "You flail uselessly and the {} batters you.",
                    ctx.enemy.name
                ))
            }
        }
    }

    /// Roll for a counterattack and apply it to `outcome`.
    fn counterattack(&self, ctx: &CombatContext, roller: &mut Roller, outcome: &mut CombatOutcome) {
        if ctx.enemy_has(StatusKind::Stunned) {
            return;
        }
        let slowed = if ctx.enemy_has(StatusKind::Slowed) {
            self.tuning.slowed_enemy_counter_penalty
        } else {
            0
        };
        let chance = ctx.enemy.aggression - ctx.player.armor_bonus * self.tuning.counter_armor_factor - slowed;
        if roller.percent(chance).succeeded() {
            self.landed_counter(ctx, roller, outcome);
        }
    }

    fn landed_counter(&self, ctx: &CombatContext, roller: &mut Roller, outcome: &mut CombatOutcome) {
        if ctx.enemy_has(StatusKind::Stunned) {
            return;
        }
        let variance = roller.range(0, self.tuning.damage_variance);
        let damage = (ctx.enemy.attack + variance - ctx.player.armor_bonus).max(1);
        outcome.damage_taken += damage;
        outcome
            .narrative
            .push_str(&format!(" The {} strikes back.", ctx.enemy.name));
    }
}

fn is_fire(target: &str) -> bool {
    matches!(target, "fire" | "flame" | "flames")
}

fn weakness_status(target: &str) -> Option<StatusApplication> {
    if is_fire(target) {
        return Some(StatusApplication {
            target: CombatTarget::Enemy,
            kind: StatusKind::Burning,
            duration: 2,
            magnitude: 3,
        });
    }
    if target == "eyes" {
        return Some(StatusApplication {
            target: CombatTarget::Enemy,
            kind: StatusKind::Stunned,
            duration: 1,
            magnitude: 0,
        });
    }
    None
}

#[async_trait]
impl CombatStrategy for RuleBasedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RuleBased
    }

    async fn evaluate(
        &self,
        context: &CombatContext,
        action: &PlayerAction,
        seed: u64,
    ) -> Result<CombatOutcome, CombatError> {
        self.resolve(context, action, seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::{Enemy, Environment, PlayerSnapshot, WeaponSnapshot};
    use crate::state::Stats;

    fn ghoul() -> Enemy {
        Enemy::new("Ghoul", 40, 8)
            .with_weakness("fire")
            .with_weakness("eyes")
            .lethal()
    }

    fn player() -> PlayerSnapshot {
        PlayerSnapshot {
            stats: Stats::default(),
            agility: 5,
            health: 60,
            max_health: 100,
            weapon: Some(WeaponSnapshot {
                name: "Guard's Sword".into(),
                bonus: 10,
                crit_bonus: 0,
                ranged: false,
                broken: false,
            }),
            armor_bonus: 0,
            has_light: true,
            arms: 2,
            legs: 2,
            can_see: true,
            can_act: true,
            crit_bonus: 0,
            statuses: Vec::new(),
        }
    }

    fn context(enemy: Enemy, player: PlayerSnapshot) -> CombatContext {
        CombatContext {
            enemy_health: enemy.health,
            enemy,
            enemy_statuses: Vec::new(),
            environment: Environment::default(),
            player,
            round: 1,
        }
    }

    fn rules() -> RuleBasedStrategy {
        RuleBasedStrategy::default()
    }

    #[test]
    fn test_deterministic_for_seed() {
        let ctx = context(ghoul(), player());
        let action = PlayerAction::parse("slash at it", &ctx.enemy);
        for seed in 0..50 {
            let a = rules().resolve(&ctx, &action, seed).unwrap();
            let b = rules().resolve(&ctx, &action, seed).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_armless_melee_against_lethal_is_instant_death() {
        let mut p = player();
        p.arms = 0;
        p.weapon = None;
        let ctx = context(ghoul(), p);
        let action = PlayerAction::parse("punch it in the eyes", &ctx.enemy);
        for seed in 0..50 {
            let outcome = rules().resolve(&ctx, &action, seed).unwrap();
            assert!(outcome.instant_death);
            assert!(!outcome.success);
            assert_eq!(outcome.damage_dealt, 0);
        }
    }

    #[test]
    fn test_armless_melee_against_non_lethal_is_partial() {
        let mut p = player();
        p.arms = 0;
        p.weapon = None;
        let ctx = context(Enemy::new("Rat", 10, 6), p);
        let action = PlayerAction::parse("hit the rat", &ctx.enemy);
        let outcome = rules().resolve(&ctx, &action, 3).unwrap();
        assert!(!outcome.instant_death);
        assert!(!outcome.success);
        assert_eq!(outcome.damage_taken, 3);
    }

    #[test]
    fn test_armless_with_ranged_weapon_can_attack() {
        let mut p = player();
        p.arms = 0;
        p.weapon = Some(WeaponSnapshot {
            name: "Sling".into(),
            bonus: 5,
            crit_bonus: 0,
            ranged: true,
            broken: false,
        });
        let ctx = context(ghoul(), p);
        let action = PlayerAction::parse("strike it", &ctx.enemy);
        for seed in 0..20 {
            assert!(!rules().resolve(&ctx, &action, seed).unwrap().instant_death);
        }
    }

    #[test]
    fn test_vague_action_always_fails() {
        let ctx = context(ghoul(), player());
        let action = PlayerAction::parse("do something heroic", &ctx.enemy);
        for seed in 0..50 {
            let outcome = rules().resolve(&ctx, &action, seed).unwrap();
            assert!(!outcome.success);
            assert_eq!(outcome.damage_dealt, 0);
        }
    }

    #[test]
    fn test_weak_point_beats_generic_on_average() {
        let ctx = context(ghoul().with_aggression(0), player());
        let generic = PlayerAction::parse("slash it", &ctx.enemy);
        let weak = PlayerAction::parse("slash its eyes", &ctx.enemy);
        let total = |action: &PlayerAction| -> i32 {
            (0..200)
                .map(|seed| rules().resolve(&ctx, action, seed).unwrap().damage_dealt)
                .sum()
        };
        assert!(total(&weak) > total(&generic));
    }

    #[test]
    fn test_eyes_stun_enemy() {
        let ctx = context(ghoul().with_aggression(0), player());
        let action = PlayerAction::parse("gouge its eyes", &ctx.enemy);
        let hit = (0..100)
            .map(|seed| rules().resolve(&ctx, &action, seed).unwrap())
            .find(|o| o.success)
            .unwrap();
        assert_eq!(hit.status_effects[0].kind, StatusKind::Stunned);
        assert_eq!(hit.status_effects[0].target, CombatTarget::Enemy);
    }

    #[test]
    fn test_fire_needs_light() {
        let mut p = player();
        p.has_light = false;
        let ctx = context(ghoul().with_aggression(0), p);
        let action = PlayerAction::parse("burn it with fire", &ctx.enemy);
        for seed in 0..50 {
            let outcome = rules().resolve(&ctx, &action, seed).unwrap();
            assert!(outcome.status_effects.is_empty());
        }
    }

    #[test]
    fn test_damage_floor_is_one() {
        let ctx = context(ghoul().with_defense(500).with_aggression(0), player());
        let action = PlayerAction::parse("slash it", &ctx.enemy);
        for seed in 0..50 {
            let outcome = rules().resolve(&ctx, &action, seed).unwrap();
            if outcome.success {
                assert_eq!(outcome.damage_dealt, 1);
            }
        }
    }

    #[test]
    fn test_stunned_enemy_never_counters() {
        let mut ctx = context(ghoul().with_aggression(100), player());
        ctx.enemy_statuses.push(StatusKind::Stunned);
        let action = PlayerAction::parse("I wave my arms", &ctx.enemy);
        for seed in 0..50 {
            assert_eq!(rules().resolve(&ctx, &action, seed).unwrap().damage_taken, 0);
        }
    }

    #[test]
    fn test_full_aggression_always_counters_a_miss() {
        let ctx = context(ghoul().with_aggression(100), player());
        let action = PlayerAction::parse("I wave my arms", &ctx.enemy);
        for seed in 0..50 {
            assert!(rules().resolve(&ctx, &action, seed).unwrap().damage_taken >= 8);
        }
    }

    #[test]
    fn test_legless_cannot_flee() {
        let mut p = player();
        p.legs = 0;
        let ctx = context(ghoul(), p);
        let action = PlayerAction::parse("run away", &ctx.enemy);
        for seed in 0..50 {
            assert!(!rules().resolve(&ctx, &action, seed).unwrap().escaped);
        }
    }

    #[test]
    fn test_flee_sometimes_escapes() {
        let ctx = context(ghoul(), player());
        let action = PlayerAction::parse("flee", &ctx.enemy);
        let escapes = (0..100)
            .filter(|seed| rules().resolve(&ctx, &action, *seed).unwrap().escaped)
            .count();
        assert!(escapes > 0 && escapes < 100);
    }

    #[test]
    fn test_dead_enemy_is_invalid() {
        let mut ctx = context(ghoul(), player());
        ctx.enemy_health = 0;
        let action = PlayerAction::parse("slash", &ctx.enemy);
        assert!(matches!(
            rules().resolve(&ctx, &action, 0),
            Err(CombatError::InvalidContext(_))
        ));
    }

    #[test]
    fn test_environment_penalties_reduce_hits() {
        let lit = context(ghoul().with_aggression(0), player());
        let mut dark_p = player();
        dark_p.has_light = false;
        let mut dark = context(ghoul().with_aggression(0), dark_p);
        dark.environment.footing = Footing::Submerged;
        let action = PlayerAction::parse("slash it", &lit.enemy);
        let hits = |ctx: &CombatContext| {
            (0..300)
                .filter(|seed| rules().resolve(ctx, &action, *seed).unwrap().success)
                .count()
        };
        assert!(hits(&lit) > hits(&dark));
    }
}
