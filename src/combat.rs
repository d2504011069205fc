//! Battle resolution.
//!
//! The engine hands every attack or raid arrival to a [`CombatResolver`].
//! The default [`StrengthModel`] compares summed attack against summed
//! defense, with defenders receiving a 25% bonus for fighting at home.

use serde::{Deserialize, Serialize};

use crate::config::Ruleset;
use crate::game::Troops;
use crate::travel::Purpose;

/// Defender's combat advantage multiplier.
/// At 0.25 the attacker needs 1.25x the defense to win.
const DEFENDER_BONUS: f64 = 0.25;

/// One battle to resolve.
#[derive(Debug, Clone, Copy)]
pub struct Battle<'a> {
    /// Attack or raid.
    pub purpose: Purpose,
    /// Arriving units.
    pub attackers: &'a Troops,
    /// Units stationed in the target village.
    pub defenders: &'a Troops,
    /// Unit stats.
    pub rules: &'a Ruleset,
}

/// Outcome of a battle.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BattleReport {
    /// Whether the attacker carried the field.
    pub attacker_won: bool,
    /// Attacking units left alive.
    pub attacker_survivors: Troops,
    /// Defending units left alive.
    pub defender_survivors: Troops,
}

/// Resolves battles. Implementations must be deterministic.
pub trait CombatResolver: Send + Sync {
    /// Resolve one battle.
    fn resolve(&self, battle: &Battle<'_>) -> BattleReport;
}

/// Summed-strength model with a defender bonus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrengthModel {
    defender_bonus: f64,
}

impl Default for StrengthModel {
    fn default() -> Self {
        Self {
            defender_bonus: DEFENDER_BONUS,
        }
    }
}

impl StrengthModel {
    /// A model with a custom defender bonus (0.25 = +25%).
    #[must_use]
    pub const fn with_defender_bonus(defender_bonus: f64) -> Self {
        Self { defender_bonus }
    }
}

/// Summed attack strength of `troops`.
#[must_use]
pub fn attack_strength(troops: &Troops, rules: &Ruleset) -> f64 {
    sum_stat(troops, rules, |u| u.attack)
}

/// Summed defense strength of `troops`.
#[must_use]
pub fn defense_strength(troops: &Troops, rules: &Ruleset) -> f64 {
    sum_stat(troops, rules, |u| u.defense)
}

/// Loyalty damage the conquest-capable units in `troops` can inflict.
#[must_use]
pub fn conquest_strength(troops: &Troops, rules: &Ruleset) -> f64 {
    troops
        .iter()
        .filter_map(|(name, n)| rules.unit(name).map(|u| u.conquest_power * f64::from(*n)))
        .sum()
}

/// Resources the units in `troops` can carry.
#[must_use]
pub fn carry_capacity(troops: &Troops, rules: &Ruleset) -> u64 {
    troops
        .iter()
        .filter_map(|(name, n)| rules.unit(name).map(|u| u.carry.saturating_mul(u64::from(*n))))
        .fold(0, u64::saturating_add)
}

fn sum_stat(troops: &Troops, rules: &Ruleset, stat: impl Fn(&crate::config::UnitRules) -> u32) -> f64 {
    troops
        .iter()
        .filter_map(|(name, n)| rules.unit(name).map(|u| f64::from(stat(u)) * f64::from(*n)))
        .sum()
}

/// Keep `1 - loss` of every stack, rounding survivors down.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn thin(troops: &Troops, loss: f64) -> Troops {
    let keep = (1.0 - loss).clamp(0.0, 1.0);
    troops
        .iter()
        .map(|(name, n)| (name.clone(), (f64::from(*n) * keep).floor() as u32))
        .filter(|(_, n)| *n > 0)
        .collect()
}

impl CombatResolver for StrengthModel {
    fn resolve(&self, battle: &Battle<'_>) -> BattleReport {
        let attack = attack_strength(battle.attackers, battle.rules);
        let defense = defense_strength(battle.defenders, battle.rules) * (1.0 + self.defender_bonus);
        let attacker_won = attack > defense;

        let (attacker_loss, defender_loss) = match battle.purpose {
            // raids are skirmishes: both sides bleed in proportion
            Purpose::Raid => {
                let total = attack + defense;
                if total > 0.0 {
                    (defense / total, attack / total)
                } else {
                    (0.0, 0.0)
                }
            }
            _ if attacker_won => (defense / attack, 1.0),
            _ if defense > 0.0 => (1.0, attack / defense),
            _ => (1.0, 0.0),
        };

        BattleReport {
            attacker_won,
            attacker_survivors: thin(battle.attackers, attacker_loss),
            defender_survivors: thin(battle.defenders, defender_loss),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn troops(entries: &[(&str, u32)]) -> Troops {
        entries.iter().map(|(n, c)| ((*n).to_string(), *c)).collect()
    }

    fn fight(purpose: Purpose, attackers: &Troops, defenders: &Troops) -> BattleReport {
        let rules = Ruleset::default();
        StrengthModel::default().resolve(&Battle {
            purpose,
            attackers,
            defenders,
            rules: &rules,
        })
    }

    #[test]
    fn test_undefended_village_falls_without_losses() {
        let attackers = troops(&[("imperian", 10)]);
        let report = fight(Purpose::Attack, &attackers, &Troops::new());
        assert!(report.attacker_won);
        assert_eq!(report.attacker_survivors, attackers);
    }

    #[test]
    fn test_defender_bonus_breaks_ties() {
        // 10 imperians: 700 attack; 14 praetorians: 910 defense * 1.25
        let report = fight(
            Purpose::Attack,
            &troops(&[("imperian", 10)]),
            &troops(&[("praetorian", 14)]),
        );
        assert!(!report.attacker_won);
        assert!(report.attacker_survivors.is_empty());
        assert!(!report.defender_survivors.is_empty());
    }

    #[test]
    fn test_winner_loses_proportionally() {
        // 100 imperians (7000) against 20 legionnaires (700 * 1.25 = 875)
        let report = fight(
            Purpose::Attack,
            &troops(&[("imperian", 100)]),
            &troops(&[("legionnaire", 20)]),
        );
        assert!(report.attacker_won);
        assert_eq!(report.attacker_survivors.get("imperian"), Some(&87));
        assert!(report.defender_survivors.is_empty());
    }

    #[test]
    fn test_raid_leaves_both_sides_standing() {
        let report = fight(
            Purpose::Raid,
            &troops(&[("imperian", 100)]),
            &troops(&[("legionnaire", 20)]),
        );
        assert!(report.attacker_won);
        assert!(!report.attacker_survivors.is_empty());
        assert!(!report.defender_survivors.is_empty());
    }

    #[test]
    fn test_strength_helpers() {
        let rules = Ruleset::default();
        let force = troops(&[("senator", 2), ("legionnaire", 3)]);
        assert!((conquest_strength(&force, &rules) - 50.0).abs() < f64::EPSILON);
        assert_eq!(carry_capacity(&force, &rules), 150);
        assert!((attack_strength(&force, &rules) - 220.0).abs() < f64::EPSILON);
    }
}
