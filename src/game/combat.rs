//! Attack Resolution
//!
//! Damage, target legality, and healing. Pure functions over towers.

use crate::game::catalog::{Tower, TowerKind};

/// Critical hits raise attack to 120%, rounded up.
pub const CRIT_ATTACK_PERCENT: i32 = 120;

/// Damage dealt by `attack` against `defense`. Never negative.
///
/// A critical hit raises attack to 120% (rounded up) before defense is
/// subtracted, so any hit that would do damage does strictly more as a crit.
#[inline]
pub fn calculate_damage(attack: i32, defense: i32, critical: bool) -> i32 {
    let attack = attack.max(0);
    let attack = if critical {
        (attack * CRIT_ATTACK_PERCENT + 99) / 100
    } else {
        attack
    };
    (attack - defense).max(0)
}

/// Have all Guard Towers fallen?
pub fn guards_down(towers: &[Tower]) -> bool {
    towers
        .iter()
        .filter(|t| t.kind == TowerKind::Guard)
        .all(Tower::is_destroyed)
}

/// Indices of towers that may be attacked.
///
/// Destroyed towers are never targets. The King Tower is a target only
/// once every Guard Tower on its side is destroyed.
pub fn legal_targets(towers: &[Tower]) -> Vec<usize> {
    let king_open = guards_down(towers);
    towers
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.is_destroyed())
        .filter(|(_, t)| t.kind != TowerKind::King || king_open)
        .map(|(i, _)| i)
        .collect()
}

/// Number of destroyed towers.
pub fn count_destroyed(towers: &[Tower]) -> usize {
    towers.iter().filter(|t| t.is_destroyed()).count()
}

/// Result of a heal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealOutcome {
    /// Hit points restored.
    Healed {
        /// Tower index.
        index: usize,
        /// Tower kind.
        kind: TowerKind,
        /// Hit points before.
        from: i32,
        /// Hit points after.
        to: i32,
    },
    /// Weakest standing tower is already at or above the cap.
    AlreadyFull {
        /// Tower kind.
        kind: TowerKind,
    },
    /// Every tower is destroyed.
    NoStandingTowers,
}

impl HealOutcome {
    /// Did any tower gain hit points?
    pub fn healed(&self) -> bool {
        matches!(self, HealOutcome::Healed { .. })
    }
}

/// Heal the standing tower with the fewest hit points by `amount`,
/// never above `cap`. Destroyed towers stay destroyed.
pub fn heal_weakest(towers: &mut [Tower], amount: i32, cap: i32) -> HealOutcome {
    let Some((index, tower)) = towers
        .iter_mut()
        .enumerate()
        .filter(|(_, t)| !t.is_destroyed())
        .min_by_key(|(_, t)| t.hp)
    else {
        return HealOutcome::NoStandingTowers;
    };

    let gain = amount.min(cap - tower.hp);
    if gain <= 0 {
        return HealOutcome::AlreadyFull { kind: tower.kind };
    }

    let from = tower.hp;
    tower.hp += gain;
    HealOutcome::Healed {
        index,
        kind: tower.kind,
        from,
        to: tower.hp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tower(kind: TowerKind, hp: i32, defense: i32) -> Tower {
        Tower { kind, hp, attack: 0, defense, crit: 0.0, exp: 0 }
    }

    fn standard_set() -> Vec<Tower> {
        vec![
            tower(TowerKind::Guard, 1000, 5),
            tower(TowerKind::Guard, 1000, 5),
            tower(TowerKind::King, 2000, 10),
        ]
    }

    #[test]
    fn test_damage_basic() {
        assert_eq!(calculate_damage(10, 5, false), 5);
        assert_eq!(calculate_damage(300, 100, false), 200);
    }

    #[test]
    fn test_damage_floored() {
        assert_eq!(calculate_damage(5, 10, false), 0);
        assert_eq!(calculate_damage(0, 0, true), 0);
    }

    #[test]
    fn test_crit_damage() {
        // 300 * 1.2 = 360
        assert_eq!(calculate_damage(300, 100, true), 260);
        // 1 * 1.2 rounds up to 2
        assert_eq!(calculate_damage(1, 0, true), 2);
    }

    #[test]
    fn test_king_locked_behind_guards() {
        let mut towers = standard_set();
        assert_eq!(legal_targets(&towers), vec![0, 1]);

        towers[0].hp = 0;
        assert_eq!(legal_targets(&towers), vec![1]);

        towers[1].hp = -20;
        assert_eq!(legal_targets(&towers), vec![2]);

        towers[2].hp = 0;
        assert!(legal_targets(&towers).is_empty());
    }

    #[test]
    fn test_count_destroyed() {
        let mut towers = standard_set();
        assert_eq!(count_destroyed(&towers), 0);
        towers[1].hp = -5;
        assert_eq!(count_destroyed(&towers), 1);
    }

    #[test]
    fn test_heal_picks_weakest_standing() {
        let mut towers = standard_set();
        towers[0].hp = 0;
        towers[1].hp = 700;

        let outcome = heal_weakest(&mut towers, 200, 1000);
        assert_eq!(
            outcome,
            HealOutcome::Healed { index: 1, kind: TowerKind::Guard, from: 700, to: 900 }
        );
        // Destroyed tower untouched
        assert_eq!(towers[0].hp, 0);
    }

    #[test]
    fn test_heal_capped() {
        let mut towers = standard_set();
        towers[1].hp = 950;

        let outcome = heal_weakest(&mut towers, 200, 1000);
        assert_eq!(
            outcome,
            HealOutcome::Healed { index: 1, kind: TowerKind::Guard, from: 950, to: 1000 }
        );
    }

    #[test]
    fn test_heal_already_full() {
        let mut towers = standard_set();
        let outcome = heal_weakest(&mut towers, 200, 1000);
        assert_eq!(outcome, HealOutcome::AlreadyFull { kind: TowerKind::Guard });
        assert_eq!(towers, standard_set());
    }

    #[test]
    fn test_heal_nothing_standing() {
        let mut towers = standard_set();
        for t in &mut towers {
            t.hp = 0;
        }
        assert_eq!(heal_weakest(&mut towers, 200, 1000), HealOutcome::NoStandingTowers);
    }

    proptest! {
        #[test]
        fn prop_damage_never_negative(attack in -100i32..5000, defense in 0i32..5000, crit in any::<bool>()) {
            prop_assert!(calculate_damage(attack, defense, crit) >= 0);
        }

        #[test]
        fn prop_crit_strictly_stronger(defense in 0i32..5000, margin in 1i32..5000) {
            let attack = defense + margin;
            let base = calculate_damage(attack, defense, false);
            prop_assert_eq!(base, margin);
            prop_assert!(calculate_damage(attack, defense, true) > base);
        }

        #[test]
        fn prop_king_never_open_with_guard_standing(
            g1 in -50i32..100, g2 in -50i32..100, king in -50i32..100,
        ) {
            let towers = vec![
                tower(TowerKind::Guard, g1, 0),
                tower(TowerKind::Guard, g2, 0),
                tower(TowerKind::King, king, 0),
            ];
            let targets = legal_targets(&towers);
            if g1 > 0 || g2 > 0 {
                prop_assert!(!targets.contains(&2));
            }
            for i in targets {
                prop_assert!(towers[i].hp > 0);
            }
        }

        #[test]
        fn prop_heal_bounded(hps in proptest::collection::vec(-100i32..1500, 3)) {
            let mut towers = vec![
                tower(TowerKind::Guard, hps[0], 0),
                tower(TowerKind::Guard, hps[1], 0),
                tower(TowerKind::King, hps[2], 0),
            ];
            let before = towers.clone();
            heal_weakest(&mut towers, 200, 1000);
            for (b, a) in before.iter().zip(&towers) {
                prop_assert!(a.hp >= b.hp);
                prop_assert!(a.hp - b.hp <= 200);
                if a.hp != b.hp {
                    prop_assert!(b.hp > 0);
                    prop_assert!(a.hp <= 1000);
                }
            }
        }
    }
}
