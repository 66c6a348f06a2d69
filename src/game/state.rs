//! Game State Definitions
//!
//! Player and match state. `MatchState` holds everything the turn loop, the
//! mana ticker, and the clock watcher share, and owns every rule that
//! mutates it, so each rule runs under a single lock acquisition.

use rand::Rng;
use serde::Serialize;
use thiserror::Error;

use crate::game::catalog::{draw_troop, draw_troops, Tower, TowerKind, TowerSet, Troop};
use crate::game::combat::{calculate_damage, count_destroyed, heal_weakest, legal_targets, HealOutcome};
use crate::{
    EXP_DRAW, EXP_KING_LOSS, EXP_KING_WIN, EXP_TIMEOUT_LOSS, EXP_TIMEOUT_WIN, HAND_SIZE, MAX_MANA,
    STARTING_MANA,
};

// =============================================================================
// PLAYER
// =============================================================================

/// Experience needed to advance from `level` to the next.
pub fn exp_for_next_level(level: u32) -> u32 {
    100 + level.saturating_sub(1) * 10
}

/// A player: persistent progression plus per-match state.
#[derive(Clone, Debug, Serialize)]
pub struct Player {
    /// Unique username.
    pub username: String,
    /// Experience toward the next level.
    pub exp: u32,
    /// Current level (starts at 1).
    pub level: u32,
    /// Current mana.
    pub mana: i32,
    /// Troops in hand.
    pub hand: Vec<Troop>,
    /// Towers for this match.
    pub towers: Vec<Tower>,
    /// Critical-hit tokens left this match.
    pub crits_left: u32,
}

impl Player {
    /// New level-1 player with no match state.
    pub fn new(username: impl Into<String>) -> Self {
        Self::with_progress(username, 1, 0)
    }

    /// Player with existing progression.
    pub fn with_progress(username: impl Into<String>, level: u32, exp: u32) -> Self {
        Self {
            username: username.into(),
            exp,
            level: level.max(1),
            mana: 0,
            hand: Vec::new(),
            towers: Vec::new(),
            crits_left: 0,
        }
    }

    /// Reset per-match state for a new match.
    pub fn prepare_for_match(&mut self, hand: Vec<Troop>, towers: TowerSet, crit_tokens: u32) {
        self.hand = hand;
        self.towers = towers.to_vec();
        self.mana = STARTING_MANA;
        self.crits_left = crit_tokens;
    }

    /// Add experience, levelling up as thresholds are crossed.
    /// Returns the number of levels gained.
    pub fn add_experience(&mut self, amount: u32) -> u32 {
        self.exp += amount;
        let mut gained = 0;
        while self.exp >= exp_for_next_level(self.level) {
            self.exp -= exp_for_next_level(self.level);
            self.level += 1;
            gained += 1;
        }
        gained
    }

    /// Add mana, clamped to `max`.
    pub fn regenerate_mana(&mut self, rate: i32, max: i32) {
        if self.mana < max {
            self.mana = (self.mana + rate).min(max);
        }
    }

    /// Number of this player's towers that are destroyed.
    pub fn towers_lost(&self) -> usize {
        count_destroyed(&self.towers)
    }
}

// =============================================================================
// SEATS AND PHASES
// =============================================================================

/// Which side of the match a player sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Seat {
    /// Moves first.
    First,
    /// Moves second.
    Second,
}

impl Seat {
    /// Both seats in order.
    pub const BOTH: [Seat; 2] = [Seat::First, Seat::Second];

    /// Array index.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Seat::First => 0,
            Seat::Second => 1,
        }
    }

    /// The opposing seat.
    #[inline]
    pub fn other(self) -> Seat {
        match self {
            Seat::First => Seat::Second,
            Seat::Second => Seat::First,
        }
    }
}

/// Why a match ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// A King Tower fell.
    KingTowerDestroyed,
    /// The clock ran out.
    TimeExpired,
    /// A player's connection dropped.
    Disconnected,
}

/// How a match ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Why it ended.
    pub reason: EndReason,
    /// Winning seat, `None` for a draw.
    pub winner: Option<Seat>,
}

/// Match phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchPhase {
    /// Turns are being played.
    InProgress,
    /// Match concluded.
    Over(MatchOutcome),
    /// Asking both players about a rematch.
    RematchPending,
}

// =============================================================================
// REPORTS AND ERRORS
// =============================================================================

/// Rule violations during an attack. Reported to the acting player; the
/// turn still ends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttackError {
    /// Hand is empty.
    #[error("You have no troops to attack with.")]
    NoTroops,
    /// Troop index out of range.
    #[error("Invalid troop selection.")]
    InvalidTroop,
    /// Not enough mana for the troop.
    #[error("Not enough mana (have {available}, need {needed}).")]
    NotEnoughMana {
        /// Troop cost.
        needed: i32,
        /// Player's mana.
        available: i32,
    },
    /// Nothing on the opposing side can be attacked.
    #[error("No valid tower to attack.")]
    NoValidTarget,
    /// Target index out of range or not a legal target.
    #[error("Invalid tower selection.")]
    InvalidTarget,
    /// Healer troops cannot attack.
    #[error("That troop cannot attack.")]
    CannotAttack,
    /// Only healer troops can heal.
    #[error("That troop cannot heal.")]
    CannotHeal,
    /// No critical-hit tokens left.
    #[error("No critical hits left.")]
    NoCritTokens,
    /// The match ended before the action resolved.
    #[error("The match is already over.")]
    MatchOver,
}

/// Result of a resolved attack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackReport {
    /// Troop used.
    pub troop: String,
    /// Damage dealt.
    pub damage: i32,
    /// Kind of tower hit.
    pub tower: TowerKind,
    /// Tower hit points after the attack.
    pub tower_hp: i32,
    /// Was the hit critical?
    pub critical: bool,
    /// Did the tower fall?
    pub destroyed: bool,
    /// Set when this attack ended the match.
    pub outcome: Option<MatchOutcome>,
}

/// Result of playing a healer troop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealReport {
    /// Troop used.
    pub troop: String,
    /// What happened to the towers.
    pub outcome: HealOutcome,
}

/// Result of a match ended by the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutResult {
    /// Outcome.
    pub outcome: MatchOutcome,
    /// Opposing towers each seat destroyed, indexed by seat.
    pub destroyed: [usize; 2],
}

/// Read-only view sent for "Show Status".
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// Username.
    pub username: String,
    /// Level.
    pub level: u32,
    /// Experience.
    pub exp: u32,
    /// Mana.
    pub mana: i32,
    /// Own towers.
    pub towers: Vec<Tower>,
    /// Hand.
    pub troops: Vec<Troop>,
    /// Critical-hit tokens left.
    pub crits_left: u32,
}

// =============================================================================
// MATCH STATE
// =============================================================================

/// Shared state of one match.
#[derive(Debug, Clone)]
pub struct MatchState {
    players: [Player; 2],
    turn: Seat,
    phase: MatchPhase,
}

impl MatchState {
    /// Start a match with `first` to move.
    pub fn new(first: Player, second: Player) -> Self {
        Self {
            players: [first, second],
            turn: Seat::First,
            phase: MatchPhase::InProgress,
        }
    }

    /// Deal hands and towers to both players and reset their match state.
    pub fn deal<R: Rng + ?Sized>(
        &mut self,
        catalog: &[Troop],
        towers: &TowerSet,
        crit_tokens: u32,
        rng: &mut R,
    ) {
        for player in &mut self.players {
            let hand = draw_troops(catalog, HAND_SIZE, rng);
            player.prepare_for_match(hand, towers.clone(), crit_tokens);
        }
    }

    /// Player in `seat`.
    pub fn player(&self, seat: Seat) -> &Player {
        &self.players[seat.index()]
    }

    /// Mutable player in `seat`.
    pub fn player_mut(&mut self, seat: Seat) -> &mut Player {
        &mut self.players[seat.index()]
    }

    /// Both players, first seat first.
    pub fn players(&self) -> &[Player; 2] {
        &self.players
    }

    /// Whose turn it is.
    pub fn turn(&self) -> Seat {
        self.turn
    }

    /// Is the turn loop finished?
    pub fn is_over(&self) -> bool {
        self.phase != MatchPhase::InProgress
    }

    /// How the match ended, once it has.
    pub fn outcome(&self) -> Option<MatchOutcome> {
        match self.phase {
            MatchPhase::Over(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Pass the turn to the other seat. No-op once the match is over.
    pub fn rotate_turn(&mut self) {
        if !self.is_over() {
            self.turn = self.turn.other();
        }
    }

    /// Add mana to both players.
    pub fn regenerate_mana(&mut self, rate: i32, max: i32) {
        for player in &mut self.players {
            player.regenerate_mana(rate, max);
        }
    }

    /// Tower indices on `defender`'s side that may be attacked.
    pub fn legal_targets(&self, defender: Seat) -> Vec<usize> {
        legal_targets(&self.player(defender).towers)
    }

    /// Validate a troop choice against hand and mana.
    pub fn check_troop(&self, seat: Seat, troop_index: usize) -> Result<Troop, AttackError> {
        if self.is_over() {
            return Err(AttackError::MatchOver);
        }
        let player = self.player(seat);
        if player.hand.is_empty() {
            return Err(AttackError::NoTroops);
        }
        let troop = player.hand.get(troop_index).ok_or(AttackError::InvalidTroop)?;
        if player.mana < troop.mana {
            return Err(AttackError::NotEnoughMana {
                needed: troop.mana,
                available: player.mana,
            });
        }
        Ok(troop.clone())
    }

    /// Attack one of the opponent's towers.
    ///
    /// Spends the troop's mana, removes it from the hand, and spends a
    /// critical token if `critical`. Ends the match when a King Tower falls.
    pub fn apply_attack(
        &mut self,
        attacker: Seat,
        troop_index: usize,
        target_index: usize,
        critical: bool,
    ) -> Result<AttackReport, AttackError> {
        let troop = self.check_troop(attacker, troop_index)?;
        if troop.is_healer() {
            return Err(AttackError::CannotAttack);
        }
        let defender = attacker.other();
        if !self.legal_targets(defender).contains(&target_index) {
            return Err(AttackError::InvalidTarget);
        }
        if critical && self.player(attacker).crits_left == 0 {
            return Err(AttackError::NoCritTokens);
        }

        let player = self.player_mut(attacker);
        if critical {
            player.crits_left -= 1;
        }
        player.mana -= troop.mana;
        player.hand.remove(troop_index);

        let tower = &mut self.player_mut(defender).towers[target_index];
        let damage = calculate_damage(troop.attack, tower.defense, critical);
        tower.hp -= damage;
        let (kind, tower_hp, destroyed) = (tower.kind, tower.hp, tower.is_destroyed());

        let outcome = if destroyed && kind == TowerKind::King {
            Some(self.conclude(EndReason::KingTowerDestroyed, Some(attacker)))
        } else {
            None
        };

        Ok(AttackReport {
            troop: troop.name,
            damage,
            tower: kind,
            tower_hp,
            critical,
            destroyed,
            outcome,
        })
    }

    /// Play a healer troop on the owner's weakest standing tower.
    ///
    /// Mana and the card are spent only if a tower actually gains hit points.
    pub fn apply_heal(
        &mut self,
        seat: Seat,
        troop_index: usize,
        amount: i32,
        cap: i32,
    ) -> Result<HealReport, AttackError> {
        let troop = self.check_troop(seat, troop_index)?;
        if !troop.is_healer() {
            return Err(AttackError::CannotHeal);
        }

        let player = self.player_mut(seat);
        let outcome = heal_weakest(&mut player.towers, amount, cap);
        if outcome.healed() {
            player.mana -= troop.mana;
            player.hand.remove(troop_index);
        }

        Ok(HealReport {
            troop: troop.name,
            outcome,
        })
    }

    /// Draw a troop for a player sitting on full mana with a short hand.
    pub fn replenish_hand<R: Rng + ?Sized>(
        &mut self,
        seat: Seat,
        catalog: &[Troop],
        rng: &mut R,
    ) -> Option<Troop> {
        let player = self.player_mut(seat);
        if player.mana < MAX_MANA || player.hand.len() >= HAND_SIZE {
            return None;
        }
        let troop = draw_troop(catalog, rng)?;
        player.hand.push(troop.clone());
        Some(troop)
    }

    /// End the match on the clock. The seat that destroyed more opposing
    /// towers wins; equal counts draw. `None` if already over.
    pub fn conclude_by_time(&mut self) -> Option<TimeoutResult> {
        if self.is_over() {
            return None;
        }
        // Towers seat N destroyed are the ones the other seat lost.
        let destroyed = [
            self.player(Seat::Second).towers_lost(),
            self.player(Seat::First).towers_lost(),
        ];
        let winner = match destroyed[0].cmp(&destroyed[1]) {
            std::cmp::Ordering::Greater => Some(Seat::First),
            std::cmp::Ordering::Less => Some(Seat::Second),
            std::cmp::Ordering::Equal => None,
        };
        let outcome = self.conclude(EndReason::TimeExpired, winner);
        Some(TimeoutResult { outcome, destroyed })
    }

    /// End the match because `dropped` lost its connection. The other seat
    /// wins. `None` if already over.
    pub fn conclude_by_disconnect(&mut self, dropped: Seat) -> Option<MatchOutcome> {
        if self.is_over() {
            return None;
        }
        Some(self.conclude(EndReason::Disconnected, Some(dropped.other())))
    }

    /// Enter rematch negotiation.
    pub fn begin_rematch(&mut self) {
        self.phase = MatchPhase::RematchPending;
    }

    /// Status view for a seat.
    pub fn status(&self, seat: Seat) -> StatusSnapshot {
        let player = self.player(seat);
        StatusSnapshot {
            username: player.username.clone(),
            level: player.level,
            exp: player.exp,
            mana: player.mana,
            towers: player.towers.clone(),
            troops: player.hand.clone(),
            crits_left: player.crits_left,
        }
    }

    /// Set the final phase and award experience. Caller checks the match
    /// is still in progress.
    fn conclude(&mut self, reason: EndReason, winner: Option<Seat>) -> MatchOutcome {
        let outcome = MatchOutcome { reason, winner };
        self.phase = MatchPhase::Over(outcome);

        match (reason, winner) {
            (EndReason::KingTowerDestroyed, Some(w)) => {
                self.player_mut(w).add_experience(EXP_KING_WIN);
                self.player_mut(w.other()).add_experience(EXP_KING_LOSS);
            }
            (EndReason::TimeExpired, Some(w)) => {
                self.player_mut(w).add_experience(EXP_TIMEOUT_WIN);
                self.player_mut(w.other()).add_experience(EXP_TIMEOUT_LOSS);
            }
            (EndReason::TimeExpired, None) => {
                for player in &mut self.players {
                    player.add_experience(EXP_DRAW);
                }
            }
            // The player who stayed gets the timeout-win award; the leaver gets nothing.
            (EndReason::Disconnected, Some(w)) => {
                self.player_mut(w).add_experience(EXP_TIMEOUT_WIN);
            }
            _ => {}
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::catalog::StaticContent;
    use crate::{ContentSource, CRIT_TOKENS_PER_MATCH};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn knight() -> Troop {
        Troop {
            name: "Knight".into(),
            hp: 100,
            attack: 10,
            defense: 5,
            mana: 3,
            exp: 0,
            special: None,
        }
    }

    fn queen() -> Troop {
        Troop {
            name: "Queen".into(),
            hp: 0,
            attack: 0,
            defense: 0,
            mana: 5,
            exp: 0,
            special: Some(crate::game::catalog::TroopAbility::Heal),
        }
    }

    fn towers() -> TowerSet {
        let tower = |kind, hp, defense| Tower { kind, hp, attack: 0, defense, crit: 0.0, exp: 0 };
        [
            tower(TowerKind::Guard, 1000, 5),
            tower(TowerKind::Guard, 1000, 5),
            tower(TowerKind::King, 2000, 10),
        ]
    }

    fn match_with_hand(hand: Vec<Troop>) -> MatchState {
        let mut a = Player::new("alice");
        let mut b = Player::new("bob");
        a.prepare_for_match(hand, towers(), CRIT_TOKENS_PER_MATCH);
        b.prepare_for_match(vec![knight()], towers(), CRIT_TOKENS_PER_MATCH);
        MatchState::new(a, b)
    }

    #[test]
    fn test_knight_hits_guard() {
        let mut state = match_with_hand(vec![knight()]);

        let report = state.apply_attack(Seat::First, 0, 0, false).unwrap();

        assert_eq!(report.damage, 5);
        assert_eq!(report.tower_hp, 995);
        assert!(!report.destroyed);
        assert_eq!(state.player(Seat::Second).towers[0].hp, 995);
        assert_eq!(state.player(Seat::First).mana, STARTING_MANA - 3);
        assert!(state.player(Seat::First).hand.is_empty());
        assert!(!state.is_over());
    }

    #[test]
    fn test_crit_spends_token() {
        let mut state = match_with_hand(vec![knight()]);

        let report = state.apply_attack(Seat::First, 0, 1, true).unwrap();

        // ceil(10 * 1.2) - 5
        assert_eq!(report.damage, 7);
        assert!(report.critical);
        assert_eq!(state.player(Seat::First).crits_left, CRIT_TOKENS_PER_MATCH - 1);
    }

    #[test]
    fn test_crit_without_tokens_rejected() {
        let mut state = match_with_hand(vec![knight()]);
        state.player_mut(Seat::First).crits_left = 0;

        let result = state.apply_attack(Seat::First, 0, 0, true);
        assert_eq!(result, Err(AttackError::NoCritTokens));
        assert_eq!(state.player(Seat::First).hand.len(), 1);
    }

    #[test]
    fn test_king_protected_by_guards() {
        let mut state = match_with_hand(vec![knight()]);
        state.player_mut(Seat::Second).towers[0].hp = 0;

        let result = state.apply_attack(Seat::First, 0, 2, false);
        assert_eq!(result, Err(AttackError::InvalidTarget));
        assert_eq!(state.player(Seat::First).mana, STARTING_MANA);
    }

    #[test]
    fn test_destroyed_tower_not_targetable() {
        let mut state = match_with_hand(vec![knight()]);
        state.player_mut(Seat::Second).towers[0].hp = 0;

        let result = state.apply_attack(Seat::First, 0, 0, false);
        assert_eq!(result, Err(AttackError::InvalidTarget));
    }

    #[test]
    fn test_king_destruction_ends_match() {
        let mut state = match_with_hand(vec![knight()]);
        {
            let defender = state.player_mut(Seat::Second);
            defender.towers[0].hp = 0;
            defender.towers[1].hp = -3;
            defender.towers[2].hp = 1;
            defender.towers[2].defense = 0;
        }

        let report = state.apply_attack(Seat::First, 0, 2, false).unwrap();

        assert!(report.destroyed);
        let outcome = report.outcome.unwrap();
        assert_eq!(outcome.reason, EndReason::KingTowerDestroyed);
        assert_eq!(outcome.winner, Some(Seat::First));
        assert_eq!(state.outcome(), Some(outcome));
        assert_eq!(state.player(Seat::First).exp, EXP_KING_WIN);
        assert_eq!(state.player(Seat::Second).exp, EXP_KING_LOSS);
    }

    #[test]
    fn test_not_enough_mana() {
        let mut state = match_with_hand(vec![knight()]);
        state.player_mut(Seat::First).mana = 2;

        let result = state.apply_attack(Seat::First, 0, 0, false);
        assert_eq!(result, Err(AttackError::NotEnoughMana { needed: 3, available: 2 }));
        assert_eq!(state.player(Seat::First).hand.len(), 1);
        assert_eq!(state.player(Seat::Second).towers[0].hp, 1000);
    }

    #[test]
    fn test_empty_hand() {
        let state = match_with_hand(Vec::new());
        assert_eq!(state.check_troop(Seat::First, 0), Err(AttackError::NoTroops));
    }

    #[test]
    fn test_heal_spends_card() {
        let mut state = match_with_hand(vec![queen(), knight()]);
        state.player_mut(Seat::First).towers[1].hp = 400;

        let report = state.apply_heal(Seat::First, 0, 200, 1000).unwrap();

        assert_eq!(
            report.outcome,
            HealOutcome::Healed { index: 1, kind: TowerKind::Guard, from: 400, to: 600 }
        );
        let player = state.player(Seat::First);
        assert_eq!(player.mana, STARTING_MANA - 5);
        assert_eq!(player.hand.len(), 1);
        assert_eq!(player.hand[0].name, "Knight");
    }

    #[test]
    fn test_heal_at_full_keeps_card() {
        let mut state = match_with_hand(vec![queen()]);

        let report = state.apply_heal(Seat::First, 0, 200, 1000).unwrap();

        assert!(!report.outcome.healed());
        assert_eq!(state.player(Seat::First).mana, STARTING_MANA);
        assert_eq!(state.player(Seat::First).hand.len(), 1);
    }

    #[test]
    fn test_healer_cannot_attack() {
        let mut state = match_with_hand(vec![queen()]);
        let result = state.apply_attack(Seat::First, 0, 0, false);
        assert_eq!(result, Err(AttackError::CannotAttack));
    }

    #[test]
    fn test_timeout_winner() {
        let mut state = match_with_hand(vec![knight()]);
        // First destroyed two of Second's towers, Second destroyed one.
        state.player_mut(Seat::Second).towers[0].hp = 0;
        state.player_mut(Seat::Second).towers[1].hp = 0;
        state.player_mut(Seat::First).towers[0].hp = 0;

        let result = state.conclude_by_time().unwrap();

        assert_eq!(result.destroyed, [2, 1]);
        assert_eq!(result.outcome.winner, Some(Seat::First));
        assert_eq!(result.outcome.reason, EndReason::TimeExpired);
        assert_eq!(state.player(Seat::First).exp, EXP_TIMEOUT_WIN);
        assert_eq!(state.player(Seat::Second).exp, EXP_TIMEOUT_LOSS);
    }

    #[test]
    fn test_timeout_draw() {
        let mut state = match_with_hand(vec![knight()]);
        let result = state.conclude_by_time().unwrap();

        assert_eq!(result.outcome.winner, None);
        assert_eq!(state.player(Seat::First).exp, EXP_DRAW);
        assert_eq!(state.player(Seat::Second).exp, EXP_DRAW);
    }

    #[test]
    fn test_conclude_only_once() {
        let mut state = match_with_hand(vec![knight()]);

        assert!(state.conclude_by_time().is_some());
        assert!(state.conclude_by_time().is_none());
        assert!(state.conclude_by_disconnect(Seat::First).is_none());

        // Experience awarded once
        assert_eq!(state.player(Seat::First).exp, EXP_DRAW);
    }

    #[test]
    fn test_disconnect_awards_opponent() {
        let mut state = match_with_hand(vec![knight()]);

        let outcome = state.conclude_by_disconnect(Seat::Second).unwrap();

        assert_eq!(outcome.winner, Some(Seat::First));
        assert_eq!(outcome.reason, EndReason::Disconnected);
        assert_eq!(state.player(Seat::First).exp, EXP_TIMEOUT_WIN);
        assert_eq!(state.player(Seat::Second).exp, 0);
    }

    #[test]
    fn test_turn_alternates() {
        let mut state = match_with_hand(vec![knight()]);
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(state.turn());
            state.rotate_turn();
        }
        assert_eq!(seen, vec![Seat::First, Seat::Second, Seat::First, Seat::Second]);

        state.conclude_by_time();
        let before = state.turn();
        state.rotate_turn();
        assert_eq!(state.turn(), before);
    }

    #[test]
    fn test_replenish_needs_full_mana() {
        let catalog = StaticContent::standard().troops;
        let mut rng = StdRng::seed_from_u64(1);
        let mut state = match_with_hand(Vec::new());

        state.player_mut(Seat::First).mana = MAX_MANA - 1;
        assert!(state.replenish_hand(Seat::First, &catalog, &mut rng).is_none());

        state.player_mut(Seat::First).mana = MAX_MANA;
        assert!(state.replenish_hand(Seat::First, &catalog, &mut rng).is_some());
        assert_eq!(state.player(Seat::First).hand.len(), 1);
    }

    #[test]
    fn test_replenish_respects_hand_size() {
        let catalog = StaticContent::standard().troops;
        let mut rng = StdRng::seed_from_u64(2);
        let mut state = match_with_hand(vec![knight(), knight(), knight()]);

        assert!(state.replenish_hand(Seat::First, &catalog, &mut rng).is_none());
    }

    #[test]
    fn test_mana_regen_capped() {
        let mut state = match_with_hand(vec![knight()]);
        state.player_mut(Seat::First).mana = 8;
        state.player_mut(Seat::Second).mana = 10;

        state.regenerate_mana(1, 10);
        state.regenerate_mana(1, 10);
        state.regenerate_mana(1, 10);

        assert_eq!(state.player(Seat::First).mana, 10);
        assert_eq!(state.player(Seat::Second).mana, 10);
    }

    #[test]
    fn test_deal_resets_match_state() {
        let content = StaticContent::standard();
        let catalog = content.load_troop_catalog().unwrap();
        let template = content.load_tower_template().unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        let mut state = match_with_hand(Vec::new());
        state.player_mut(Seat::First).mana = 0;
        state.player_mut(Seat::First).crits_left = 0;
        state.player_mut(Seat::First).towers[0].hp = 0;

        state.deal(&catalog, &template, CRIT_TOKENS_PER_MATCH, &mut rng);

        for player in state.players() {
            assert_eq!(player.hand.len(), HAND_SIZE);
            assert_eq!(player.mana, STARTING_MANA);
            assert_eq!(player.crits_left, CRIT_TOKENS_PER_MATCH);
            assert_eq!(player.towers.len(), 3);
            assert_eq!(player.towers_lost(), 0);
        }

        // Towers are per-player copies
        state.player_mut(Seat::First).towers[0].hp = 1;
        assert_eq!(state.player(Seat::Second).towers[0].hp, 1000);
    }

    #[test]
    fn test_level_up() {
        let mut player = Player::new("carol");
        assert_eq!(player.add_experience(99), 0);
        assert_eq!(player.level, 1);

        // 100 to reach level 2, then 110 for level 3
        assert_eq!(player.add_experience(1 + 110 + 5), 2);
        assert_eq!(player.level, 3);
        assert_eq!(player.exp, 5);
    }

    #[test]
    fn test_status_snapshot_json() {
        let state = match_with_hand(vec![knight()]);
        let json = serde_json::to_value(state.status(Seat::First)).unwrap();

        assert_eq!(json["username"], "alice");
        assert_eq!(json["crits_left"], CRIT_TOKENS_PER_MATCH);
        assert_eq!(json["troops"][0]["name"], "Knight");
        assert_eq!(json["towers"][2]["kind"], "King");
    }
}
