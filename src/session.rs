use crate::{
    GRID_SIZE,
    MAX_MINES,
    MIN_MINES,
    calls,
    error::{
        GameError,
        Result,
    },
    mines_types::Game,
};
use alloy_primitives::{
    Address,
    U256,
};
use chrono::{
    DateTime,
    Utc,
};
use std::{
    collections::BTreeSet,
    fmt,
};
use tracing::warn;

/// On-chain state of one player's game, rebuilt on every read.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GameSnapshot {
    pub player: Address,
    pub bet_amount_wei: U256,
    pub total_mines: u8,
    pub revealed_safe_tiles: u8,
    pub revealed_tiles: [bool; GRID_SIZE],
    pub mine_locations: BTreeSet<u8>,
    pub is_active: bool,
}

impl GameSnapshot {
    /// Placeholder shown between a confirmed start and the first authoritative read.
    pub fn optimistic(player: Address, bet_amount_wei: U256, total_mines: u8) -> Self {
        Self {
            player,
            bet_amount_wei,
            total_mines,
            revealed_safe_tiles: 0,
            revealed_tiles: [false; GRID_SIZE],
            mine_locations: BTreeSet::new(),
            is_active: true,
        }
    }

    pub fn is_revealed(&self, tile: usize) -> bool {
        self.revealed_tiles.get(tile).copied().unwrap_or(false)
    }

    pub fn is_mine(&self, tile: usize) -> bool {
        u8::try_from(tile)
            .map(|t| self.mine_locations.contains(&t))
            .unwrap_or(false)
    }

    pub fn remaining_safe_tiles(&self) -> u8 {
        (GRID_SIZE as u8)
            .saturating_sub(self.total_mines)
            .saturating_sub(self.revealed_safe_tiles)
    }

    pub fn can_cash_out(&self) -> bool {
        self.is_active && self.revealed_safe_tiles > 0
    }

    fn revealed_safe_count(&self) -> usize {
        (0..GRID_SIZE)
            .filter(|&tile| self.is_revealed(tile) && !self.is_mine(tile))
            .count()
    }
}

impl TryFrom<Game> for GameSnapshot {
    type Error = GameError;

    fn try_from(game: Game) -> Result<Self> {
        let mut mine_locations = BTreeSet::new();
        for location in game.mineLocations {
            if usize::from(location) >= GRID_SIZE {
                return Err(GameError::decode(format!(
                    "game status: mine location {location} is off the board"
                )));
            }
            mine_locations.insert(location);
        }
        if game.isActive {
            if !(MIN_MINES..=MAX_MINES).contains(&game.totalMines) {
                return Err(GameError::decode(format!(
                    "game status: active game with {} mines",
                    game.totalMines
                )));
            }
            if game.revealedSafeTiles > GRID_SIZE as u8 - game.totalMines {
                return Err(GameError::decode(format!(
                    "game status: {} safe tiles revealed with {} mines",
                    game.revealedSafeTiles, game.totalMines
                )));
            }
        }
        let snapshot = Self {
            player: game.player,
            bet_amount_wei: game.betAmount,
            total_mines: game.totalMines,
            revealed_safe_tiles: game.revealedSafeTiles,
            revealed_tiles: game.revealedTiles,
            mine_locations,
            is_active: game.isActive,
        };
        let counted = snapshot.revealed_safe_count();
        if counted != usize::from(snapshot.revealed_safe_tiles) {
            warn!(
                player = %snapshot.player,
                reported = snapshot.revealed_safe_tiles,
                counted,
                "revealed tile flags disagree with revealed safe tile count"
            );
        }
        Ok(snapshot)
    }
}

/// `None` means there is no game for the player.
pub fn decode_status(data: &[u8]) -> Result<Option<GameSnapshot>> {
    if data.is_empty() {
        return Ok(None);
    }
    let game = calls::decode_game_status(data)?;
    if game.player == Address::ZERO {
        return Ok(None);
    }
    GameSnapshot::try_from(game).map(Some)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SnapshotSource {
    Optimistic,
    Authoritative,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrackedSnapshot {
    pub snapshot: GameSnapshot,
    pub source: SnapshotSource,
}

impl TrackedSnapshot {
    pub fn optimistic(snapshot: GameSnapshot) -> Self {
        Self {
            snapshot,
            source: SnapshotSource::Optimistic,
        }
    }

    pub fn authoritative(snapshot: GameSnapshot) -> Self {
        Self {
            snapshot,
            source: SnapshotSource::Authoritative,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        self.source == SnapshotSource::Optimistic
    }
}

/// Expected payout clamped to what the shared pool can actually pay.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CappedPayout {
    pub theoretical_payout: U256,
    pub effective_pool: U256,
    pub actual_payout: U256,
    pub actual_profit: U256,
}

/// The player's own escrowed bet is excluded from the pool before capping.
/// Profit never goes below zero even when the remaining pool is smaller than
/// the bet.
pub fn compute_capped_payout(
    snapshot: &GameSnapshot,
    pool_balance: U256,
    theoretical_profit: U256,
) -> CappedPayout {
    let bet = snapshot.bet_amount_wei;
    let profit = if snapshot.can_cash_out() {
        theoretical_profit
    } else {
        U256::ZERO
    };
    let theoretical_payout = bet.saturating_add(profit);
    let effective_pool = pool_balance.saturating_sub(bet);
    let actual_payout = theoretical_payout.min(effective_pool);
    let actual_profit = actual_payout.saturating_sub(bet);
    CappedPayout {
        theoretical_payout,
        effective_pool,
        actual_payout,
        actual_profit,
    }
}

/// The mutating action that currently owns the session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PendingAction {
    StartGame,
    RevealTile(u8),
    CashOut,
}

impl PendingAction {
    pub fn label(&self) -> &'static str {
        match self {
            PendingAction::StartGame => "Start game",
            PendingAction::RevealTile(_) => "Reveal",
            PendingAction::CashOut => "Cash out",
        }
    }
}

impl fmt::Display for PendingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingAction::StartGame => write!(f, "start game"),
            PendingAction::RevealTile(tile) => write!(f, "reveal tile {tile}"),
            PendingAction::CashOut => write!(f, "cash out"),
        }
    }
}

/// Client-side view of a session's lifecycle.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SessionPhase {
    #[default]
    NoGame,
    PendingStart,
    Active,
    PendingReveal { tile: u8 },
    PendingCashout,
    ResolvedLoss,
    /// `payout` is unknown when no pool balance was available at cash-out.
    ResolvedWin { payout: Option<U256> },
}

impl SessionPhase {
    pub fn pending_action(&self) -> Option<PendingAction> {
        match self {
            SessionPhase::PendingStart => Some(PendingAction::StartGame),
            SessionPhase::PendingReveal { tile } => Some(PendingAction::RevealTile(*tile)),
            SessionPhase::PendingCashout => Some(PendingAction::CashOut),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            SessionPhase::ResolvedLoss | SessionPhase::ResolvedWin { .. }
        )
    }

    pub fn begin(&self, action: PendingAction) -> Result<SessionPhase> {
        if let Some(in_flight) = self.pending_action() {
            return Err(GameError::ActionInFlight(in_flight));
        }
        match (self, action) {
            (SessionPhase::NoGame, PendingAction::StartGame) => Ok(SessionPhase::PendingStart),
            (phase, PendingAction::StartGame) if phase.is_resolved() => {
                Ok(SessionPhase::PendingStart)
            }
            (SessionPhase::Active, PendingAction::StartGame) => {
                Err(GameError::validation("A game is already in progress."))
            }
            (SessionPhase::Active, PendingAction::RevealTile(tile)) => {
                Ok(SessionPhase::PendingReveal { tile })
            }
            (SessionPhase::Active, PendingAction::CashOut) => Ok(SessionPhase::PendingCashout),
            (_, _) => Err(GameError::validation("There is no active game.")),
        }
    }

    pub fn confirm_start(&self) -> SessionPhase {
        match self {
            SessionPhase::PendingStart => SessionPhase::Active,
            other => *other,
        }
    }

    /// Applies the authoritative read that follows a confirmed reveal or cash-out.
    pub fn settle(
        &self,
        game: Option<&GameSnapshot>,
        expected_payout: Option<U256>,
    ) -> SessionPhase {
        let active = game.is_some_and(|g| g.is_active);
        match (self, active) {
            (SessionPhase::PendingReveal { .. }, true) => SessionPhase::Active,
            (SessionPhase::PendingReveal { .. }, false) => SessionPhase::ResolvedLoss,
            (SessionPhase::PendingCashout, false) => SessionPhase::ResolvedWin {
                payout: expected_payout,
            },
            (SessionPhase::PendingCashout, true) => {
                warn!("cash-out confirmed but the game is still active");
                SessionPhase::Active
            }
            (other, _) => other.reconcile(game),
        }
    }

    /// Applies an authoritative read outside of a confirmation cycle.
    pub fn reconcile(&self, game: Option<&GameSnapshot>) -> SessionPhase {
        if self.pending_action().is_some() {
            return *self;
        }
        match game {
            Some(g) if g.is_active => SessionPhase::Active,
            _ => SessionPhase::NoGame,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutcomeKind {
    Win { payout: Option<U256> },
    Loss,
}

/// Result surfaced to the player once a session concludes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionOutcome {
    pub kind: OutcomeKind,
    pub final_snapshot: Option<GameSnapshot>,
    pub settled_at: DateTime<Utc>,
}

impl SessionOutcome {
    pub fn from_phase(phase: SessionPhase, final_snapshot: Option<GameSnapshot>) -> Option<Self> {
        let kind = match phase {
            SessionPhase::ResolvedLoss => OutcomeKind::Loss,
            SessionPhase::ResolvedWin { payout } => OutcomeKind::Win { payout },
            _ => return None,
        };
        Some(Self {
            kind,
            final_snapshot,
            settled_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use alloy_primitives::address;
    use alloy_sol_types::SolValue;
    use proptest::prelude::*;

    const PLAYER: Address = address!("00000000000000000000000000000000000000aa");
    const TENTH_ETH: u128 = 100_000_000_000_000_000;

    fn active_snapshot(bet: U256, mines: u8, revealed: u8) -> GameSnapshot {
        let mut snapshot = GameSnapshot::optimistic(PLAYER, bet, mines);
        for tile in 0..revealed as usize {
            snapshot.revealed_tiles[tile] = true;
        }
        snapshot.revealed_safe_tiles = revealed;
        snapshot
    }

    fn game(is_active: bool, mines: u8, revealed: u8, mine_locations: Vec<u8>) -> Game {
        let mut revealed_tiles = [false; GRID_SIZE];
        for tile in revealed_tiles.iter_mut().take(revealed as usize) {
            *tile = true;
        }
        Game {
            player: PLAYER,
            betAmount: U256::from(TENTH_ETH),
            totalMines: mines,
            revealedSafeTiles: revealed,
            revealedTiles: revealed_tiles,
            mineLocations: mine_locations,
            isActive: is_active,
        }
    }

    #[test]
    fn compute_capped_payout__scenario_pool_covers_payout() {
        // given
        let snapshot = active_snapshot(U256::from(TENTH_ETH), 3, 2);
        let profit = U256::from(50_000_000_000_000_000u128);
        let pool = U256::from(1_000_000_000_000_000_000u128);

        // when
        let payout = compute_capped_payout(&snapshot, pool, profit);

        // then
        assert_eq!(payout.effective_pool, U256::from(900_000_000_000_000_000u128));
        assert_eq!(payout.theoretical_payout, U256::from(150_000_000_000_000_000u128));
        assert_eq!(payout.actual_payout, U256::from(150_000_000_000_000_000u128));
        assert_eq!(payout.actual_profit, profit);
    }

    #[test]
    fn compute_capped_payout__scenario_pool_caps_payout() {
        // given
        let snapshot = active_snapshot(U256::from(TENTH_ETH), 3, 2);
        let profit = U256::from(50_000_000_000_000_000u128);
        let pool = U256::from(200_000_000_000_000_000u128);

        // when
        let payout = compute_capped_payout(&snapshot, pool, profit);

        // then
        assert_eq!(payout.effective_pool, U256::from(TENTH_ETH));
        assert_eq!(payout.actual_payout, U256::from(TENTH_ETH));
        assert_eq!(payout.actual_profit, U256::ZERO);
    }

    #[test]
    fn compute_capped_payout__ignores_profit_before_first_safe_reveal() {
        // given
        let snapshot = active_snapshot(U256::from(TENTH_ETH), 3, 0);

        // when
        let payout =
            compute_capped_payout(&snapshot, U256::from(10 * TENTH_ETH), U256::from(7));

        // then
        assert_eq!(payout.theoretical_payout, U256::from(TENTH_ETH));
        assert_eq!(payout.actual_payout, U256::from(TENTH_ETH));
        assert_eq!(payout.actual_profit, U256::ZERO);
    }

    #[test]
    fn compute_capped_payout__pool_smaller_than_bet_floors_profit_at_zero() {
        // given
        let snapshot = active_snapshot(U256::from(TENTH_ETH), 3, 4);

        // when
        let payout = compute_capped_payout(&snapshot, U256::from(TENTH_ETH / 2), U256::from(9));

        // then
        assert_eq!(payout.effective_pool, U256::ZERO);
        assert_eq!(payout.actual_payout, U256::ZERO);
        assert_eq!(payout.actual_profit, U256::ZERO);
    }

    proptest! {
        #[test]
        fn compute_capped_payout__stays_within_bounds(
            bet in 1u128..=u64::MAX as u128,
            profit in 0u128..=u64::MAX as u128,
            pool in 0u128..=u128::MAX / 2,
        ) {
            let snapshot = active_snapshot(U256::from(bet), 3, 1);
            let payout = compute_capped_payout(&snapshot, U256::from(pool), U256::from(profit));

            prop_assert!(payout.actual_profit <= U256::from(profit));
            prop_assert!(payout.actual_payout <= U256::from(bet) + U256::from(profit));
            if payout.effective_pool >= U256::from(bet) {
                prop_assert!(payout.actual_payout >= U256::from(bet));
            } else {
                prop_assert_eq!(payout.actual_profit, U256::ZERO);
            }
            if payout.effective_pool >= U256::from(bet) + U256::from(profit) {
                prop_assert_eq!(payout.actual_payout, U256::from(bet) + U256::from(profit));
            }
        }
    }

    #[test]
    fn decode_status__empty_result_means_no_game() {
        assert_eq!(decode_status(&[]).unwrap(), None);
    }

    #[test]
    fn decode_status__zero_player_means_no_game() {
        // given
        let mut empty = game(false, 0, 0, vec![]);
        empty.player = Address::ZERO;

        // when
        let decoded = decode_status(&empty.abi_encode()).unwrap();

        // then
        assert_eq!(decoded, None);
    }

    #[test]
    fn decode_status__builds_snapshot_from_active_game() {
        // when
        let decoded = decode_status(&game(true, 3, 2, vec![]).abi_encode())
            .unwrap()
            .unwrap();

        // then
        assert!(decoded.is_active);
        assert_eq!(decoded.total_mines, 3);
        assert_eq!(decoded.revealed_safe_tiles, 2);
        assert_eq!(decoded.remaining_safe_tiles(), 20);
        assert!(decoded.is_revealed(1));
        assert!(!decoded.is_revealed(2));
        assert!(decoded.mine_locations.is_empty());
    }

    #[test]
    fn decode_status__keeps_mine_locations_of_finished_game() {
        // when
        let decoded = decode_status(&game(false, 3, 2, vec![2, 9, 24]).abi_encode())
            .unwrap()
            .unwrap();

        // then
        assert!(!decoded.is_active);
        assert!(decoded.is_mine(24));
        assert!(!decoded.is_mine(1));
    }

    #[test]
    fn decode_status__rejects_off_board_mine() {
        let err = decode_status(&game(false, 3, 0, vec![25]).abi_encode()).unwrap_err();
        assert!(matches!(err, GameError::Decode(_)));
    }

    #[test]
    fn decode_status__rejects_active_game_with_impossible_progress() {
        let err = decode_status(&game(true, 24, 2, vec![]).abi_encode()).unwrap_err();
        assert!(matches!(err, GameError::Decode(_)));
        let err = decode_status(&game(true, 0, 0, vec![]).abi_encode()).unwrap_err();
        assert!(matches!(err, GameError::Decode(_)));
    }

    #[test]
    fn decode_status__rejects_garbage_bytes() {
        let err = decode_status(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, GameError::Decode(_)));
    }

    #[test]
    fn optimistic__has_zeroed_progress() {
        let snapshot = GameSnapshot::optimistic(PLAYER, U256::from(TENTH_ETH), 5);
        assert!(snapshot.is_active);
        assert_eq!(snapshot.revealed_safe_tiles, 0);
        assert!(snapshot.revealed_tiles.iter().all(|r| !r));
        assert!(snapshot.mine_locations.is_empty());
        assert!(!snapshot.can_cash_out());
    }

    #[test]
    fn begin__rejects_second_action_while_pending() {
        // given
        let phase = SessionPhase::PendingReveal { tile: 7 };

        // when
        let err = phase.begin(PendingAction::RevealTile(12)).unwrap_err();

        // then
        assert!(matches!(
            err,
            GameError::ActionInFlight(PendingAction::RevealTile(7))
        ));
    }

    #[test]
    fn begin__follows_session_lifecycle() {
        assert_eq!(
            SessionPhase::NoGame.begin(PendingAction::StartGame).unwrap(),
            SessionPhase::PendingStart
        );
        assert_eq!(
            SessionPhase::ResolvedLoss
                .begin(PendingAction::StartGame)
                .unwrap(),
            SessionPhase::PendingStart
        );
        assert_eq!(
            SessionPhase::Active
                .begin(PendingAction::RevealTile(3))
                .unwrap(),
            SessionPhase::PendingReveal { tile: 3 }
        );
        assert_eq!(
            SessionPhase::Active.begin(PendingAction::CashOut).unwrap(),
            SessionPhase::PendingCashout
        );
        assert!(SessionPhase::Active.begin(PendingAction::StartGame).is_err());
        assert!(SessionPhase::NoGame.begin(PendingAction::CashOut).is_err());
        assert!(
            SessionPhase::NoGame
                .begin(PendingAction::RevealTile(0))
                .is_err()
        );
    }

    #[test]
    fn settle__resolves_reveal_and_cash_out() {
        // given
        let active = active_snapshot(U256::from(TENTH_ETH), 3, 1);
        let mut finished = active.clone();
        finished.is_active = false;
        let payout = Some(U256::from(42));

        // then
        assert_eq!(
            SessionPhase::PendingReveal { tile: 4 }.settle(Some(&active), None),
            SessionPhase::Active
        );
        assert_eq!(
            SessionPhase::PendingReveal { tile: 4 }.settle(Some(&finished), None),
            SessionPhase::ResolvedLoss
        );
        assert_eq!(
            SessionPhase::PendingCashout.settle(None, payout),
            SessionPhase::ResolvedWin { payout }
        );
        assert_eq!(
            SessionPhase::PendingCashout.settle(None, None),
            SessionPhase::ResolvedWin { payout: None }
        );
    }

    #[test]
    fn reconcile__leaves_pending_phases_and_returns_to_no_game() {
        let active = active_snapshot(U256::from(TENTH_ETH), 3, 1);
        assert_eq!(
            SessionPhase::PendingCashout.reconcile(None),
            SessionPhase::PendingCashout
        );
        assert_eq!(
            SessionPhase::ResolvedLoss.reconcile(None),
            SessionPhase::NoGame
        );
        assert_eq!(
            SessionPhase::NoGame.reconcile(Some(&active)),
            SessionPhase::Active
        );
        assert_eq!(SessionPhase::Active.reconcile(None), SessionPhase::NoGame);
    }

    #[test]
    fn session_outcome__only_for_resolved_phases() {
        assert!(SessionOutcome::from_phase(SessionPhase::Active, None).is_none());
        let outcome = SessionOutcome::from_phase(SessionPhase::ResolvedLoss, None).unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Loss);
    }
}
