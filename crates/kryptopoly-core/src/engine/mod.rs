//! Per-session authoritative state machine.
//!
//! The engine only moves when the Game Master says so. Every advance stores a
//! checkpoint of [`Progress`]; rollback restores the most recent one.

mod biz;
mod crypto;
mod settle;
pub mod step;
mod view;
mod year;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use kryptopoly_protocol::{
    Breakdown, CardDef, CardId, Coin, Command, CommandOutput, ExpertKind, PlayerId, Readiness,
    SessionConfig, SessionStatus, Step,
};
use tracing::{info, warn};

use crate::catalog::{Catalog, CatalogError};
use crate::error::EngineError;
use crate::locks::{LockTable, StepToken};
use crate::rules::RuleTable;

pub use crypto::MAX_TRADE_UNITS;
pub use year::{Revealed, YearState};

pub const MIN_YEARS: u8 = 4;
pub const MAX_YEARS: u8 = 5;
/// Including the Game Master.
pub const MIN_PLAYERS: u8 = 2;
pub const MAX_PLAYERS: u8 = 6;

/// What a player owns. Public: the cards lie on the table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Holdings {
    pub cards: BTreeSet<CardId>,
    pub used_experts: BTreeSet<CardId>,
    pub crypto: BTreeMap<Coin, i64>,
}

/// Game progress; the unit of checkpoint and rollback.
#[derive(Clone, Debug)]
pub struct Progress {
    pub year: u8,
    pub step: Step,
    seq: u64,
    pub holdings: BTreeMap<PlayerId, Holdings>,
    pub card_locks: LockTable<CardId>,
    pub current: YearState,
    /// Final breakdowns of finished years, per player.
    pub history: BTreeMap<PlayerId, Vec<Breakdown>>,
}

impl Progress {
    fn new() -> Self {
        Self {
            year: 1,
            step: Step::FIRST,
            seq: 0,
            holdings: BTreeMap::new(),
            card_locks: LockTable::new(),
            current: YearState::new(1),
            history: BTreeMap::new(),
        }
    }
}

/// Result of an accepted command.
#[derive(Clone, Debug)]
pub struct Applied {
    pub output: CommandOutput,
    /// `false` for queries and replays; watchers need no update.
    pub changed: bool,
}

impl Applied {
    fn changed(output: CommandOutput) -> Self {
        Self {
            output,
            changed: true,
        }
    }

    fn unchanged(output: CommandOutput) -> Self {
        Self {
            output,
            changed: false,
        }
    }

    fn replayable(output: CommandOutput, replayed: bool) -> Self {
        Self {
            output,
            changed: !replayed,
        }
    }
}

pub struct PhaseEngine {
    catalog: Arc<Catalog>,
    rules: RuleTable,
    config: SessionConfig,
    status: SessionStatus,
    /// Required players (everyone but the GM), in join order.
    players: Vec<PlayerId>,
    progress: Progress,
    checkpoints: Vec<Progress>,
}

/// Check session parameters chosen by the GM.
pub fn validate_config(config: &SessionConfig) -> Result<(), EngineError> {
    if !(MIN_YEARS..=MAX_YEARS).contains(&config.years_total) {
        return Err(EngineError::invalid(format!(
            "years_total must be {MIN_YEARS} or {MAX_YEARS}"
        )));
    }
    if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&config.max_players) {
        return Err(EngineError::invalid(format!(
            "max_players must be between {MIN_PLAYERS} and {MAX_PLAYERS}"
        )));
    }
    Ok(())
}

impl PhaseEngine {
    pub fn new(
        catalog: Arc<Catalog>,
        rules: RuleTable,
        config: SessionConfig,
    ) -> Result<Self, EngineError> {
        validate_config(&config)?;
        let covered = catalog.years_covered();
        if covered < config.years_total {
            return Err(CatalogError::MissingYear(covered + 1).into());
        }
        Ok(Self {
            catalog,
            rules,
            config,
            status: SessionStatus::Lobby,
            players: Vec::new(),
            progress: Progress::new(),
            checkpoints: Vec::new(),
        })
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn config(&self) -> SessionConfig {
        self.config
    }

    pub fn year(&self) -> u8 {
        self.progress.year
    }

    pub fn step(&self) -> Step {
        self.progress.step
    }

    pub fn players(&self) -> &[PlayerId] {
        &self.players
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn holdings(&self, player: PlayerId) -> Option<&Holdings> {
        self.progress.holdings.get(&player)
    }

    pub fn readiness(&self) -> Readiness {
        step::readiness(&self.progress.current, &self.players, self.progress.step)
    }

    pub fn last_look_open(&self) -> bool {
        self.progress.step == Step::AuctionEnvelope
            && self.progress.current.last_look_open(&self.players)
    }

    /// Register a joining player. Only possible in the lobby.
    pub fn add_player(&mut self, player: PlayerId) -> Result<(), EngineError> {
        if self.status != SessionStatus::Lobby {
            return Err(EngineError::WrongStatus(self.status));
        }
        if player == PlayerId::GM {
            return Err(EngineError::GmIsNotPlayer);
        }
        if !self.players.contains(&player) {
            self.players.push(player);
            self.progress.holdings.insert(player, Holdings::default());
        }
        Ok(())
    }

    /// Apply a command issued by `player`. Validation precedes every mutation,
    /// so a rejected command leaves the engine untouched.
    pub fn apply(&mut self, player: PlayerId, command: &Command) -> Result<Applied, EngineError> {
        if command.is_gm_only() && player != PlayerId::GM {
            return Err(EngineError::GmOnly(command.name()));
        }
        match command {
            Command::StartGame => self.start_game(),
            Command::AdvancePhase => self.advance(),
            Command::RollbackPhase => self.rollback(),
            Command::Snapshot => Err(EngineError::invalid("snapshots are served by the session")),
            other => {
                self.check_player(player)?;
                self.apply_player_command(player, other)
            }
        }
    }

    fn apply_player_command(
        &mut self,
        player: PlayerId,
        command: &Command,
    ) -> Result<Applied, EngineError> {
        match command {
            Command::CommitMlBid { amount } => self.commit_ml_bid(player, *amount),
            Command::PickMarket { market } => self.pick_market(player, market),
            Command::CommitAuctionBid { bid, used_lobbyist } => {
                self.commit_auction_bid(player, *bid, *used_lobbyist)
            }
            Command::CommitAuctionFinalBid { bid } => self.commit_auction_final_bid(player, *bid),
            Command::ScanPreview { raw_code } => self.scan_preview(player, raw_code),
            Command::ClaimCard { card } => self.claim_card(player, card),
            Command::CommitAcquireDone => self.commit_acquire_done(player),
            Command::CommitCryptoTrade { deltas } => self.commit_crypto_trade(player, deltas),
            Command::StartAudit => self.start_audit(player),
            Command::SetSecretLawyer { choice } => self.set_secret_lawyer(player, choice),
            Command::AddSecretLobby { action } => self.add_secret_lobby(player, action),
            Command::PayAudit => self.pay_audit(player),
            Command::PreviewAudit => self.preview_audit(player),
            Command::StartGame
            | Command::AdvancePhase
            | Command::RollbackPhase
            | Command::Snapshot => Err(EngineError::invalid("not a player command")),
        }
    }

    fn check_player(&self, player: PlayerId) -> Result<(), EngineError> {
        if player == PlayerId::GM {
            return Err(EngineError::GmIsNotPlayer);
        }
        if !self.players.contains(&player) {
            return Err(EngineError::UnknownPlayer(player));
        }
        if self.status != SessionStatus::InProgress {
            return Err(EngineError::WrongStatus(self.status));
        }
        Ok(())
    }

    fn expect_step(&self, expected: Step) -> Result<(), EngineError> {
        if self.progress.step != expected {
            return Err(EngineError::WrongStep {
                expected,
                current: self.progress.step,
            });
        }
        Ok(())
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.progress.seq;
        self.progress.seq += 1;
        seq
    }

    /// Token for the next accepted commit. Only `next_seq` consumes it.
    fn token(&self) -> StepToken {
        StepToken {
            year: self.progress.year,
            step: self.progress.step,
            seq: self.progress.seq,
        }
    }

    fn cursor(&self) -> CommandOutput {
        CommandOutput::Cursor {
            status: self.status,
            year: self.progress.year,
            step: self.progress.step,
        }
    }

    /// Expert cards of `kind` the player owns and has not used yet, by id.
    pub fn unused_experts(&self, player: PlayerId, kind: ExpertKind) -> Vec<CardId> {
        let Some(holdings) = self.progress.holdings.get(&player) else {
            return Vec::new();
        };
        holdings
            .cards
            .iter()
            .filter(|id| !holdings.used_experts.contains(*id))
            .filter(|id| self.catalog.expert_kind(id) == Some(kind))
            .cloned()
            .collect()
    }

    fn consume_experts(&mut self, player: PlayerId, kind: ExpertKind, count: usize) {
        let cards: Vec<CardId> = self
            .unused_experts(player, kind)
            .into_iter()
            .take(count)
            .collect();
        if let Some(holdings) = self.progress.holdings.get_mut(&player) {
            holdings.used_experts.extend(cards);
        }
    }

    fn start_game(&mut self) -> Result<Applied, EngineError> {
        if self.status != SessionStatus::Lobby {
            return Err(EngineError::WrongStatus(self.status));
        }
        if self.players.is_empty() {
            return Err(EngineError::invalid("at least one player must join first"));
        }
        self.status = SessionStatus::InProgress;
        info!(
            "Game started with {} players for {} years",
            self.players.len(),
            self.config.years_total
        );
        Ok(Applied::changed(self.cursor()))
    }

    /// Close the current step and open the next one. Accepted at any readiness.
    fn advance(&mut self) -> Result<Applied, EngineError> {
        if self.status != SessionStatus::InProgress {
            return Err(EngineError::WrongStatus(self.status));
        }
        let readiness = self.readiness();
        self.checkpoints.push(self.progress.clone());
        if let Err(err) = self.close_step() {
            if let Some(restored) = self.checkpoints.pop() {
                self.progress = restored;
            }
            warn!(
                "Could not close year {} step {}: {err}",
                self.progress.year, self.progress.step
            );
            return Err(err);
        }

        match self.progress.step.next() {
            Some(next) => self.progress.step = next,
            None if self.progress.year >= self.config.years_total => {
                self.status = SessionStatus::GameOver;
                info!("Game over after year {}", self.progress.year);
                return Ok(Applied::changed(self.cursor()));
            }
            None => {
                let year = self.progress.year + 1;
                self.progress.year = year;
                self.progress.step = Step::FIRST;
                self.progress.current = YearState::new(year);
            }
        }
        info!(
            "Advanced to year {} step {} ({}/{} were ready)",
            self.progress.year, self.progress.step, readiness.ready, readiness.required
        );
        Ok(Applied::changed(self.cursor()))
    }

    fn rollback(&mut self) -> Result<Applied, EngineError> {
        if self.status != SessionStatus::InProgress {
            return Err(EngineError::WrongStatus(self.status));
        }
        let restored = self
            .checkpoints
            .pop()
            .ok_or(EngineError::NothingToRollBack)?;
        self.progress = restored;
        info!(
            "Rolled back to year {} step {}",
            self.progress.year, self.progress.step
        );
        Ok(Applied::changed(self.cursor()))
    }

    fn close_step(&mut self) -> Result<(), EngineError> {
        match self.progress.step {
            Step::MlBid => self.close_ml_bid(),
            Step::AuctionEnvelope => self.close_auction(),
            Step::Acquire => self.progress.current.pending_scan.clear(),
            Step::Settle => return self.close_settle(),
            Step::Move | Step::Crypto => {}
        }
        Ok(())
    }

    fn card(&self, id: &CardId) -> Result<&CardDef, EngineError> {
        self.catalog
            .card(id)
            .ok_or_else(|| EngineError::UnknownCard(id.clone()))
    }
}


#[cfg(test)]
mod tests {
    use kryptopoly_protocol::{ErrorKind, MarketId};

    use super::test_support::*;
    use super::*;
    use crate::catalog::{load_catalog, CatalogSource};

    #[test]
    fn gm_controls_the_cursor() {
        let mut engine = engine(&[P1, P2]);
        let err = engine.apply(P1, &Command::AdvancePhase).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let err = engine
            .apply(GM, &Command::CommitMlBid { amount: Some(5) })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        engine.apply(GM, &Command::AdvancePhase).unwrap();
        assert_eq!(engine.step(), Step::Move);
    }

    #[test]
    fn advance_is_fail_open() {
        let mut engine = engine(&[P1, P2]);
        assert_eq!(engine.readiness().ready, 0);
        let applied = engine.apply(GM, &Command::AdvancePhase).unwrap();
        assert!(applied.changed);
        assert_eq!(engine.step(), Step::Move);
    }

    #[test]
    fn wrong_step_is_validation() {
        let mut engine = engine(&[P1]);
        let err = engine
            .apply(
                P1,
                &Command::PickMarket {
                    market: MarketId::new("M01"),
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn rollback_restores_previous_step() {
        let mut engine = engine(&[P1, P2]);
        engine
            .apply(P1, &Command::CommitMlBid { amount: Some(30) })
            .unwrap();
        engine.apply(GM, &Command::AdvancePhase).unwrap();
        engine
            .apply(
                P1,
                &Command::PickMarket {
                    market: MarketId::new("M01"),
                },
            )
            .unwrap();

        engine.apply(GM, &Command::RollbackPhase).unwrap();
        assert_eq!(engine.step(), Step::MlBid);
        assert!(engine.progress().current.ml_bids.is_committed(P1));
        assert!(engine.progress().current.market_locks.is_empty());
        assert!(engine.progress().current.ml_result.is_none());

        let err = engine.apply(GM, &Command::RollbackPhase).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn game_over_after_last_settle() {
        let mut engine = engine(&[P1]);
        for _ in 0..(Step::ALL.len() * 4) {
            engine.apply(GM, &Command::AdvancePhase).unwrap();
        }
        assert_eq!(engine.status(), SessionStatus::GameOver);
        assert_eq!(engine.year(), 4);

        let err = engine.apply(GM, &Command::AdvancePhase).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = engine.apply(GM, &Command::RollbackPhase).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(engine.status(), SessionStatus::GameOver);
        assert_eq!(engine.progress().history[&P1].len(), 4);
    }

    #[test]
    fn catalog_must_cover_all_years() {
        let catalog = Arc::new(load_catalog(CatalogSource::Embedded).unwrap());
        let config = SessionConfig {
            years_total: 6,
            max_players: 4,
        };
        let err = PhaseEngine::new(catalog.clone(), RuleTable::default(), config)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut short = (*catalog).clone();
        short.years.remove(&5);
        let config = SessionConfig {
            years_total: 5,
            max_players: 4,
        };
        let err = PhaseEngine::new(Arc::new(short), RuleTable::default(), config)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn rejected_and_replayed_commands_keep_the_sequence() {
        let mut engine = engine(&[P1, P2]);
        let pick = |market: &str| Command::PickMarket {
            market: MarketId::new(market),
        };
        engine
            .apply(P1, &Command::CommitMlBid { amount: Some(10) })
            .unwrap();
        assert_eq!(engine.progress.seq, 1);
        engine
            .apply(P1, &Command::CommitMlBid { amount: Some(99) })
            .unwrap();
        assert_eq!(engine.progress.seq, 1);

        engine.apply(GM, &Command::AdvancePhase).unwrap();
        engine.apply(P1, &pick("M01")).unwrap();
        assert_eq!(engine.progress.seq, 2);
        let err = engine.apply(P2, &pick("M01")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(!engine.progress.current.moves.is_committed(P2));
        assert_eq!(engine.progress.seq, 2);
        engine.apply(P1, &pick("M02")).unwrap();
        assert_eq!(engine.progress.seq, 2);

        engine.apply(P2, &pick("M02")).unwrap();
        assert_eq!(engine.progress.seq, 3);
        assert_eq!(
            engine.progress.current.moves.get(P2),
            crate::commitments::Commitment::Committed {
                payload: &MarketId::new("M02"),
                seq: 2
            }
        );
    }

    #[test]
    fn failed_settlement_keeps_the_step() {
        let mut engine = engine(&[P1]);
        advance_to(&mut engine, Step::Settle);
        let mut broken = engine.catalog().clone();
        broken.years.remove(&1);
        engine.catalog = Arc::new(broken);

        let err = engine.apply(GM, &Command::AdvancePhase).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert_eq!(engine.year(), 1);
        assert_eq!(engine.step(), Step::Settle);
        assert!(engine.progress().history.is_empty());

        // Rollback still returns to the step before SETTLE.
        engine.apply(GM, &Command::RollbackPhase).unwrap();
        assert_eq!(engine.step(), Step::Crypto);
    }

    #[test]
    fn players_join_only_in_lobby() {
        let mut engine = engine(&[P1]);
        let err = engine.add_player(P2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
