//! BIZ phase: ML bid, market move, envelope auction and card acquisition.

use kryptopoly_protocol::{
    AuctionEntry, CardId, CardPreview, CommandOutput, ExpertKind, MarketId, PlayerId, Step,
    StepPayload,
};
use tracing::debug;

use super::{step, Applied, PhaseEngine, Revealed};
use crate::catalog::parse_card_code;
use crate::commitments::{Commitment, SealedStore};
use crate::error::EngineError;
use crate::locks::LockOutcome;
use crate::rules::RevealedBid;

impl PhaseEngine {
    pub(super) fn committed(&self, player: PlayerId, replayed: bool) -> Result<Applied, EngineError> {
        let payload = step::payload(&self.progress.current, self.progress.step, player)
            .ok_or_else(|| EngineError::invalid("nothing committed"))?;
        Ok(Applied::replayable(
            CommandOutput::Committed { payload, replayed },
            replayed,
        ))
    }

    pub(super) fn commit_ml_bid(
        &mut self,
        player: PlayerId,
        amount: Option<u64>,
    ) -> Result<Applied, EngineError> {
        self.expect_step(Step::MlBid)?;
        if self.progress.current.ml_bids.is_committed(player) {
            return self.committed(player, true);
        }
        let seq = self.next_seq();
        self.progress.current.ml_bids.commit(player, amount, seq);
        self.committed(player, false)
    }

    pub(super) fn pick_market(
        &mut self,
        player: PlayerId,
        market: &MarketId,
    ) -> Result<Applied, EngineError> {
        self.expect_step(Step::Move)?;
        if self.progress.current.moves.is_committed(player) {
            return self.committed(player, true);
        }
        if self.catalog.market(market).is_none() {
            return Err(EngineError::UnknownMarket(market.to_string()));
        }
        let token = self.token();
        self.progress
            .current
            .market_locks
            .acquire(market, player, token)?;
        let seq = self.next_seq();
        self.progress
            .current
            .moves
            .commit(player, market.clone(), seq);
        self.committed(player, false)
    }

    pub(super) fn commit_auction_bid(
        &mut self,
        player: PlayerId,
        bid: Option<u64>,
        used_lobbyist: bool,
    ) -> Result<Applied, EngineError> {
        self.expect_step(Step::AuctionEnvelope)?;
        let entry = match (bid, used_lobbyist) {
            (Some(_), true) => {
                return Err(EngineError::invalid(
                    "a lobbyist flag cannot carry a bid; bid in the last look",
                ))
            }
            (Some(amount), false) => AuctionEntry::Bid { amount },
            (None, false) => AuctionEntry::Decline,
            (None, true) => AuctionEntry::Lobbyist,
        };
        if self.progress.current.auction.is_committed(player) {
            return self.committed(player, true);
        }
        if entry == AuctionEntry::Lobbyist
            && self.unused_experts(player, ExpertKind::Lobbyist).is_empty()
        {
            return Err(EngineError::invalid("no unused lobbyist card"));
        }
        let seq = self.next_seq();
        self.progress.current.auction.commit(player, entry, seq);
        if self.last_look_open() {
            debug!("Auction last look open in year {}", self.progress.year);
        }
        self.committed(player, false)
    }

    pub(super) fn commit_auction_final_bid(
        &mut self,
        player: PlayerId,
        bid: Option<u64>,
    ) -> Result<Applied, EngineError> {
        self.expect_step(Step::AuctionEnvelope)?;
        if !self.progress.current.is_flagger(player) {
            return Err(EngineError::invalid(
                "only players who flagged a lobbyist submit a final bid",
            ));
        }
        if !self.last_look_open() {
            return Err(EngineError::invalid("the last look is not open yet"));
        }
        if self.progress.current.auction_final.is_committed(player) {
            return self.committed(player, true);
        }
        let seq = self.next_seq();
        self.progress.current.auction_final.commit(player, bid, seq);
        self.committed(player, false)
    }

    pub(super) fn scan_preview(
        &mut self,
        player: PlayerId,
        raw_code: &str,
    ) -> Result<Applied, EngineError> {
        self.expect_step(Step::Acquire)?;
        self.expect_acquiring(player)?;
        let id = parse_card_code(raw_code)
            .ok_or_else(|| EngineError::invalid("unreadable card code"))?;
        let card = self.card(&id)?.clone();
        let holder = self.progress.card_locks.holder(&id);
        let claimable = holder.is_none() && card.available_from_year() <= self.progress.year;
        let preview = CardPreview {
            card,
            holder,
            claimable,
        };

        let pending = &mut self.progress.current.pending_scan;
        if claimable {
            pending.insert(player, preview.clone());
        } else {
            pending.remove(&player);
        }
        Ok(Applied::changed(CommandOutput::Preview { preview }))
    }

    pub(super) fn claim_card(
        &mut self,
        player: PlayerId,
        card: &CardId,
    ) -> Result<Applied, EngineError> {
        self.expect_step(Step::Acquire)?;
        self.expect_acquiring(player)?;
        let from_year = self.card(card)?.available_from_year();
        if from_year > self.progress.year {
            return Err(EngineError::invalid(format!(
                "{card} can be claimed from year {from_year}"
            )));
        }
        let token = self.token();
        let outcome = self.progress.card_locks.acquire(card, player, token)?;
        let replayed = outcome == LockOutcome::AlreadyHeld;
        if !replayed {
            self.next_seq();
            if let Some(holdings) = self.progress.holdings.get_mut(&player) {
                holdings.cards.insert(card.clone());
            }
            self.progress
                .current
                .claimed
                .entry(player)
                .or_default()
                .push(card.clone());
        }
        let pending = &mut self.progress.current.pending_scan;
        if pending.get(&player).is_some_and(|p| p.card.id() == card) {
            pending.remove(&player);
        }
        Ok(Applied::replayable(
            CommandOutput::Claimed {
                card: card.clone(),
                replayed,
            },
            replayed,
        ))
    }

    pub(super) fn commit_acquire_done(&mut self, player: PlayerId) -> Result<Applied, EngineError> {
        self.expect_step(Step::Acquire)?;
        let current = &mut self.progress.current;
        let fresh = current.acquire_done.insert(player);
        current.pending_scan.remove(&player);
        let payload = StepPayload::Acquire {
            claimed: current.claimed_by(player).to_vec(),
            done: true,
        };
        Ok(Applied::replayable(
            CommandOutput::Committed {
                payload,
                replayed: !fresh,
            },
            !fresh,
        ))
    }

    /// "No more cards" is one-way.
    fn expect_acquiring(&self, player: PlayerId) -> Result<(), EngineError> {
        if self.progress.current.acquire_done.contains(&player) {
            return Err(EngineError::invalid("card acquisition already finished"));
        }
        Ok(())
    }

    pub(super) fn close_ml_bid(&mut self) {
        let current = &self.progress.current;
        let mut revealed = Revealed::default();
        let mut bids = Vec::new();
        for player in &self.players {
            let amount = current.ml_bids.payload(*player).copied().flatten();
            revealed.bids.insert(*player, amount);
            if let (Some(amount), Some(seq)) = (amount, commit_seq(&current.ml_bids, *player)) {
                bids.push(RevealedBid {
                    player: *player,
                    amount,
                    seq,
                });
            }
        }
        revealed.award = self.rules.ml_award.decide(&bids);
        if let Some(award) = &revealed.award {
            debug!("ML bid won by {} with {}", award.winner, award.amount);
        }
        self.progress.current.ml_result = Some(revealed);
    }

    pub(super) fn close_auction(&mut self) {
        let current = &self.progress.current;
        let mut revealed = Revealed::default();
        let mut bids = Vec::new();
        let mut flaggers = Vec::new();
        for player in &self.players {
            let effective = current.effective_auction_bid(*player);
            revealed.bids.insert(*player, effective.map(|(amount, _)| amount));
            if let Some((amount, seq)) = effective {
                bids.push(RevealedBid {
                    player: *player,
                    amount,
                    seq,
                });
            }
            if current.is_flagger(*player) {
                flaggers.push(*player);
            }
        }
        revealed.award = self.rules.auction_award.decide(&bids);
        self.progress.current.auction_result = Some(revealed);
        for player in flaggers {
            self.consume_experts(player, ExpertKind::Lobbyist, 1);
        }
    }
}

fn commit_seq<P>(store: &SealedStore<P>, player: PlayerId) -> Option<u64> {
    match store.get(player) {
        Commitment::Committed { seq, .. } => Some(seq),
        Commitment::NotCommittedYet => None,
    }
}

#[cfg(test)]
mod tests {
    use kryptopoly_protocol::{Award, Command, ErrorKind};

    use super::super::test_support::*;
    use super::*;
    use crate::rules::{AwardRule, RuleTable, TieBreak};

    fn auction_bid(bid: Option<u64>, used_lobbyist: bool) -> Command {
        Command::CommitAuctionBid { bid, used_lobbyist }
    }

    #[test]
    fn ml_bid_is_committed_once() {
        let mut engine = engine(&[P1, P2]);
        let first = engine
            .apply(P1, &Command::CommitMlBid { amount: Some(40) })
            .unwrap();
        assert!(first.changed);
        let again = engine
            .apply(P1, &Command::CommitMlBid { amount: Some(90) })
            .unwrap();
        assert!(!again.changed);
        assert_eq!(
            again.output,
            CommandOutput::Committed {
                payload: StepPayload::MlBid { amount: Some(40) },
                replayed: true
            }
        );
    }

    #[test]
    fn ml_close_reveals_and_awards() {
        let mut engine = engine(&[P1, P2, P3]);
        engine
            .apply(P2, &Command::CommitMlBid { amount: Some(70) })
            .unwrap();
        engine
            .apply(P1, &Command::CommitMlBid { amount: Some(70) })
            .unwrap();
        engine
            .apply(P3, &Command::CommitMlBid { amount: None })
            .unwrap();
        advance_to(&mut engine, Step::Move);
        let result = engine.progress().current.ml_result.clone().unwrap();
        assert_eq!(result.bids[&P3], None);
        assert_eq!(
            result.award,
            Some(Award {
                winner: P2,
                amount: 70
            })
        );
    }

    #[test]
    fn ml_tie_without_award_rule() {
        let rules = RuleTable {
            ml_award: AwardRule {
                tie_break: TieBreak::NoAward,
                min_bid: 0,
            },
            ..RuleTable::default()
        };
        let mut engine = engine_with(&[P1, P2], rules);
        engine
            .apply(P1, &Command::CommitMlBid { amount: Some(50) })
            .unwrap();
        engine
            .apply(P2, &Command::CommitMlBid { amount: Some(50) })
            .unwrap();
        advance_to(&mut engine, Step::Move);
        let result = engine.progress().current.ml_result.clone().unwrap();
        assert_eq!(result.award, None);
    }

    #[test]
    fn contested_market_conflicts() {
        let mut engine = engine(&[P1, P2]);
        advance_to(&mut engine, Step::Move);
        let pick = Command::PickMarket {
            market: MarketId::new("M03"),
        };
        engine.apply(P1, &pick).unwrap();
        let err = engine.apply(P2, &pick).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(!engine.progress().current.moves.is_committed(P2));
        assert_eq!(engine.readiness().ready_players, vec![P1]);

        let err = engine
            .apply(
                P2,
                &Command::PickMarket {
                    market: MarketId::new("M99"),
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn lobbyist_flag_rules() {
        let mut engine = engine(&[P1, P2]);
        advance_to(&mut engine, Step::AuctionEnvelope);

        let err = engine.apply(P1, &auction_bid(Some(10), true)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = engine.apply(P1, &auction_bid(None, true)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        give(&mut engine, P1, &["E05"]);
        engine.apply(P1, &auction_bid(None, true)).unwrap();
        let err = engine
            .apply(P1, &Command::CommitAuctionFinalBid { bid: Some(30) })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        engine.apply(P2, &auction_bid(Some(20), false)).unwrap();
        assert!(engine.last_look_open());
        let err = engine
            .apply(P2, &Command::CommitAuctionFinalBid { bid: Some(99) })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        engine
            .apply(P1, &Command::CommitAuctionFinalBid { bid: Some(30) })
            .unwrap();
        assert!(engine.readiness().all_ready());

        advance_to(&mut engine, Step::Acquire);
        let result = engine.progress().current.auction_result.clone().unwrap();
        assert_eq!(
            result.award,
            Some(Award {
                winner: P1,
                amount: 30
            })
        );
        assert!(engine
            .unused_experts(P1, ExpertKind::Lobbyist)
            .is_empty());
    }

    #[test]
    fn flagger_without_final_bid_declines() {
        let mut engine = engine(&[P1, P2]);
        give(&mut engine, P1, &["E05"]);
        advance_to(&mut engine, Step::AuctionEnvelope);
        engine.apply(P1, &auction_bid(None, true)).unwrap();
        engine.apply(P2, &auction_bid(Some(5), false)).unwrap();
        advance_to(&mut engine, Step::Acquire);
        let result = engine.progress().current.auction_result.clone().unwrap();
        assert_eq!(result.bids[&P1], None);
        assert_eq!(result.award.map(|a| a.winner), Some(P2));
    }

    #[test]
    fn scan_then_claim() {
        let mut engine = engine(&[P1, P2]);
        advance_to(&mut engine, Step::Acquire);

        let applied = engine
            .apply(
                P1,
                &Command::ScanPreview {
                    raw_code: "https://kryptopoly.app/card/i04".into(),
                },
            )
            .unwrap();
        let CommandOutput::Preview { preview } = applied.output else {
            panic!("expected a preview");
        };
        assert!(preview.claimable);
        assert_eq!(engine.readiness().ready, 0);

        let claim = Command::ClaimCard {
            card: CardId::new("I04"),
        };
        engine.apply(P1, &claim).unwrap();
        assert_eq!(engine.readiness().ready_players, vec![P1]);
        assert!(!engine.apply(P1, &claim).unwrap().changed);

        let err = engine.apply(P2, &claim).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = engine
            .apply(
                P2,
                &Command::ClaimCard {
                    card: CardId::new("F01"),
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = engine
            .apply(
                P2,
                &Command::ScanPreview {
                    raw_code: "X99".into(),
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        engine.apply(P2, &Command::CommitAcquireDone).unwrap();
        assert!(engine.readiness().all_ready());
        let err = engine.apply(P2, &claim).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
