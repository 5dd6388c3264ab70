use std::collections::{BTreeMap, BTreeSet};

use kryptopoly_protocol::{
    AuctionEntry, Award, Breakdown, CardId, CardPreview, Coin, MarketId, PlayerId, SecretActions,
};

use crate::commitments::{Commitment, SealedStore};
use crate::locks::LockTable;

/// Revealed bids of a closed ML_BID or AUCTION_ENVELOPE step.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Revealed {
    pub bids: BTreeMap<PlayerId, Option<u64>>,
    pub award: Option<Award>,
}

/// Everything that lives for a single game year. Replaced wholesale on rollover.
#[derive(Clone, Debug, Default)]
pub struct YearState {
    pub year: u8,

    pub ml_bids: SealedStore<Option<u64>>,
    pub ml_result: Option<Revealed>,

    pub moves: SealedStore<MarketId>,
    pub market_locks: LockTable<MarketId>,

    /// Round 1 envelopes.
    pub auction: SealedStore<AuctionEntry>,
    /// Last-look decisions of lobbyist flaggers.
    pub auction_final: SealedStore<Option<u64>>,
    pub auction_result: Option<Revealed>,

    pub acquire_done: BTreeSet<PlayerId>,
    pub claimed: BTreeMap<PlayerId, Vec<CardId>>,
    /// Claimable card a player scanned but has not claimed yet.
    pub pending_scan: BTreeMap<PlayerId, CardPreview>,

    pub crypto: SealedStore<BTreeMap<Coin, i64>>,

    pub secrets: BTreeMap<PlayerId, SecretActions>,
    pub audits: SealedStore<()>,
    pub paid: BTreeSet<PlayerId>,
    pub finals: Option<BTreeMap<PlayerId, Breakdown>>,
}

impl YearState {
    pub fn new(year: u8) -> Self {
        Self {
            year,
            ..Self::default()
        }
    }

    pub fn is_flagger(&self, player: PlayerId) -> bool {
        matches!(self.auction.payload(player), Some(AuctionEntry::Lobbyist))
    }

    /// Last look opens once every required player committed round 1 and
    /// at least one of them flagged a lobbyist.
    pub fn last_look_open(&self, players: &[PlayerId]) -> bool {
        players.iter().all(|p| self.auction.is_committed(*p))
            && players.iter().any(|p| self.is_flagger(*p))
    }

    /// Effective auction bid: round-1 bid, or the final bid of a flagger.
    /// A flagger without a final bid declines.
    pub fn effective_auction_bid(&self, player: PlayerId) -> Option<(u64, u64)> {
        let entry = self.auction.get(player);
        match entry {
            Commitment::Committed {
                payload: AuctionEntry::Bid { amount },
                seq,
            } => Some((*amount, seq)),
            Commitment::Committed {
                payload: AuctionEntry::Lobbyist,
                ..
            } => match self.auction_final.get(player) {
                Commitment::Committed {
                    payload: Some(amount),
                    seq,
                } => Some((*amount, seq)),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn claimed_by(&self, player: PlayerId) -> &[CardId] {
        self.claimed.get(&player).map(Vec::as_slice).unwrap_or(&[])
    }
}
