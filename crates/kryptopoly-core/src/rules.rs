use kryptopoly_protocol::{Award, PlayerId};
use serde::{Deserialize, Serialize};

/// How a tie for the highest bid is resolved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TieBreak {
    /// The tied bid committed first wins.
    #[default]
    FirstCommitted,
    /// Nobody wins a tie.
    NoAward,
}

/// Winner determination for ML bids and auction envelopes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwardRule {
    #[serde(default)]
    pub tie_break: TieBreak,
    /// Bids below this are ignored.
    #[serde(default)]
    pub min_bid: u64,
}

/// One revealed bid, as fed to [`AwardRule::decide`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RevealedBid {
    pub player: PlayerId,
    pub amount: u64,
    pub seq: u64,
}

impl AwardRule {
    pub fn decide(&self, bids: &[RevealedBid]) -> Option<Award> {
        let eligible: Vec<&RevealedBid> =
            bids.iter().filter(|b| b.amount >= self.min_bid).collect();
        let top = eligible.iter().map(|b| b.amount).max()?;
        let mut leaders: Vec<&RevealedBid> =
            eligible.into_iter().filter(|b| b.amount == top).collect();
        if leaders.len() > 1 && self.tie_break == TieBreak::NoAward {
            return None;
        }
        leaders.sort_by_key(|b| (b.seq, b.player));
        leaders.first().map(|b| Award {
            winner: b.player,
            amount: b.amount,
        })
    }
}

/// Tunable numbers of the settlement and bidding rules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleTable {
    /// Multiplier on catalog `base_usd` (one client revision printed values in thousands).
    pub production_multiplier: i64,
    pub steal_percent: i64,
    pub sabotage_percent: i64,
    pub ml_award: AwardRule,
    pub auction_award: AwardRule,
}

impl Default for RuleTable {
    fn default() -> Self {
        Self {
            production_multiplier: 1,
            steal_percent: 20,
            sabotage_percent: 30,
            ml_award: AwardRule::default(),
            auction_award: AwardRule::default(),
        }
    }
}
