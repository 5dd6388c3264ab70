use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{CardId, Coin, MarketId, PlayerId, TrendKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Gm,
    Player,
}

/// Session lifecycle. Only ever moves forward: LOBBY → IN_PROGRESS → GAME_OVER.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Lobby,
    InProgress,
    GameOver,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Lobby => "LOBBY",
            SessionStatus::InProgress => "IN_PROGRESS",
            SessionStatus::GameOver => "GAME_OVER",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Biz,
    Crypto,
    Settle,
}

/// Steps of a game year, in play order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    MlBid,
    Move,
    AuctionEnvelope,
    Acquire,
    Crypto,
    Settle,
}

impl Step {
    pub const ALL: [Step; 6] = [
        Step::MlBid,
        Step::Move,
        Step::AuctionEnvelope,
        Step::Acquire,
        Step::Crypto,
        Step::Settle,
    ];

    pub const FIRST: Step = Step::MlBid;

    pub fn phase(self) -> Phase {
        match self {
            Step::MlBid | Step::Move | Step::AuctionEnvelope | Step::Acquire => Phase::Biz,
            Step::Crypto => Phase::Crypto,
            Step::Settle => Phase::Settle,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Step::MlBid => 0,
            Step::Move => 1,
            Step::AuctionEnvelope => 2,
            Step::Acquire => 3,
            Step::Crypto => 4,
            Step::Settle => 5,
        }
    }

    /// Next step within the same year, `None` after SETTLE.
    pub fn next(self) -> Option<Step> {
        Step::ALL.get(self.index() + 1).copied()
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::MlBid => "ML_BID",
            Step::Move => "MOVE",
            Step::AuctionEnvelope => "AUCTION_ENVELOPE",
            Step::Acquire => "ACQUIRE",
            Step::Crypto => "CRYPTO",
            Step::Settle => "SETTLE",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Continent {
    Europe,
    Asia,
    Africa,
    NorthAmerica,
    SouthAmerica,
    Oceania,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sector {
    Industry,
    Agriculture,
    Technology,
    Energy,
    Finance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpertKind {
    Lawyer,
    Lobbyist,
}

/// Session parameters chosen by the GM at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub years_total: u8,
    /// Including the GM.
    pub max_players: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            years_total: 4,
            max_players: 6,
        }
    }
}

/// Round-1 envelope of the auction step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuctionEntry {
    Bid { amount: u64 },
    Decline,
    /// "I hold a lobbyist and will decide after the last look."
    Lobbyist,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LobbyActionKind {
    Steal,
    Sabotage,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyAction {
    pub kind: LobbyActionKind,
    pub target: PlayerId,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LawyerChoice {
    #[default]
    None,
    ShieldLobby,
    BlockTrend {
        trend: TrendKey,
    },
}

/// Secret SETTLE-phase actions of one player.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretActions {
    pub lawyer: LawyerChoice,
    pub lobby: Vec<LobbyAction>,
}

impl SecretActions {
    pub fn is_empty(&self) -> bool {
        self.lawyer == LawyerChoice::None && self.lobby.is_empty()
    }
}

/// Committed payload of a step, one variant per step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepPayload {
    MlBid {
        /// `None` is the explicit "no bid" marker.
        amount: Option<u64>,
    },
    Move {
        market: MarketId,
    },
    AuctionEnvelope {
        entry: AuctionEntry,
        /// Last-look decision; only present for lobbyist entries once submitted.
        #[serde(default)]
        final_bid: Option<Option<u64>>,
    },
    Acquire {
        claimed: Vec<CardId>,
        done: bool,
    },
    Crypto {
        /// Units bought (positive) or sold (negative); empty means "no trade".
        deltas: BTreeMap<Coin, i64>,
    },
    Settle {
        audit_started: bool,
        paid: bool,
    },
}

/// Winner of a sealed bid (ML bid or auction envelope).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Award {
    pub winner: PlayerId,
    pub amount: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_run_in_order() {
        let mut step = Step::FIRST;
        let mut seen = vec![step];
        while let Some(next) = step.next() {
            seen.push(next);
            step = next;
        }
        assert_eq!(seen, Step::ALL.to_vec());
        assert_eq!(Step::Acquire.phase(), Phase::Biz);
        assert_eq!(Step::Settle.phase(), Phase::Settle);
    }

    #[test]
    fn wire_names_match_client() {
        assert_eq!(
            serde_json::to_string(&Step::AuctionEnvelope).unwrap(),
            "\"AUCTION_ENVELOPE\""
        );
        assert_eq!(
            serde_json::to_string(&SessionStatus::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
        let choice = LawyerChoice::BlockTrend {
            trend: TrendKey::new("AI_BOOM"),
        };
        assert_eq!(
            serde_json::to_string(&choice).unwrap(),
            r#"{"type":"BLOCK_TREND","trend":"AI_BOOM"}"#
        );
    }
}
