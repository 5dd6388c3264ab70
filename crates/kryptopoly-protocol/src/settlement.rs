use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{CardId, Coin, Continent, LobbyActionKind, PlayerId, TrendKey};

/// What produced a settlement line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineKind {
    BaseProduction { card: CardId },
    RegionalBonus { continent: Continent },
    GlobalTrend { trend: TrendKey },
    ElectricityCost { card: CardId },
    CryptoTrade { coin: Coin },
    /// Lost to another player's lobbyist.
    LobbyHit {
        by: PlayerId,
        action: LobbyActionKind,
    },
    /// Gained by this player's own STEAL.
    LobbyGain { from: PlayerId },
    /// A lobby action against this player cancelled by the lawyer (amount 0).
    LobbyShielded {
        by: PlayerId,
        action: LobbyActionKind,
    },
    /// A global trend nullified by the lawyer (amount 0).
    TrendBlocked { trend: TrendKey },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub kind: LineKind,
    pub label: String,
    pub amount_usd: i64,
}

/// Year-end settlement of one player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakdown {
    pub player: PlayerId,
    pub year: u8,
    pub lines: Vec<LineItem>,
    pub total_usd: i64,
    /// Crypto units produced by mining farms this year.
    #[serde(default)]
    pub mined: BTreeMap<Coin, i64>,
}

impl Breakdown {
    pub fn line(&self, kind: &LineKind) -> Option<&LineItem> {
        self.lines.iter().find(|l| &l.kind == kind)
    }
}
