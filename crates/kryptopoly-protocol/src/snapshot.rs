use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    Award, Breakdown, CardDef, CardId, Coin, MarketId, Phase, PlayerId, Role, SecretActions,
    SessionConfig, SessionId, SessionStatus, Step, StepPayload, YearTable,
};

/// Full session state as seen by one viewer. Snapshots are never deltas.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    /// Bumped on every accepted mutation.
    pub version: u64,
    pub status: SessionStatus,
    pub config: SessionConfig,
    pub viewer: PlayerId,
    pub players: Vec<PlayerSnapshot>,
    pub game: GameView,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub name: String,
    pub role: Role,
    pub connected: bool,
    #[serde(default)]
    pub cards: Vec<CardId>,
    #[serde(default)]
    pub used_experts: Vec<CardId>,
    #[serde(default)]
    pub crypto: BTreeMap<Coin, i64>,
}

/// Public portion of an engine's progress, redacted for `viewer`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameView {
    pub year: u8,
    pub phase: Phase,
    pub step: Step,
    pub readiness: Readiness,
    /// Sealed entries of the active step, one per required player.
    pub board: Vec<SealedEntryView>,
    #[serde(default)]
    pub last_look_open: bool,
    #[serde(default)]
    pub market_locks: BTreeMap<MarketId, PlayerId>,
    #[serde(default)]
    pub card_claims: BTreeMap<CardId, PlayerId>,
    /// Trends and prices of the current year; absent before the game starts.
    #[serde(default)]
    pub year_table: Option<YearTable>,
    #[serde(default)]
    pub results: YearResults,
    /// Only ever filled with the viewer's own data.
    #[serde(default)]
    pub me: PrivateView,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: u8,
    pub required: u8,
    pub ready_players: Vec<PlayerId>,
}

impl Readiness {
    pub fn all_ready(&self) -> bool {
        self.ready == self.required
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedEntryView {
    pub player: PlayerId,
    pub committed: bool,
    pub ready: bool,
    /// `None` whenever the viewer may not see it yet.
    #[serde(default)]
    pub payload: Option<StepPayload>,
}

/// Revealed outcomes of closed steps of the current year.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearResults {
    /// `None` entry is an explicit "no bid".
    #[serde(default)]
    pub ml_bids: Option<BTreeMap<PlayerId, Option<u64>>>,
    #[serde(default)]
    pub ml_award: Option<Award>,
    #[serde(default)]
    pub auction_bids: Option<BTreeMap<PlayerId, Option<u64>>>,
    #[serde(default)]
    pub auction_award: Option<Award>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateView {
    #[serde(default)]
    pub secret: Option<SecretActions>,
    #[serde(default)]
    pub final_breakdown: Option<Breakdown>,
    #[serde(default)]
    pub pending_scan: Option<CardPreview>,
    /// Final breakdowns of past years.
    #[serde(default)]
    pub history: Vec<Breakdown>,
}

/// Result of scanning a card during ACQUIRE.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardPreview {
    pub card: CardDef,
    pub holder: Option<PlayerId>,
    pub claimable: bool,
}
