use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    Breakdown, CardId, CardPreview, Coin, LawyerChoice, LobbyAction, MarketId, SecretActions,
    SessionSnapshot, SessionStatus, Step, StepPayload,
};

/// All possible client→session commands. Fully serializable.
///
/// The issuing player is never part of the command; the gateway attaches the
/// authenticated player id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    // Game Master
    StartGame,
    AdvancePhase,
    RollbackPhase,

    // BIZ
    /// `None` is an explicit "no bid".
    CommitMlBid {
        amount: Option<u64>,
    },
    PickMarket {
        market: MarketId,
    },
    /// Round 1 of the envelope auction. `bid: None` with `used_lobbyist: false`
    /// declines; `bid: None` with `used_lobbyist: true` defers to the last look.
    CommitAuctionBid {
        bid: Option<u64>,
        #[serde(default)]
        used_lobbyist: bool,
    },
    /// Round 2, lobbyist flaggers only.
    CommitAuctionFinalBid {
        bid: Option<u64>,
    },
    ScanPreview {
        raw_code: String,
    },
    ClaimCard {
        card: CardId,
    },
    CommitAcquireDone,

    // CRYPTO
    CommitCryptoTrade {
        #[serde(default)]
        deltas: BTreeMap<Coin, i64>,
    },

    // SETTLE
    StartAudit,
    SetSecretLawyer {
        choice: LawyerChoice,
    },
    AddSecretLobby {
        action: LobbyAction,
    },
    PayAudit,
    /// Query: the player's settlement as it stands right now.
    PreviewAudit,

    /// Query: the caller's redacted snapshot.
    Snapshot,
}

impl Command {
    /// Commands only the Game Master may issue.
    pub fn is_gm_only(&self) -> bool {
        matches!(
            self,
            Command::StartGame | Command::AdvancePhase | Command::RollbackPhase
        )
    }

    /// Queries never mutate session state.
    pub fn is_query(&self) -> bool {
        matches!(self, Command::PreviewAudit | Command::Snapshot)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::StartGame => "StartGame",
            Command::AdvancePhase => "AdvancePhase",
            Command::RollbackPhase => "RollbackPhase",
            Command::CommitMlBid { .. } => "CommitMlBid",
            Command::PickMarket { .. } => "PickMarket",
            Command::CommitAuctionBid { .. } => "CommitAuctionBid",
            Command::CommitAuctionFinalBid { .. } => "CommitAuctionFinalBid",
            Command::ScanPreview { .. } => "ScanPreview",
            Command::ClaimCard { .. } => "ClaimCard",
            Command::CommitAcquireDone => "CommitAcquireDone",
            Command::CommitCryptoTrade { .. } => "CommitCryptoTrade",
            Command::StartAudit => "StartAudit",
            Command::SetSecretLawyer { .. } => "SetSecretLawyer",
            Command::AddSecretLobby { .. } => "AddSecretLobby",
            Command::PayAudit => "PayAudit",
            Command::PreviewAudit => "PreviewAudit",
            Command::Snapshot => "Snapshot",
        }
    }
}

/// Reply data of a successful command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CommandOutput {
    /// Game started, advanced or rolled back; the new cursor.
    Cursor {
        status: SessionStatus,
        year: u8,
        step: Step,
    },
    Committed {
        payload: StepPayload,
        /// The command repeated an earlier commit; nothing changed.
        replayed: bool,
    },
    Preview {
        preview: CardPreview,
    },
    Claimed {
        card: CardId,
        replayed: bool,
    },
    Secret {
        secret: SecretActions,
    },
    Audit {
        breakdown: Breakdown,
        /// `false` while other players may still change the outcome.
        is_final: bool,
    },
    Snapshot {
        snapshot: Box<SessionSnapshot>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_client_json() {
        let cmd: Command =
            serde_json::from_str(r#"{"type":"CommitAuctionBid","bid":null,"used_lobbyist":true}"#)
                .unwrap();
        assert_eq!(
            cmd,
            Command::CommitAuctionBid {
                bid: None,
                used_lobbyist: true
            }
        );

        let cmd: Command = serde_json::from_str(r#"{"type":"CommitCryptoTrade"}"#).unwrap();
        assert!(matches!(cmd, Command::CommitCryptoTrade { deltas } if deltas.is_empty()));
    }

    #[test]
    fn gm_commands_are_flagged() {
        assert!(Command::AdvancePhase.is_gm_only());
        assert!(!Command::StartAudit.is_gm_only());
        assert!(Command::PreviewAudit.is_query());
    }
}
