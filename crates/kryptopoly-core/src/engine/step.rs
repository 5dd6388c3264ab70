//! Step completion predicates and per-step payloads.
//!
//! Readiness never drives the cursor; it only tells the Game Master who is
//! done. Every non-GM player is required, connected or not.

use kryptopoly_protocol::{AuctionEntry, PlayerId, Readiness, Step, StepPayload};

use super::year::YearState;

/// Has `player` completed `step`?
pub fn is_ready(year: &YearState, players: &[PlayerId], step: Step, player: PlayerId) -> bool {
    match step {
        Step::MlBid => year.ml_bids.is_committed(player),
        Step::Move => {
            year.moves.is_committed(player) && year.market_locks.held_by(player).count() == 1
        }
        Step::AuctionEnvelope => match year.auction.payload(player) {
            None => false,
            Some(AuctionEntry::Bid { .. }) | Some(AuctionEntry::Decline) => true,
            Some(AuctionEntry::Lobbyist) => {
                year.last_look_open(players) && year.auction_final.is_committed(player)
            }
        },
        Step::Acquire => {
            year.acquire_done.contains(&player)
                || (!year.claimed_by(player).is_empty()
                    && !year.pending_scan.contains_key(&player))
        }
        Step::Crypto => year.crypto.is_committed(player),
        Step::Settle => year.audits.is_committed(player),
    }
}

/// Has `player` committed anything for `step`?
pub fn is_committed(year: &YearState, step: Step, player: PlayerId) -> bool {
    match step {
        Step::MlBid => year.ml_bids.is_committed(player),
        Step::Move => year.moves.is_committed(player),
        Step::AuctionEnvelope => year.auction.is_committed(player),
        Step::Acquire => year.acquire_done.contains(&player),
        Step::Crypto => year.crypto.is_committed(player),
        Step::Settle => year.audits.is_committed(player),
    }
}

pub fn readiness(year: &YearState, players: &[PlayerId], step: Step) -> Readiness {
    let ready_players: Vec<PlayerId> = players
        .iter()
        .copied()
        .filter(|p| is_ready(year, players, step, *p))
        .collect();
    Readiness {
        ready: ready_players.len() as u8,
        required: players.len() as u8,
        ready_players,
    }
}

/// The player's current payload for `step`, if there is anything to show.
pub fn payload(year: &YearState, step: Step, player: PlayerId) -> Option<StepPayload> {
    match step {
        Step::MlBid => year
            .ml_bids
            .payload(player)
            .map(|amount| StepPayload::MlBid { amount: *amount }),
        Step::Move => year
            .moves
            .payload(player)
            .map(|market| StepPayload::Move {
                market: market.clone(),
            }),
        Step::AuctionEnvelope => {
            year.auction
                .payload(player)
                .map(|entry| StepPayload::AuctionEnvelope {
                    entry: entry.clone(),
                    final_bid: year.auction_final.payload(player).copied(),
                })
        }
        Step::Acquire => {
            let claimed = year.claimed_by(player);
            let done = year.acquire_done.contains(&player);
            (done || !claimed.is_empty()).then(|| StepPayload::Acquire {
                claimed: claimed.to_vec(),
                done,
            })
        }
        Step::Crypto => year
            .crypto
            .payload(player)
            .map(|deltas| StepPayload::Crypto {
                deltas: deltas.clone(),
            }),
        Step::Settle => year
            .audits
            .is_committed(player)
            .then(|| StepPayload::Settle {
                audit_started: true,
                paid: year.paid.contains(&player),
            }),
    }
}
