//! Per-viewer redaction of engine progress.

use kryptopoly_protocol::{
    GameView, PlayerId, PrivateView, SealedEntryView, SessionStatus, Step, StepPayload,
    YearResults,
};

use super::{step, PhaseEngine};

impl PhaseEngine {
    /// May `viewer` see `owner`'s payload for the active step?
    fn can_see(&self, viewer: PlayerId, owner: PlayerId) -> bool {
        if viewer == owner {
            return true;
        }
        self.progress.step == Step::AuctionEnvelope
            && self.last_look_open()
            && self.progress.current.is_flagger(viewer)
    }

    /// `owner`'s payload as `viewer` may see it. During the last look a
    /// flagger sees round-1 envelopes only, never another final bid.
    fn visible_payload(&self, viewer: PlayerId, owner: PlayerId) -> Option<StepPayload> {
        if !self.can_see(viewer, owner) {
            return None;
        }
        let payload = step::payload(&self.progress.current, self.progress.step, owner)?;
        if viewer == owner {
            return Some(payload);
        }
        match payload {
            StepPayload::AuctionEnvelope { entry, .. } => Some(StepPayload::AuctionEnvelope {
                entry,
                final_bid: None,
            }),
            other => Some(other),
        }
    }

    /// Everything `viewer` is allowed to know. Sealed payloads of other
    /// players stay hidden until their step closes; revealed bids then show
    /// up in `results`.
    pub fn view_for(&self, viewer: PlayerId) -> GameView {
        let progress = &self.progress;
        let current = &progress.current;
        let active = progress.step;

        let board = self
            .players
            .iter()
            .map(|owner| SealedEntryView {
                player: *owner,
                committed: step::is_committed(current, active, *owner),
                ready: step::is_ready(current, &self.players, active, *owner),
                payload: self.visible_payload(viewer, *owner),
            })
            .collect();

        let results = YearResults {
            ml_bids: current.ml_result.as_ref().map(|r| r.bids.clone()),
            ml_award: current.ml_result.as_ref().and_then(|r| r.award.clone()),
            auction_bids: current.auction_result.as_ref().map(|r| r.bids.clone()),
            auction_award: current
                .auction_result
                .as_ref()
                .and_then(|r| r.award.clone()),
        };

        let me = if self.players.contains(&viewer) {
            PrivateView {
                secret: current.secrets.get(&viewer).cloned(),
                final_breakdown: current
                    .finals
                    .as_ref()
                    .and_then(|finals| finals.get(&viewer))
                    .cloned(),
                pending_scan: current.pending_scan.get(&viewer).cloned(),
                history: progress.history.get(&viewer).cloned().unwrap_or_default(),
            }
        } else {
            PrivateView::default()
        };

        GameView {
            year: progress.year,
            phase: active.phase(),
            step: active,
            readiness: self.readiness(),
            board,
            last_look_open: self.last_look_open(),
            market_locks: current.market_locks.holders(),
            card_claims: progress.card_locks.holders(),
            year_table: (self.status != SessionStatus::Lobby)
                .then(|| self.catalog.year(progress.year).cloned())
                .flatten(),
            results,
            me,
        }
    }
}
