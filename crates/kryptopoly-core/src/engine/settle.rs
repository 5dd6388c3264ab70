//! SETTLE step: secret lawyer/lobbyist actions, audits and payment.

use std::collections::BTreeMap;

use kryptopoly_protocol::{
    Breakdown, Coin, CommandOutput, ExpertKind, LawyerChoice, LobbyAction, PlayerId,
    SecretActions, Step,
};
use tracing::{debug, info};

use super::{Applied, PhaseEngine};
use crate::catalog::CatalogError;
use crate::error::EngineError;
use crate::settlement::{settle_all, settle_player, SettlementInput};

impl PhaseEngine {
    fn settle_with<T>(
        &self,
        secrets: &BTreeMap<PlayerId, SecretActions>,
        run: impl FnOnce(&SettlementInput<'_>) -> T,
    ) -> Result<T, EngineError> {
        let table = self
            .catalog
            .year(self.progress.year)
            .ok_or(CatalogError::MissingYear(self.progress.year))?;
        let trades: BTreeMap<PlayerId, BTreeMap<Coin, i64>> = self
            .progress
            .current
            .crypto
            .committed()
            .into_iter()
            .map(|(player, deltas, _)| (player, deltas.clone()))
            .collect();
        let input = SettlementInput {
            catalog: &self.catalog,
            rules: &self.rules,
            table,
            holdings: &self.progress.holdings,
            secrets,
            trades: &trades,
        };
        Ok(run(&input))
    }

    /// The player's settlement as it stands: their own secret actions plus
    /// those of players whose audit already froze them.
    fn preview(&self, player: PlayerId) -> Result<Breakdown, EngineError> {
        let current = &self.progress.current;
        let secrets: BTreeMap<PlayerId, SecretActions> = current
            .secrets
            .iter()
            .filter(|(p, _)| **p == player || current.audits.is_committed(**p))
            .map(|(p, s)| (*p, s.clone()))
            .collect();
        self.settle_with(&secrets, |input| settle_player(input, player))
    }

    fn compute_finals(&mut self) -> Result<(), EngineError> {
        let finals = self.settle_with(&self.progress.current.secrets, settle_all)?;
        debug!("Final breakdowns computed for year {}", self.progress.year);
        self.progress.current.finals = Some(finals);
        Ok(())
    }

    fn audit_output(&self, player: PlayerId) -> Result<CommandOutput, EngineError> {
        if let Some(breakdown) = self
            .progress
            .current
            .finals
            .as_ref()
            .and_then(|finals| finals.get(&player))
        {
            return Ok(CommandOutput::Audit {
                breakdown: breakdown.clone(),
                is_final: true,
            });
        }
        Ok(CommandOutput::Audit {
            breakdown: self.preview(player)?,
            is_final: false,
        })
    }

    /// Secret actions are frozen once the audit starts.
    fn expect_unfrozen(&self, player: PlayerId) -> Result<(), EngineError> {
        if self.progress.current.audits.is_committed(player) {
            return Err(EngineError::invalid(
                "secret actions are frozen once the audit starts",
            ));
        }
        Ok(())
    }

    pub(super) fn start_audit(&mut self, player: PlayerId) -> Result<Applied, EngineError> {
        self.expect_step(Step::Settle)?;
        let replayed = self.progress.current.audits.is_committed(player);
        if !replayed {
            let seq = self.next_seq();
            self.progress.current.audits.commit(player, (), seq);
        }
        let everyone_started = self
            .players
            .iter()
            .all(|p| self.progress.current.audits.is_committed(*p));
        if everyone_started && self.progress.current.finals.is_none() {
            self.compute_finals()?;
        }
        Ok(Applied::replayable(self.audit_output(player)?, replayed))
    }

    pub(super) fn set_secret_lawyer(
        &mut self,
        player: PlayerId,
        choice: &LawyerChoice,
    ) -> Result<Applied, EngineError> {
        self.expect_step(Step::Settle)?;
        self.expect_unfrozen(player)?;
        if *choice != LawyerChoice::None
            && self.unused_experts(player, ExpertKind::Lawyer).is_empty()
        {
            return Err(EngineError::invalid("no unused lawyer card"));
        }
        if let LawyerChoice::BlockTrend { trend } = choice {
            let known = self
                .catalog
                .year(self.progress.year)
                .and_then(|table| table.global_trend(trend))
                .is_some();
            if !known {
                return Err(EngineError::invalid(format!(
                    "{trend} is not a global trend of year {}",
                    self.progress.year
                )));
            }
        }
        let secret = self.progress.current.secrets.entry(player).or_default();
        secret.lawyer = choice.clone();
        Ok(Applied::changed(CommandOutput::Secret {
            secret: secret.clone(),
        }))
    }

    pub(super) fn add_secret_lobby(
        &mut self,
        player: PlayerId,
        action: &LobbyAction,
    ) -> Result<Applied, EngineError> {
        self.expect_step(Step::Settle)?;
        self.expect_unfrozen(player)?;
        if action.target == player || action.target == PlayerId::GM {
            return Err(EngineError::invalid("lobby actions target another player"));
        }
        if !self.players.contains(&action.target) {
            return Err(EngineError::UnknownPlayer(action.target));
        }
        let planned = self
            .progress
            .current
            .secrets
            .get(&player)
            .map_or(0, |s| s.lobby.len());
        if planned >= self.unused_experts(player, ExpertKind::Lobbyist).len() {
            return Err(EngineError::invalid("no unused lobbyist card"));
        }
        let secret = self.progress.current.secrets.entry(player).or_default();
        secret.lobby.push(action.clone());
        Ok(Applied::changed(CommandOutput::Secret {
            secret: secret.clone(),
        }))
    }

    pub(super) fn pay_audit(&mut self, player: PlayerId) -> Result<Applied, EngineError> {
        self.expect_step(Step::Settle)?;
        if self.progress.current.finals.is_none() {
            return Err(EngineError::invalid("final breakdowns are not ready"));
        }
        let fresh = self.progress.current.paid.insert(player);
        Ok(Applied::replayable(self.audit_output(player)?, !fresh))
    }

    pub(super) fn preview_audit(&self, player: PlayerId) -> Result<Applied, EngineError> {
        self.expect_step(Step::Settle)?;
        Ok(Applied::unchanged(self.audit_output(player)?))
    }

    /// Apply the year's breakdowns: crypto balances, used experts, history.
    pub(super) fn close_settle(&mut self) -> Result<(), EngineError> {
        if self.progress.current.finals.is_none() {
            self.compute_finals()?;
        }
        let finals = self.progress.current.finals.clone().unwrap_or_default();
        let trades: BTreeMap<PlayerId, BTreeMap<Coin, i64>> = self
            .progress
            .current
            .crypto
            .committed()
            .into_iter()
            .map(|(player, deltas, _)| (player, deltas.clone()))
            .collect();
        let secrets = self.progress.current.secrets.clone();

        for player in self.players.clone() {
            let lobbyists = secrets.get(&player).map_or(0, |s| s.lobby.len());
            let lawyer_used = secrets
                .get(&player)
                .is_some_and(|s| s.lawyer != LawyerChoice::None);
            self.consume_experts(player, ExpertKind::Lobbyist, lobbyists);
            if lawyer_used {
                self.consume_experts(player, ExpertKind::Lawyer, 1);
            }

            let breakdown = finals.get(&player).cloned();
            if let Some(holdings) = self.progress.holdings.get_mut(&player) {
                for (coin, delta) in trades.get(&player).into_iter().flatten() {
                    let balance = holdings.crypto.entry(coin.clone()).or_default();
                    *balance = balance.saturating_add(*delta);
                }
                if let Some(breakdown) = &breakdown {
                    for (coin, units) in &breakdown.mined {
                        let balance = holdings.crypto.entry(coin.clone()).or_default();
                        *balance = balance.saturating_add(*units);
                    }
                }
            }
            if let Some(breakdown) = breakdown {
                self.progress
                    .history
                    .entry(player)
                    .or_default()
                    .push(breakdown);
            }
        }
        info!("Year {} settled", self.progress.year);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use kryptopoly_protocol::{CardId, Command, ErrorKind, LineKind, LobbyActionKind, TrendKey};

    use super::super::test_support::*;
    use super::*;

    fn audit_of(applied: Applied) -> (Breakdown, bool) {
        match applied.output {
            CommandOutput::Audit {
                breakdown,
                is_final,
            } => (breakdown, is_final),
            other => panic!("expected audit, got {other:?}"),
        }
    }

    fn lobby(kind: LobbyActionKind, target: PlayerId) -> Command {
        Command::AddSecretLobby {
            action: LobbyAction { kind, target },
        }
    }

    #[test]
    fn preview_then_final() {
        let mut engine = engine(&[P1, P2]);
        give(&mut engine, P1, &["I01"]);
        give(&mut engine, P2, &["I03", "E05"]);
        advance_to(&mut engine, Step::Settle);

        let (preview, is_final) = audit_of(engine.apply(P1, &Command::PreviewAudit).unwrap());
        assert!(!is_final);
        assert_eq!(preview.lines[0].amount_usd, 14000);

        let err = engine.apply(P1, &Command::PayAudit).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        engine.apply(P2, &lobby(LobbyActionKind::Steal, P1)).unwrap();
        let (_, is_final) = audit_of(engine.apply(P1, &Command::StartAudit).unwrap());
        assert!(!is_final);
        let (p2, is_final) = audit_of(engine.apply(P2, &Command::StartAudit).unwrap());
        assert!(is_final);
        assert_eq!(
            p2.line(&LineKind::LobbyGain { from: P1 }).unwrap().amount_usd,
            2800
        );

        let (final_p1, is_final) = audit_of(engine.apply(P1, &Command::PreviewAudit).unwrap());
        assert!(is_final);
        assert_eq!(
            final_p1
                .line(&LineKind::LobbyHit {
                    by: P2,
                    action: LobbyActionKind::Steal
                })
                .unwrap()
                .amount_usd,
            -2800
        );
        let paid = engine.apply(P1, &Command::PayAudit).unwrap();
        assert!(paid.changed);
        assert!(!engine.apply(P1, &Command::PayAudit).unwrap().changed);
    }

    #[test]
    fn secrets_freeze_at_audit() {
        let mut engine = engine(&[P1, P2]);
        give(&mut engine, P1, &["E01", "E05"]);
        advance_to(&mut engine, Step::Settle);
        engine.apply(P1, &Command::StartAudit).unwrap();
        let err = engine
            .apply(
                P1,
                &Command::SetSecretLawyer {
                    choice: LawyerChoice::ShieldLobby,
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = engine
            .apply(P1, &lobby(LobbyActionKind::Sabotage, P2))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn secret_actions_need_cards_and_valid_targets() {
        let mut engine = engine(&[P1, P2]);
        advance_to(&mut engine, Step::Settle);
        let block = Command::SetSecretLawyer {
            choice: LawyerChoice::BlockTrend {
                trend: TrendKey::new("DROUGHT"),
            },
        };
        let err = engine.apply(P1, &block).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        give(&mut engine, P1, &["E01", "E05"]);
        engine.apply(P1, &block).unwrap();
        let err = engine
            .apply(
                P1,
                &Command::SetSecretLawyer {
                    choice: LawyerChoice::BlockTrend {
                        trend: TrendKey::new("EU_GREEN_DEAL"),
                    },
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = engine
            .apply(P1, &lobby(LobbyActionKind::Steal, P1))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = engine
            .apply(P1, &lobby(LobbyActionKind::Steal, PlayerId(5)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        engine
            .apply(P1, &lobby(LobbyActionKind::Steal, P2))
            .unwrap();
        let err = engine
            .apply(P1, &lobby(LobbyActionKind::Sabotage, P2))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn settle_close_updates_holdings_and_history() {
        let mut engine = engine(&[P1]);
        give(&mut engine, P1, &["E01"]);
        advance_to(&mut engine, Step::Crypto);
        engine
            .apply(
                P1,
                &Command::CommitCryptoTrade {
                    deltas: BTreeMap::from([(Coin::new("ETH"), 3)]),
                },
            )
            .unwrap();
        advance_to(&mut engine, Step::Settle);
        engine
            .apply(
                P1,
                &Command::SetSecretLawyer {
                    choice: LawyerChoice::ShieldLobby,
                },
            )
            .unwrap();
        engine.apply(GM, &Command::AdvancePhase).unwrap();

        assert_eq!(engine.year(), 2);
        assert_eq!(engine.step(), Step::MlBid);
        let holdings = engine.holdings(P1).unwrap();
        assert_eq!(holdings.crypto.get(&Coin::new("ETH")), Some(&3));
        assert!(holdings.used_experts.contains(&CardId::new("E01")));
        let history = &engine.progress().history[&P1];
        assert_eq!(history.len(), 1);
        // 3 ETH at 2000 with a 100% coefficient.
        assert_eq!(history[0].total_usd, -6000);
        assert!(engine.progress().current.secrets.is_empty());
    }
}
