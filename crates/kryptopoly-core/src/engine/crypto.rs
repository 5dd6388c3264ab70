use std::collections::BTreeMap;

use kryptopoly_protocol::{Coin, PlayerId, Step};

use super::{Applied, PhaseEngine};
use crate::error::EngineError;

/// Largest number of units of one coin bought or sold in a single trade.
pub const MAX_TRADE_UNITS: i64 = 1_000_000;

impl PhaseEngine {
    /// Units bought (positive) or sold (negative) at this year's prices.
    /// Zero entries are dropped; an empty trade is "no trade".
    pub(super) fn commit_crypto_trade(
        &mut self,
        player: PlayerId,
        deltas: &BTreeMap<Coin, i64>,
    ) -> Result<Applied, EngineError> {
        self.expect_step(Step::Crypto)?;
        if self.progress.current.crypto.is_committed(player) {
            return self.committed(player, true);
        }

        let trade: BTreeMap<Coin, i64> = deltas
            .iter()
            .filter(|(_, delta)| **delta != 0)
            .map(|(coin, delta)| (coin.clone(), *delta))
            .collect();
        let table = self
            .catalog
            .year(self.progress.year)
            .ok_or_else(|| EngineError::invalid("no price table for this year"))?;
        let balances = self
            .progress
            .holdings
            .get(&player)
            .map(|h| &h.crypto)
            .cloned()
            .unwrap_or_default();
        for (coin, delta) in &trade {
            let Some(price) = table.effective_price(coin) else {
                return Err(EngineError::invalid(format!("{coin} is not traded")));
            };
            if delta.unsigned_abs() > MAX_TRADE_UNITS.unsigned_abs() {
                return Err(EngineError::invalid(format!(
                    "at most {MAX_TRADE_UNITS} {coin} per trade"
                )));
            }
            if delta.checked_mul(price).is_none() {
                return Err(EngineError::invalid(format!("{coin} trade is too large")));
            }
            let owned = balances.get(coin).copied().unwrap_or_default();
            match owned.checked_add(*delta) {
                Some(left) if left >= 0 => {}
                Some(_) => {
                    return Err(EngineError::invalid(format!(
                        "cannot sell {} {coin}, only {owned} owned",
                        delta.unsigned_abs()
                    )))
                }
                None => return Err(EngineError::invalid(format!("{coin} balance overflows"))),
            }
        }

        let seq = self.next_seq();
        self.progress.current.crypto.commit(player, trade, seq);
        self.committed(player, false)
    }
}

#[cfg(test)]
mod tests {
    use kryptopoly_protocol::{Command, CommandOutput, ErrorKind, StepPayload};

    use super::super::test_support::*;
    use super::*;

    fn trade(pairs: &[(&str, i64)]) -> Command {
        Command::CommitCryptoTrade {
            deltas: pairs
                .iter()
                .map(|(coin, delta)| (Coin::new(*coin), *delta))
                .collect(),
        }
    }

    #[test]
    fn empty_trade_counts_as_ready() {
        let mut engine = engine(&[P1]);
        advance_to(&mut engine, Step::Crypto);
        let applied = engine.apply(P1, &trade(&[("BTC", 0)])).unwrap();
        assert_eq!(
            applied.output,
            CommandOutput::Committed {
                payload: StepPayload::Crypto {
                    deltas: BTreeMap::new()
                },
                replayed: false
            }
        );
        assert!(engine.readiness().all_ready());
    }

    #[test]
    fn cannot_oversell_or_trade_unknown_coin() {
        let mut engine = engine(&[P1]);
        advance_to(&mut engine, Step::Crypto);
        let err = engine.apply(P1, &trade(&[("BTC", -1)])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = engine.apply(P1, &trade(&[("DOGE", 3)])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!engine.progress().current.crypto.is_committed(P1));

        engine.apply(P1, &trade(&[("ETH", 2)])).unwrap();
        let again = engine.apply(P1, &trade(&[("ETH", 5)])).unwrap();
        assert!(!again.changed);
    }

    #[test]
    fn extreme_deltas_are_rejected() {
        let mut engine = engine(&[P1]);
        advance_to(&mut engine, Step::Crypto);
        for delta in [i64::MIN, i64::MAX / 1000, i64::MAX, MAX_TRADE_UNITS + 1] {
            let err = engine.apply(P1, &trade(&[("BTC", delta)])).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        assert!(!engine.progress().current.crypto.is_committed(P1));

        engine
            .apply(P1, &trade(&[("BTC", MAX_TRADE_UNITS)]))
            .unwrap();
        advance_to(&mut engine, Step::Settle);
        let preview = engine.apply(P1, &Command::PreviewAudit).unwrap();
        assert!(matches!(preview.output, CommandOutput::Audit { .. }));
        engine.apply(GM, &Command::AdvancePhase).unwrap();
        assert_eq!(
            engine.holdings(P1).unwrap().crypto[&Coin::new("BTC")],
            MAX_TRADE_UNITS
        );
    }
}
