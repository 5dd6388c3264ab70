//! Year-end settlement. A pure function of its inputs: identical inputs give
//! identical breakdowns, line for line.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use kryptopoly_protocol::{
    Breakdown, CardDef, Coin, Continent, InvestmentCard, LawyerChoice, LineItem, LineKind,
    LobbyActionKind, MiningFarmCard, PlayerId, SecretActions, TrendEffect, YearTable,
};

use crate::catalog::Catalog;
use crate::engine::Holdings;
use crate::rules::RuleTable;

pub struct SettlementInput<'a> {
    pub catalog: &'a Catalog,
    pub rules: &'a RuleTable,
    pub table: &'a YearTable,
    pub holdings: &'a BTreeMap<PlayerId, Holdings>,
    pub secrets: &'a BTreeMap<PlayerId, SecretActions>,
    pub trades: &'a BTreeMap<PlayerId, BTreeMap<Coin, i64>>,
}

/// A lobby action after amounts and shields are resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
struct LobbyHit {
    origin: PlayerId,
    target: PlayerId,
    kind: LobbyActionKind,
    index: usize,
    amount: i64,
    shielded: bool,
}

fn percent_of(value: i64, percent: i64) -> i64 {
    value * percent / 100
}

impl<'a> SettlementInput<'a> {
    fn investments(&self, player: PlayerId) -> Vec<&'a InvestmentCard> {
        self.cards(player)
            .filter_map(|card| match card {
                CardDef::Investment(inv) => Some(inv),
                _ => None,
            })
            .collect()
    }

    fn farms(&self, player: PlayerId) -> Vec<&'a MiningFarmCard> {
        self.cards(player)
            .filter_map(|card| match card {
                CardDef::MiningFarm(farm) => Some(farm),
                _ => None,
            })
            .collect()
    }

    fn cards(&self, player: PlayerId) -> impl Iterator<Item = &'a CardDef> + '_ {
        let catalog = self.catalog;
        self.holdings
            .get(&player)
            .into_iter()
            .flat_map(|h| h.cards.iter())
            .filter_map(move |id| catalog.card(id))
    }

    fn base(&self, card: &InvestmentCard) -> i64 {
        card.base_usd * self.rules.production_multiplier
    }

    /// Base production before any trend, the reference for lobby amounts.
    pub fn base_production(&self, player: PlayerId) -> i64 {
        self.investments(player).iter().map(|c| self.base(c)).sum()
    }

    fn lawyer(&self, player: PlayerId) -> &LawyerChoice {
        static NONE: LawyerChoice = LawyerChoice::None;
        self.secrets.get(&player).map(|s| &s.lawyer).unwrap_or(&NONE)
    }

    fn resolve_lobby(&self) -> Vec<LobbyHit> {
        let mut hits = Vec::new();
        for (origin, secret) in self.secrets {
            for (index, action) in secret.lobby.iter().enumerate() {
                if action.target == *origin || !self.holdings.contains_key(&action.target) {
                    continue;
                }
                let percent = match action.kind {
                    LobbyActionKind::Steal => self.rules.steal_percent,
                    LobbyActionKind::Sabotage => self.rules.sabotage_percent,
                };
                hits.push(LobbyHit {
                    origin: *origin,
                    target: action.target,
                    kind: action.kind,
                    index,
                    amount: percent_of(self.base_production(action.target), percent),
                    shielded: false,
                });
            }
        }

        for target in self.holdings.keys() {
            if *self.lawyer(*target) != LawyerChoice::ShieldLobby {
                continue;
            }
            let largest = hits
                .iter_mut()
                .filter(|h| h.target == *target)
                .min_by_key(|h| (Reverse(h.amount), h.origin, h.index));
            if let Some(hit) = largest {
                hit.shielded = true;
            }
        }
        hits
    }

    fn breakdown(&self, player: PlayerId, hits: &[LobbyHit]) -> Breakdown {
        let mut lines = Vec::new();
        let investments = self.investments(player);
        let farms = self.farms(player);

        for card in &investments {
            lines.push(LineItem {
                kind: LineKind::BaseProduction {
                    card: card.id.clone(),
                },
                label: card.name.clone(),
                amount_usd: self.base(card),
            });
        }

        let mut by_continent: BTreeMap<Continent, i64> = BTreeMap::new();
        for card in &investments {
            *by_continent.entry(card.continent).or_default() += self.base(card);
        }
        for (continent, base) in by_continent {
            if let Some(trend) = self.table.regional_trends.get(&continent) {
                lines.push(LineItem {
                    kind: LineKind::RegionalBonus { continent },
                    label: trend.name.clone(),
                    amount_usd: percent_of(base, trend.percent),
                });
            }
        }

        let blocked = match self.lawyer(player) {
            LawyerChoice::BlockTrend { trend } => Some(trend),
            _ => None,
        };
        for trend in &self.table.global_trends {
            if Some(&trend.key) == blocked {
                continue;
            }
            let amount = match &trend.effect {
                TrendEffect::Production { sector, percent } => {
                    let affected: Vec<_> = investments
                        .iter()
                        .filter(|c| sector.map_or(true, |s| s == c.sector))
                        .collect();
                    if affected.is_empty() {
                        continue;
                    }
                    let base: i64 = affected.iter().map(|c| self.base(c)).sum();
                    percent_of(base, *percent)
                }
                TrendEffect::Electricity { percent } => {
                    if farms.is_empty() {
                        continue;
                    }
                    let electricity: i64 = farms.iter().map(|f| f.electricity_usd).sum();
                    -percent_of(electricity, *percent)
                }
            };
            lines.push(LineItem {
                kind: LineKind::GlobalTrend {
                    trend: trend.key.clone(),
                },
                label: trend.name.clone(),
                amount_usd: amount,
            });
        }

        let mut mined: BTreeMap<Coin, i64> = BTreeMap::new();
        for farm in &farms {
            lines.push(LineItem {
                kind: LineKind::ElectricityCost {
                    card: farm.id.clone(),
                },
                label: format!("Electricity: {}", farm.name),
                amount_usd: -farm.electricity_usd,
            });
            *mined.entry(farm.coin.clone()).or_default() += farm.units_per_year;
        }

        if let Some(deltas) = self.trades.get(&player) {
            for (coin, delta) in deltas {
                if *delta == 0 {
                    continue;
                }
                let price = self.table.effective_price(coin).unwrap_or_default();
                lines.push(LineItem {
                    kind: LineKind::CryptoTrade { coin: coin.clone() },
                    label: format!("{coin} trade"),
                    amount_usd: delta.saturating_mul(price).saturating_neg(),
                });
            }
        }

        for hit in hits {
            if hit.target == player {
                let line = if hit.shielded {
                    LineItem {
                        kind: LineKind::LobbyShielded {
                            by: hit.origin,
                            action: hit.kind,
                        },
                        label: format!("Shielded {} by {}", kind_label(hit.kind), hit.origin),
                        amount_usd: 0,
                    }
                } else {
                    LineItem {
                        kind: LineKind::LobbyHit {
                            by: hit.origin,
                            action: hit.kind,
                        },
                        label: format!("{} by {}", kind_label(hit.kind), hit.origin),
                        amount_usd: -hit.amount,
                    }
                };
                lines.push(line);
            }
            if hit.origin == player && hit.kind == LobbyActionKind::Steal && !hit.shielded {
                lines.push(LineItem {
                    kind: LineKind::LobbyGain { from: hit.target },
                    label: format!("Stolen from {}", hit.target),
                    amount_usd: hit.amount,
                });
            }
        }

        if let Some(key) = blocked {
            let name = self
                .table
                .global_trend(key)
                .map(|t| t.name.clone())
                .unwrap_or_else(|| key.to_string());
            lines.push(LineItem {
                kind: LineKind::TrendBlocked { trend: key.clone() },
                label: format!("Blocked: {name}"),
                amount_usd: 0,
            });
        }

        let total_usd = lines
            .iter()
            .fold(0i64, |total, l| total.saturating_add(l.amount_usd));
        Breakdown {
            player,
            year: self.table.year,
            lines,
            total_usd,
            mined,
        }
    }
}

fn kind_label(kind: LobbyActionKind) -> &'static str {
    match kind {
        LobbyActionKind::Steal => "Steal",
        LobbyActionKind::Sabotage => "Sabotage",
    }
}

/// Breakdown of every player in `input.holdings`.
pub fn settle_all(input: &SettlementInput<'_>) -> BTreeMap<PlayerId, Breakdown> {
    let hits = input.resolve_lobby();
    input
        .holdings
        .keys()
        .map(|player| (*player, input.breakdown(*player, &hits)))
        .collect()
}

pub fn settle_player(input: &SettlementInput<'_>, player: PlayerId) -> Breakdown {
    let hits = input.resolve_lobby();
    input.breakdown(player, &hits)
}
