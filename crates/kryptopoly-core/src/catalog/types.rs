use std::collections::BTreeMap;

use kryptopoly_protocol::{
    CardDef, CardId, Coin, Continent, CryptoTrend, ExpertCard, ExpertKind, GlobalTrend,
    InvestmentCard, MarketDef, MarketId, MiningFarmCard, RegionalTrend, Sector, TrendEffect,
    TrendKey, YearTable,
};
use serde::Deserialize;

/// Farms come online in the second year of the game.
fn default_farm_year() -> u8 {
    2
}

/// Read-only static data of a game: markets, cards and per-year tables.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub markets: BTreeMap<MarketId, MarketDef>,
    pub cards: BTreeMap<CardId, CardDef>,
    pub years: BTreeMap<u8, YearTable>,
}

impl Catalog {
    pub fn market(&self, id: &MarketId) -> Option<&MarketDef> {
        self.markets.get(id)
    }

    pub fn card(&self, id: &CardId) -> Option<&CardDef> {
        self.cards.get(id)
    }

    pub fn year(&self, year: u8) -> Option<&YearTable> {
        self.years.get(&year)
    }

    pub fn expert_kind(&self, id: &CardId) -> Option<ExpertKind> {
        match self.cards.get(id)? {
            CardDef::Expert(expert) => Some(expert.kind),
            _ => None,
        }
    }

    /// Number of consecutive years, starting at 1, that have a table.
    pub fn years_covered(&self) -> u8 {
        let mut n = 0u8;
        while self.years.contains_key(&(n + 1)) {
            n += 1;
        }
        n
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMarket {
    pub name: String,
    pub continent: Continent,
}

impl RawMarket {
    pub fn compile(self, id: &str) -> MarketDef {
        MarketDef {
            id: MarketId::new(id),
            name: self.name,
            continent: self.continent,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCards {
    #[serde(default)]
    pub investments: BTreeMap<String, RawInvestment>,
    #[serde(default)]
    pub farms: BTreeMap<String, RawFarm>,
    #[serde(default)]
    pub experts: BTreeMap<String, RawExpert>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawInvestment {
    pub name: String,
    pub continent: Continent,
    pub sector: Sector,
    pub base_usd: i64,
}

impl RawInvestment {
    pub fn compile(self, id: &str) -> CardDef {
        CardDef::Investment(InvestmentCard {
            id: CardId::new(id),
            name: self.name,
            continent: self.continent,
            sector: self.sector,
            base_usd: self.base_usd,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFarm {
    pub name: String,
    pub continent: Continent,
    pub coin: String,
    pub units_per_year: i64,
    pub electricity_usd: i64,
    #[serde(default = "default_farm_year")]
    pub available_from_year: u8,
}

impl RawFarm {
    pub fn compile(self, id: &str) -> CardDef {
        CardDef::MiningFarm(MiningFarmCard {
            id: CardId::new(id),
            name: self.name,
            continent: self.continent,
            coin: Coin::new(self.coin),
            units_per_year: self.units_per_year.max(0),
            electricity_usd: self.electricity_usd.max(0),
            available_from_year: self.available_from_year.max(1),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawExpert {
    pub name: String,
    pub kind: ExpertKind,
}

impl RawExpert {
    pub fn compile(self, id: &str) -> CardDef {
        CardDef::Expert(ExpertCard {
            id: CardId::new(id),
            name: self.name,
            kind: self.kind,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawYear {
    #[serde(default)]
    pub global_trends: BTreeMap<String, RawGlobalTrend>,
    pub crypto_trend: RawKeyedTrend,
    #[serde(default)]
    pub regional_trends: BTreeMap<Continent, RawKeyedTrend>,
    #[serde(default)]
    pub crypto_prices: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawGlobalTrend {
    pub name: String,
    pub effect: TrendEffect,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawKeyedTrend {
    pub key: String,
    pub name: String,
    #[serde(alias = "coefficient_percent")]
    pub percent: i64,
}

impl RawYear {
    pub fn compile(self, year: u8) -> YearTable {
        YearTable {
            year,
            global_trends: self
                .global_trends
                .into_iter()
                .map(|(key, raw)| GlobalTrend {
                    key: TrendKey::new(key),
                    name: raw.name,
                    effect: raw.effect,
                })
                .collect(),
            crypto_trend: CryptoTrend {
                key: TrendKey::new(self.crypto_trend.key),
                name: self.crypto_trend.name,
                coefficient_percent: self.crypto_trend.percent,
            },
            regional_trends: self
                .regional_trends
                .into_iter()
                .map(|(continent, raw)| {
                    (
                        continent,
                        RegionalTrend {
                            key: TrendKey::new(raw.key),
                            name: raw.name,
                            percent: raw.percent,
                        },
                    )
                })
                .collect(),
            crypto_prices: self
                .crypto_prices
                .into_iter()
                .map(|(coin, price)| (Coin::new(coin), price))
                .collect(),
        }
    }
}
