//! Catalog definitions shared with clients (card previews, trend tab).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{CardId, Coin, Continent, ExpertKind, MarketId, Sector, TrendKey};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketDef {
    pub id: MarketId,
    pub name: String,
    pub continent: Continent,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestmentCard {
    pub id: CardId,
    pub name: String,
    pub continent: Continent,
    pub sector: Sector,
    /// Yearly production in USD before trends and the production multiplier.
    pub base_usd: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningFarmCard {
    pub id: CardId,
    pub name: String,
    pub continent: Continent,
    pub coin: Coin,
    pub units_per_year: i64,
    pub electricity_usd: i64,
    pub available_from_year: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpertCard {
    pub id: CardId,
    pub name: String,
    pub kind: ExpertKind,
}

/// Any scannable card.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardDef {
    Investment(InvestmentCard),
    MiningFarm(MiningFarmCard),
    Expert(ExpertCard),
}

impl CardDef {
    pub fn id(&self) -> &CardId {
        match self {
            CardDef::Investment(c) => &c.id,
            CardDef::MiningFarm(c) => &c.id,
            CardDef::Expert(c) => &c.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CardDef::Investment(c) => &c.name,
            CardDef::MiningFarm(c) => &c.name,
            CardDef::Expert(c) => &c.name,
        }
    }

    /// First year the card may be claimed.
    pub fn available_from_year(&self) -> u8 {
        match self {
            CardDef::MiningFarm(c) => c.available_from_year,
            CardDef::Investment(_) | CardDef::Expert(_) => 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendEffect {
    /// Percentage on investment production; `sector: None` hits every sector.
    Production {
        #[serde(default)]
        sector: Option<Sector>,
        percent: i64,
    },
    /// Percentage on mining-farm electricity cost.
    Electricity { percent: i64 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalTrend {
    pub key: TrendKey,
    pub name: String,
    pub effect: TrendEffect,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoTrend {
    pub key: TrendKey,
    pub name: String,
    pub coefficient_percent: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionalTrend {
    pub key: TrendKey,
    pub name: String,
    pub percent: i64,
}

/// Trends and crypto prices of one game year.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearTable {
    pub year: u8,
    pub global_trends: Vec<GlobalTrend>,
    pub crypto_trend: CryptoTrend,
    pub regional_trends: BTreeMap<Continent, RegionalTrend>,
    /// USD per coin unit, before the crypto coefficient.
    pub crypto_prices: BTreeMap<Coin, i64>,
}

impl YearTable {
    pub fn global_trend(&self, key: &TrendKey) -> Option<&GlobalTrend> {
        self.global_trends.iter().find(|t| &t.key == key)
    }

    /// Price after the crypto-coefficient trend.
    pub fn effective_price(&self, coin: &Coin) -> Option<i64> {
        self.crypto_prices
            .get(coin)
            .map(|price| price * self.crypto_trend.coefficient_percent / 100)
    }

    pub fn effective_prices(&self) -> BTreeMap<Coin, i64> {
        self.crypto_prices
            .keys()
            .filter_map(|coin| Some((coin.clone(), self.effective_price(coin)?)))
            .collect()
    }
}
