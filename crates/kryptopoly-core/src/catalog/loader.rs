use std::collections::{BTreeMap, BTreeSet};

use kryptopoly_protocol::{CardDef, Coin, Continent, ErrorKind};
use serde::Deserialize;
use thiserror::Error;

use crate::catalog::{Catalog, RawCards, RawMarket, RawYear};

const CONTINENTS: [Continent; 6] = [
    Continent::Europe,
    Continent::Asia,
    Continent::Africa,
    Continent::NorthAmerica,
    Continent::SouthAmerica,
    Continent::Oceania,
];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("duplicate id: {0}")]
    Duplicate(String),
    #[error("missing referenced id: {0}")]
    MissingRef(String),
    #[error("no trend table for year {0}")]
    MissingYear(u8),
}

impl CatalogError {
    /// A broken catalog means the session cannot be created at all.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Fatal
    }
}

pub enum CatalogSource<'a> {
    Embedded,
    Path(String),
    Bytes {
        markets: &'a [u8],
        cards: &'a [u8],
        years: &'a [u8],
    },
}

#[derive(Debug, Deserialize)]
struct RawCatalog {
    markets: BTreeMap<String, RawMarket>,
    cards: RawCards,
    years: BTreeMap<u8, RawYear>,
}

pub fn load_catalog(source: CatalogSource<'_>) -> Result<Catalog, CatalogError> {
    let raw = match source {
        CatalogSource::Embedded => {
            let markets_yaml = include_str!("../../data/base/markets.yaml");
            let cards_yaml = include_str!("../../data/base/cards.yaml");
            let years_yaml = include_str!("../../data/base/years.yaml");
            parse_raw_catalog(markets_yaml, cards_yaml, years_yaml)?
        }
        CatalogSource::Path(path) => {
            let markets_yaml = std::fs::read_to_string(format!("{path}/markets.yaml"))?;
            let cards_yaml = std::fs::read_to_string(format!("{path}/cards.yaml"))?;
            let years_yaml = std::fs::read_to_string(format!("{path}/years.yaml"))?;
            parse_raw_catalog(&markets_yaml, &cards_yaml, &years_yaml)?
        }
        CatalogSource::Bytes {
            markets,
            cards,
            years,
        } => parse_raw_catalog(
            std::str::from_utf8(markets)?,
            std::str::from_utf8(cards)?,
            std::str::from_utf8(years)?,
        )?,
    };

    compile_catalog(raw)
}

fn parse_raw_catalog(
    markets_yaml: &str,
    cards_yaml: &str,
    years_yaml: &str,
) -> Result<RawCatalog, CatalogError> {
    Ok(RawCatalog {
        markets: serde_yaml::from_str(markets_yaml)?,
        cards: serde_yaml::from_str(cards_yaml)?,
        years: serde_yaml::from_str(years_yaml)?,
    })
}

fn compile_catalog(raw: RawCatalog) -> Result<Catalog, CatalogError> {
    let markets = raw
        .markets
        .into_iter()
        .map(|(id, market)| {
            let def = market.compile(&id);
            (def.id.clone(), def)
        })
        .collect();

    let RawCards {
        investments,
        farms,
        experts,
    } = raw.cards;
    let mut cards = BTreeMap::new();
    let compiled = investments
        .into_iter()
        .map(|(id, card)| card.compile(&id))
        .chain(farms.into_iter().map(|(id, card)| card.compile(&id)))
        .chain(experts.into_iter().map(|(id, card)| card.compile(&id)));
    for card in compiled {
        let id = card.id().clone();
        if cards.insert(id.clone(), card).is_some() {
            return Err(CatalogError::Duplicate(id.to_string()));
        }
    }

    let years = raw
        .years
        .into_iter()
        .map(|(year, table)| (year, table.compile(year)))
        .collect();

    let catalog = Catalog {
        markets,
        cards,
        years,
    };
    validate(&catalog)?;
    Ok(catalog)
}

/// Cross-reference checks that YAML typing alone cannot express.
fn validate(catalog: &Catalog) -> Result<(), CatalogError> {
    if catalog.years_covered() as usize != catalog.years.len() {
        let gap = (1..=u8::MAX)
            .find(|y| !catalog.years.contains_key(y))
            .unwrap_or(u8::MAX);
        return Err(CatalogError::MissingYear(gap));
    }

    let farm_coins: BTreeSet<&Coin> = catalog
        .cards
        .values()
        .filter_map(|card| match card {
            CardDef::MiningFarm(farm) => Some(&farm.coin),
            _ => None,
        })
        .collect();

    for table in catalog.years.values() {
        let mut keys = BTreeSet::new();
        let all_keys = table
            .global_trends
            .iter()
            .map(|t| &t.key)
            .chain(std::iter::once(&table.crypto_trend.key))
            .chain(table.regional_trends.values().map(|t| &t.key));
        for key in all_keys {
            if !keys.insert(key) {
                return Err(CatalogError::Duplicate(format!(
                    "trend {key} in year {}",
                    table.year
                )));
            }
        }

        for continent in CONTINENTS {
            if !table.regional_trends.contains_key(&continent) {
                return Err(CatalogError::MissingRef(format!(
                    "regional trend for {continent:?} in year {}",
                    table.year
                )));
            }
        }

        for coin in &farm_coins {
            if !table.crypto_prices.contains_key(*coin) {
                return Err(CatalogError::MissingRef(format!(
                    "price of {coin} in year {}",
                    table.year
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKETS: &str = "M01:\n  name: Exchange\n  continent: EUROPE\n";
    const CARDS: &str = "investments:\n  I01:\n    name: Mill\n    continent: EUROPE\n    sector: INDUSTRY\n    base_usd: 1000\nfarms:\n  F01:\n    name: Rig\n    continent: ASIA\n    coin: BTC\n    units_per_year: 1\n    electricity_usd: 100\n";

    fn year_yaml(year: u8, btc_price: bool) -> String {
        let price = if btc_price { "BTC: 100" } else { "ETH: 100" };
        format!(
            "{year}:\n  crypto_trend: {{ key: C{year}, name: c, coefficient_percent: 100 }}\n  regional_trends:\n    EUROPE: {{ key: EU{year}, name: r, percent: 0 }}\n    ASIA: {{ key: AS{year}, name: r, percent: 0 }}\n    AFRICA: {{ key: AF{year}, name: r, percent: 0 }}\n    NORTH_AMERICA: {{ key: NA{year}, name: r, percent: 0 }}\n    SOUTH_AMERICA: {{ key: SA{year}, name: r, percent: 0 }}\n    OCEANIA: {{ key: OC{year}, name: r, percent: 0 }}\n  crypto_prices: {{ {price} }}\n"
        )
    }

    fn load(years: &str) -> Result<Catalog, CatalogError> {
        load_catalog(CatalogSource::Bytes {
            markets: MARKETS.as_bytes(),
            cards: CARDS.as_bytes(),
            years: years.as_bytes(),
        })
    }

    #[test]
    fn embedded_catalog_loads() {
        let catalog = load_catalog(CatalogSource::Embedded).unwrap();
        assert_eq!(catalog.years_covered(), 5);
        assert_eq!(catalog.markets.len(), 12);
        let farm = catalog.card(&"F01".into()).unwrap();
        assert_eq!(farm.available_from_year(), 2);
    }

    #[test]
    fn minimal_catalog_loads() {
        let catalog = load(&year_yaml(1, true)).unwrap();
        assert_eq!(catalog.years_covered(), 1);
        assert_eq!(catalog.cards.len(), 2);
    }

    #[test]
    fn gap_in_years_is_rejected() {
        let years = format!("{}{}", year_yaml(1, true), year_yaml(3, true));
        assert!(matches!(load(&years), Err(CatalogError::MissingYear(2))));
    }

    #[test]
    fn unpriced_farm_coin_is_rejected() {
        let err = load(&year_yaml(1, false)).unwrap_err();
        assert!(matches!(err, CatalogError::MissingRef(_)));
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }
}
