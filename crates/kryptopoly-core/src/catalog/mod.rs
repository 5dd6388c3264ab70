//! Static game data: markets, cards, trend and price tables.

mod loader;
mod types;

pub use loader::{load_catalog, CatalogError, CatalogSource};
pub use types::*;

use kryptopoly_protocol::CardId;

/// Normalise scanned card text into a card id.
///
/// Accepts a bare id (`I03`), a link ending in `/card/<ID>` or a
/// `KRYPTOPOLY:<ID>` payload. Returns `None` when nothing usable remains.
pub fn parse_card_code(raw: &str) -> Option<CardId> {
    let trimmed = raw.trim();
    let tail = if let Some(pos) = trimmed.rfind("/card/") {
        &trimmed[pos + "/card/".len()..]
    } else if trimmed
        .get(..11)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("KRYPTOPOLY:"))
    {
        &trimmed[11..]
    } else {
        trimmed
    };
    // Links may carry a query string or fragment.
    let tail = tail.split(['?', '#']).next().unwrap_or_default();
    let id: String = tail
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    (!id.is_empty()).then(|| CardId::new(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_codes_normalise() {
        assert_eq!(parse_card_code("I03"), Some(CardId::new("I03")));
        assert_eq!(parse_card_code(" i03 \n"), Some(CardId::new("I03")));
        assert_eq!(
            parse_card_code("https://kryptopoly.app/card/f02?src=qr"),
            Some(CardId::new("F02"))
        );
        assert_eq!(
            parse_card_code("KRYPTOPOLY:E05"),
            Some(CardId::new("E05"))
        );
        assert_eq!(parse_card_code("!!"), None);
    }
}
