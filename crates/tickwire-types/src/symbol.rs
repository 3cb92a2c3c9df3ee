//! Ticker symbols (AAPL, BINANCE:BTCUSDT format)

use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

/// Ticker symbol, always stored uppercase.
///
/// Symbols are compared after normalization, so `"aapl"` and `" AAPL "`
/// name the same subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Apple Inc.
    pub const AAPL: &'static str = "AAPL";
    /// Bitcoin on Binance
    pub const BINANCE_BTCUSDT: &'static str = "BINANCE:BTCUSDT";

    /// Parse and normalize a symbol
    pub fn parse(s: impl AsRef<str>) -> Result<Self, SymbolError> {
        let trimmed = s.as_ref().trim();

        if trimmed.is_empty() {
            return Err(SymbolError::Empty);
        }

        if let Some(c) = trimmed.chars().find(|c| c.is_whitespace() || c.is_control()) {
            return Err(SymbolError::InvalidChar {
                symbol: trimmed.to_string(),
                found: c,
            });
        }

        Ok(Self(trimmed.to_uppercase()))
    }

    /// Get the symbol as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exchange prefix, if any (e.g., "BINANCE" from "BINANCE:BTCUSDT")
    pub fn exchange(&self) -> Option<&str> {
        self.0.split_once(':').map(|(exchange, _)| exchange)
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for Symbol {
    type Error = SymbolError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(raw).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Error parsing a symbol
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// Symbol was empty after trimming
    #[error("symbol must not be empty")]
    Empty,
    /// Symbol contained whitespace or a control character
    #[error("invalid character {found:?} in symbol: {symbol}")]
    InvalidChar { symbol: String, found: char },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_normalization() {
        let sym = Symbol::parse(" aapl ").unwrap();
        assert_eq!(sym.as_str(), "AAPL");
        assert_eq!(sym, Symbol::parse("AAPL").unwrap());
    }

    #[test]
    fn test_symbol_exchange() {
        let sym: Symbol = "binance:btcusdt".parse().unwrap();
        assert_eq!(sym.as_str(), Symbol::BINANCE_BTCUSDT);
        assert_eq!(sym.exchange(), Some("BINANCE"));
        assert_eq!(Symbol::parse("AAPL").unwrap().exchange(), None);
    }

    #[test]
    fn test_symbol_invalid() {
        assert_eq!(Symbol::parse(""), Err(SymbolError::Empty));
        assert_eq!(Symbol::parse("   "), Err(SymbolError::Empty));
        assert!(matches!(
            Symbol::parse("AA PL"),
            Err(SymbolError::InvalidChar { found: ' ', .. })
        ));
    }

    #[test]
    fn test_symbol_deserialize_normalizes() {
        let sym: Symbol = serde_json::from_str(r#""msft""#).unwrap();
        assert_eq!(sym.as_str(), "MSFT");
        assert!(serde_json::from_str::<Symbol>(r#""""#).is_err());
    }
}
