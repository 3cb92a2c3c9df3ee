//! Decoded market events delivered to sinks

use crate::messages::{QuoteData, TradeData};
use crate::symbol::Symbol;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Market data event
///
/// Immutable once built; each registered sink receives its own clone.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    /// Trade print
    Trade {
        /// Symbol
        symbol: Symbol,
        /// Trade price
        price: Decimal,
        /// Trade size
        size: Decimal,
        /// Exchange timestamp
        ts: DateTime<Utc>,
        /// Trade condition codes
        conditions: Vec<String>,
    },
    /// Top-of-book quote
    Quote {
        /// Symbol
        symbol: Symbol,
        /// Best bid price
        bid_price: Decimal,
        /// Best bid size
        bid_size: Decimal,
        /// Best ask price
        ask_price: Decimal,
        /// Best ask size
        ask_size: Decimal,
        /// Exchange timestamp
        ts: DateTime<Utc>,
    },
    /// Error reported by the provider
    Error {
        /// Error code, if any
        code: Option<String>,
        /// Error text
        message: String,
    },
    /// Keep-alive
    Heartbeat,
}

impl MarketEvent {
    /// Symbol this event is about, if any
    pub fn symbol(&self) -> Option<&Symbol> {
        match self {
            Self::Trade { symbol, .. } | Self::Quote { symbol, .. } => Some(symbol),
            Self::Error { .. } | Self::Heartbeat => None,
        }
    }

    /// Check if this is a heartbeat
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Heartbeat)
    }

    /// Event type name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Trade { .. } => "trade",
            Self::Quote { .. } => "quote",
            Self::Error { .. } => "error",
            Self::Heartbeat => "heartbeat",
        }
    }
}

impl From<TradeData> for MarketEvent {
    fn from(trade: TradeData) -> Self {
        Self::Trade {
            symbol: trade.symbol,
            price: trade.price,
            size: trade.size,
            ts: trade.timestamp,
            conditions: trade.conditions.unwrap_or_default(),
        }
    }
}

impl From<QuoteData> for MarketEvent {
    fn from(quote: QuoteData) -> Self {
        Self::Quote {
            symbol: quote.symbol,
            bid_price: quote.bid_price,
            bid_size: quote.bid_size,
            ask_price: quote.ask_price,
            ask_size: quote.ask_size,
            ts: quote.timestamp,
        }
    }
}
