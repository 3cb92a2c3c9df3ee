//! Request and response frames for the streaming wire protocol
//!
//! All frames are JSON text. Outbound frames are small fixed shapes; inbound
//! frames are tagged by a `"type"` field.

use crate::error::DecodeError;
use crate::event::MarketEvent;
use crate::symbol::Symbol;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Request Types
// ============================================================================

/// Authentication frame, sent once right after connecting
#[derive(Clone, Serialize)]
pub struct AuthFrame<'a> {
    /// API token
    pub token: &'a str,
}

impl<'a> AuthFrame<'a> {
    /// Create an auth frame
    pub fn new(token: &'a str) -> Self {
        Self { token }
    }

    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl fmt::Debug for AuthFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthFrame")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Subscription action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    /// Start streaming a symbol
    Subscribe,
    /// Stop streaming a symbol
    Unsubscribe,
}

/// Subscribe/unsubscribe frame
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionFrame<'a> {
    /// "subscribe" or "unsubscribe"
    #[serde(rename = "type")]
    pub action: SubscriptionAction,
    /// Target symbol
    pub symbol: &'a Symbol,
}

impl<'a> SubscriptionFrame<'a> {
    /// Create a subscribe frame
    pub fn subscribe(symbol: &'a Symbol) -> Self {
        Self {
            action: SubscriptionAction::Subscribe,
            symbol,
        }
    }

    /// Create an unsubscribe frame
    pub fn unsubscribe(symbol: &'a Symbol) -> Self {
        Self {
            action: SubscriptionAction::Unsubscribe,
            symbol,
        }
    }

    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// One trade print
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TradeData {
    /// Symbol
    #[serde(rename = "s")]
    pub symbol: Symbol,
    /// Last price
    #[serde(rename = "p")]
    pub price: Decimal,
    /// Volume
    #[serde(rename = "v")]
    pub size: Decimal,
    /// Trade time (epoch milliseconds on the wire)
    #[serde(rename = "t", with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Trade conditions
    #[serde(rename = "c", default)]
    pub conditions: Option<Vec<String>>,
}

/// One top-of-book quote
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuoteData {
    /// Symbol
    #[serde(rename = "s")]
    pub symbol: Symbol,
    /// Best bid price
    #[serde(rename = "bp")]
    pub bid_price: Decimal,
    /// Best bid size
    #[serde(rename = "bv")]
    pub bid_size: Decimal,
    /// Best ask price
    #[serde(rename = "ap")]
    pub ask_price: Decimal,
    /// Best ask size
    #[serde(rename = "av")]
    pub ask_size: Decimal,
    /// Quote time (epoch milliseconds on the wire)
    #[serde(rename = "t", with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct DataMessage<T> {
    data: Vec<T>,
}

#[derive(Deserialize)]
struct ErrorMessage {
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default, deserialize_with = "code_as_string")]
    code: Option<String>,
}

impl ErrorMessage {
    fn text(self) -> (Option<String>, String) {
        let message = self
            .msg
            .or(self.message)
            .unwrap_or_else(|| "unknown error".to_string());
        (self.code, message)
    }
}

#[derive(Deserialize)]
struct AuthMessage {
    status: String,
    #[serde(flatten)]
    error: ErrorMessage,
}

#[derive(Deserialize)]
struct AckMessage {
    symbol: Symbol,
}

/// Providers send error codes both as numbers and as strings
fn code_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// Parsed inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Batch of trades
    Trades(Vec<TradeData>),
    /// Batch of quotes
    Quotes(Vec<QuoteData>),
    /// Keep-alive
    Ping,
    /// Provider error
    Error {
        /// Error code, if the provider sent one
        code: Option<String>,
        /// Error text
        message: String,
    },
    /// Authentication result
    Auth {
        /// True if the token was accepted
        accepted: bool,
        /// Error code on rejection
        code: Option<String>,
        /// Error text on rejection
        message: Option<String>,
    },
    /// Subscription acknowledged
    Subscribed(Symbol),
    /// Unsubscription acknowledged
    Unsubscribed(Symbol),
    /// Frame with an unrecognized type tag
    Unknown(String),
}

impl InboundFrame {
    /// Parse a JSON text frame
    pub fn parse(json: &str) -> Result<Self, DecodeError> {
        let value: serde_json::Value = serde_json::from_str(json)?;

        let frame_type = value
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or(DecodeError::MissingType)?
            .to_string();

        let malformed = |err: serde_json::Error| DecodeError::Malformed {
            frame_type: frame_type.clone(),
            message: err.to_string(),
        };

        match frame_type.as_str() {
            "trade" => {
                let msg: DataMessage<TradeData> =
                    serde_json::from_value(value).map_err(malformed)?;
                Ok(Self::Trades(msg.data))
            }
            "quote" => {
                let msg: DataMessage<QuoteData> =
                    serde_json::from_value(value).map_err(malformed)?;
                Ok(Self::Quotes(msg.data))
            }
            "ping" => Ok(Self::Ping),
            "error" => {
                let msg: ErrorMessage = serde_json::from_value(value).map_err(malformed)?;
                let (code, message) = msg.text();
                Ok(Self::Error { code, message })
            }
            "auth" => {
                let msg: AuthMessage = serde_json::from_value(value).map_err(malformed)?;
                let accepted = matches!(msg.status.as_str(), "ok" | "success" | "authenticated");
                if accepted {
                    Ok(Self::Auth {
                        accepted,
                        code: None,
                        message: None,
                    })
                } else {
                    let (code, message) = msg.error.text();
                    Ok(Self::Auth {
                        accepted,
                        code,
                        message: Some(message),
                    })
                }
            }
            "subscribed" => {
                let msg: AckMessage = serde_json::from_value(value).map_err(malformed)?;
                Ok(Self::Subscribed(msg.symbol))
            }
            "unsubscribed" => {
                let msg: AckMessage = serde_json::from_value(value).map_err(malformed)?;
                Ok(Self::Unsubscribed(msg.symbol))
            }
            other => Ok(Self::Unknown(other.to_string())),
        }
    }

    /// Symbols whose market data is carried by this frame
    pub fn market_symbols(&self) -> Vec<&Symbol> {
        match self {
            Self::Trades(trades) => trades.iter().map(|t| &t.symbol).collect(),
            Self::Quotes(quotes) => quotes.iter().map(|q| &q.symbol).collect(),
            _ => Vec::new(),
        }
    }

    /// Convert into the events delivered to sinks.
    ///
    /// Control frames (auth, acks, unknown) produce no events.
    pub fn into_events(self) -> Vec<MarketEvent> {
        match self {
            Self::Trades(trades) => trades.into_iter().map(MarketEvent::from).collect(),
            Self::Quotes(quotes) => quotes.into_iter().map(MarketEvent::from).collect(),
            Self::Ping => vec![MarketEvent::Heartbeat],
            Self::Error { code, message } => vec![MarketEvent::Error { code, message }],
            Self::Auth { .. } | Self::Subscribed(_) | Self::Unsubscribed(_) | Self::Unknown(_) => {
                Vec::new()
            }
        }
    }
}
