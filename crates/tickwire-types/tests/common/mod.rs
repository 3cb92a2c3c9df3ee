//! Common test fixtures for frame decoding tests
//!
//! Frames follow the shapes the provider sends over the websocket.

#![allow(dead_code)]

use tickwire_types::InboundFrame;

/// Keep-alive sent by the provider roughly every few seconds
pub const PING_FRAME: &str = r#"{"type":"ping"}"#;

/// Explicit auth acknowledgement
pub const AUTH_OK_FRAME: &str = r#"{"type":"auth","status":"ok"}"#;

/// Credential rejection
pub const AUTH_INVALID_FRAME: &str = r#"{"type":"error","msg":"Invalid API key"}"#;

/// Rate-limit rejection with a numeric code
pub const RATE_LIMITED_FRAME: &str = r#"{"type":"error","msg":"Too many requests","code":429}"#;

/// Subscription acknowledgement
pub const SUBSCRIBED_AAPL: &str = r#"{"type":"subscribed","symbol":"AAPL"}"#;

/// Trade batch for two symbols
pub const TRADE_FRAME: &str = r#"{
    "type": "trade",
    "data": [
        {"s": "AAPL", "p": 189.52, "v": 100, "t": 1700000000000, "c": ["1", "12"]},
        {"s": "BINANCE:BTCUSDT", "p": 37012.5, "v": 0.0125, "t": 1700000000004}
    ]
}"#;

/// Quote frame
pub const QUOTE_FRAME: &str = r#"{
    "type": "quote",
    "data": [
        {"s": "AAPL", "bp": 189.50, "bv": 200, "ap": 189.53, "av": 100, "t": 1700000000000}
    ]
}"#;

/// Parse a frame, panicking with context on failure
pub fn parse_frame(json: &str) -> InboundFrame {
    InboundFrame::parse(json).unwrap_or_else(|e| panic!("failed to parse {json}: {e}"))
}

/// Build a trade frame for one symbol with the given prices
pub fn trade_frame(symbol: &str, prices: &[&str]) -> String {
    let data: Vec<String> = prices
        .iter()
        .enumerate()
        .map(|(i, p)| format!(r#"{{"s":"{symbol}","p":{p},"v":1,"t":{}}}"#, 1_700_000_000_000u64 + i as u64))
        .collect();
    format!(r#"{{"type":"trade","data":[{}]}}"#, data.join(","))
}
