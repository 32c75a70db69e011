use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolPair {
    pub base: String,
    pub quote: String,
}

impl SymbolPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    /// Exchange ticker symbol, e.g. `BTCUSDT`.
    pub fn ticker_symbol(&self) -> String {
        format!("{}{}", self.base, self.quote).to_uppercase()
    }
}

impl std::fmt::Display for SymbolPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Raw window statistics as returned by a price source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowTicker {
    pub open_price: f64,
    pub close_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub open_time: u64,
    pub close_time: u64,
    pub order_count: u64,
    /// Exchange-reported `close - open`, exact to the exchange's precision.
    #[serde(default)]
    pub price_change: Option<f64>,
    /// Exchange-reported change in percent.
    #[serde(default)]
    pub price_change_percent: Option<f64>,
}

/// One polled price window for a symbol pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub pair: SymbolPair,
    pub open_price: f64,
    pub close_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub absolute_change: f64,
    pub percentage_change: f64,
    pub order_count: u64,
    pub open_time: u64,
    pub close_time: u64,
}

impl PriceSnapshot {
    /// Takes the change fields the source reported, deriving whichever is
    /// missing from the window's open and close prices.
    pub fn from_ticker(pair: SymbolPair, ticker: WindowTicker) -> Self {
        let absolute_change = ticker
            .price_change
            .unwrap_or(ticker.close_price - ticker.open_price);
        let percentage_change = ticker.price_change_percent.unwrap_or_else(|| {
            if ticker.open_price != 0.0 {
                absolute_change / ticker.open_price * 100.0
            } else {
                0.0
            }
        });

        Self {
            pair,
            open_price: ticker.open_price,
            close_price: ticker.close_price,
            high_price: ticker.high_price,
            low_price: ticker.low_price,
            volume: ticker.volume,
            quote_volume: ticker.quote_volume,
            absolute_change,
            percentage_change,
            order_count: ticker.order_count,
            open_time: ticker.open_time,
            close_time: ticker.close_time,
        }
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.close_time as i64).single()
    }
}

impl std::fmt::Display for PriceSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

/// A rendered alert handed to notifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub text: String,
    /// Category key, e.g. `PriceChange^BTC/USDT`.
    pub key: String,
    pub throttle: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Throttled,
}

impl std::fmt::Display for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Delivery::Sent => write!(f, "SENT"),
            Delivery::Throttled => write!(f, "THROTTLED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(open: f64, close: f64) -> WindowTicker {
        WindowTicker {
            open_price: open,
            close_price: close,
            high_price: open.max(close),
            low_price: open.min(close),
            close_time: 1_700_000_000_000,
            order_count: 42,
            ..Default::default()
        }
    }

    #[test]
    fn derives_change_from_open_and_close() {
        let snap = PriceSnapshot::from_ticker(SymbolPair::new("BTC", "USDT"), ticker(10_000.0, 10_150.0));

        assert_eq!(snap.absolute_change, 150.0);
        assert!((snap.percentage_change - 1.5).abs() < 1e-9);
        assert_eq!(snap.order_count, 42);
    }

    #[test]
    fn reported_change_wins_over_float_difference() {
        let mut reported = ticker("36850.01".parse().unwrap(), "37000.12".parse().unwrap());
        reported.price_change = Some("150.11000000".parse().unwrap());
        reported.price_change_percent = Some("0.407".parse().unwrap());

        let snap = PriceSnapshot::from_ticker(SymbolPair::new("BTC", "USDT"), reported);
        assert_eq!(snap.absolute_change, 150.11);
        assert_eq!(snap.percentage_change, 0.407);
        assert_eq!(snap.absolute_change.to_string(), "150.11");
    }

    #[test]
    fn missing_percentage_is_derived_from_reported_change() {
        let mut reported = ticker(200.0, 0.0);
        reported.price_change = Some(3.0);

        let snap = PriceSnapshot::from_ticker(SymbolPair::new("BTC", "USDT"), reported);
        assert_eq!(snap.absolute_change, 3.0);
        assert!((snap.percentage_change - 1.5).abs() < 1e-9);
    }

    #[test]
    fn zero_open_price_yields_zero_percentage() {
        let snap = PriceSnapshot::from_ticker(SymbolPair::new("BTC", "USDT"), ticker(0.0, 5.0));

        assert_eq!(snap.absolute_change, 5.0);
        assert_eq!(snap.percentage_change, 0.0);
    }

    #[test]
    fn ticker_symbol_is_uppercased() {
        let pair = SymbolPair::new("btc", "usdt");
        assert_eq!(pair.ticker_symbol(), "BTCUSDT");
        assert_eq!(pair.to_string(), "btc/usdt");
    }

    #[test]
    fn snapshot_displays_as_json() {
        let snap = PriceSnapshot::from_ticker(SymbolPair::new("ETH", "USDT"), ticker(100.0, 90.0));
        let parsed: serde_json::Value = serde_json::from_str(&snap.to_string()).unwrap();

        assert_eq!(parsed["absolute_change"], -10.0);
        assert_eq!(parsed["pair"]["base"], "ETH");
    }
}
