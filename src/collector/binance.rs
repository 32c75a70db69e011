use eyre::{bail, Result, WrapErr};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::collector::{Collector, PollingCollector, PriceSource};
use crate::config::deserialize_duration;
use crate::domain::{SymbolPair, WindowTicker};

pub const KIND: &str = "binance";
const BASE_URL: &str = "https://api.binance.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BinanceConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub timeout: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub interval: Option<Duration>,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Builds a polling collector from a raw `binance` config block.
pub fn build(raw: &Value) -> Result<Arc<dyn Collector>> {
    let config = BinanceConfig::deserialize(raw).wrap_err("invalid binance collector config")?;
    let timeout = config.timeout.unwrap_or(DEFAULT_TIMEOUT);
    let interval = config.interval.unwrap_or(DEFAULT_INTERVAL);

    let client = BinanceClient::new(&config, timeout)?;
    info!(
        "binance collector configured: base={}, interval={:?}, timeout={:?}, proxied={}",
        client.base_url,
        interval,
        timeout,
        client.proxied
    );

    Ok(Arc::new(PollingCollector::new(client, interval, timeout)))
}

/// Rolling window ticker, as returned by `GET /api/v3/ticker`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerResponse {
    symbol: String,
    open_price: String,
    last_price: String,
    high_price: String,
    low_price: String,
    volume: String,
    quote_volume: String,
    open_time: u64,
    close_time: u64,
    count: u64,
    #[serde(default)]
    price_change: Option<String>,
    #[serde(default)]
    price_change_percent: Option<String>,
}

/// A single symbol comes back as an object; `symbols=` queries return a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TickerPayload {
    One(TickerResponse),
    Many(Vec<TickerResponse>),
}

#[derive(Debug, Deserialize)]
struct AvgPriceResponse {
    price: String,
}

/// REST client for the public Binance spot market-data endpoints.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    proxied: bool,
}

impl BinanceClient {
    pub fn new(config: &BinanceConfig, timeout: Duration) -> Result<Self> {
        let mut builder = Client::builder().pool_max_idle_per_host(5).timeout(timeout);

        let proxy = config.proxy.as_deref().filter(|p| !p.is_empty());
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy).wrap_err("invalid binance proxy url")?);
        }

        let client = builder.build().wrap_err("Failed to build HTTP client")?;
        let base_url = config
            .base_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(BASE_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            proxied: proxy.is_some(),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.get(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.header("X-MBX-APIKEY", key),
            None => builder,
        }
    }
}

#[async_trait::async_trait]
impl PriceSource for BinanceClient {
    fn name(&self) -> &'static str {
        KIND
    }

    async fn window_ticker(&self, pair: &SymbolPair, window: Duration) -> Result<Option<WindowTicker>> {
        let symbol = pair.ticker_symbol();
        let window_size = window_size_param(window)?;
        info!("sending new window price request of [{}] to binance...", pair);

        let payload: TickerPayload = self
            .get("/api/v3/ticker")
            .query(&[("symbol", symbol.as_str()), ("windowSize", window_size.as_str())])
            .send()
            .await
            .wrap_err("ticker request failed")?
            .error_for_status()
            .wrap_err("ticker request rejected")?
            .json()
            .await
            .wrap_err("ticker parse failed")?;

        let ticker = match payload {
            TickerPayload::One(t) => Some(t),
            TickerPayload::Many(list) => list.into_iter().next(),
        };
        let Some(t) = ticker else {
            return Ok(None);
        };
        debug!("received {} ticker from binance: {:?}", t.symbol, t);

        Ok(Some(WindowTicker {
            open_price: parse_price(&t.open_price, "openPrice")?,
            close_price: parse_price(&t.last_price, "lastPrice")?,
            high_price: parse_price(&t.high_price, "highPrice")?,
            low_price: parse_price(&t.low_price, "lowPrice")?,
            volume: parse_price(&t.volume, "volume")?,
            quote_volume: parse_price(&t.quote_volume, "quoteVolume")?,
            open_time: t.open_time,
            close_time: t.close_time,
            order_count: t.count,
            price_change: parse_optional(t.price_change.as_deref(), "priceChange")?,
            price_change_percent: parse_optional(t.price_change_percent.as_deref(), "priceChangePercent")?,
        }))
    }

    async fn avg_price(&self, pair: &SymbolPair) -> Result<Option<f64>> {
        let symbol = pair.ticker_symbol();

        let resp: AvgPriceResponse = self
            .get("/api/v3/avgPrice")
            .query(&[("symbol", symbol.as_str())])
            .send()
            .await
            .wrap_err("avgPrice request failed")?
            .error_for_status()
            .wrap_err("avgPrice request rejected")?
            .json()
            .await
            .wrap_err("avgPrice parse failed")?;

        parse_price(&resp.price, "price").map(Some)
    }

    fn validate_window(&self, window: Duration) -> Result<()> {
        window_size_param(window).map(|_| ())
    }

    async fn ping(&self) -> Result<()> {
        self.get("/api/v3/ping")
            .send()
            .await
            .wrap_err("ping failed")?
            .error_for_status()
            .wrap_err("ping rejected")?;
        Ok(())
    }
}

fn parse_price(raw: &str, field: &str) -> Result<f64> {
    raw.parse::<f64>()
        .wrap_err_with(|| format!("failed to parse {} `{}`", field, raw))
}

fn parse_optional(raw: Option<&str>, field: &str) -> Result<Option<f64>> {
    raw.filter(|r| !r.is_empty()).map(|r| parse_price(r, field)).transpose()
}

/// Renders `window` as a Binance `windowSize`. Only `1m`..`59m`, `1h`..`23h`
/// and `1d`..`7d` exist; any other window is rejected rather than rounded.
fn window_size_param(window: Duration) -> Result<String> {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    let secs = window.as_secs();
    if window.subsec_nanos() == 0 && secs > 0 {
        if secs % DAY == 0 && secs / DAY <= 7 {
            return Ok(format!("{}d", secs / DAY));
        }
        if secs % HOUR == 0 && secs / HOUR <= 23 {
            return Ok(format!("{}h", secs / HOUR));
        }
        if secs % MINUTE == 0 && secs / MINUTE <= 59 {
            return Ok(format!("{}m", secs / MINUTE));
        }
    }
    bail!("binance has no {:?} window, use 1m-59m, 1h-23h or 1d-7d", window)
}
