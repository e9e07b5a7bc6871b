//! JSON-over-HTTP market data client
//!
//! Expects a vendor gateway exposing three endpoints:
//! `GET /v1/universe`, `GET /v1/history?symbols=..&bars=..` and
//! `GET /v1/short-interest?symbols=..`. Prices and volumes arrive as strings.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use super::{ShortInterestProvider, UniverseProvider};
use crate::types::{Bar, InstrumentClass, ShortInterestData, UniverseRow};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";
const API_KEY_HEADER: &str = "X-API-Key";

/// Market data gateway client
#[derive(Clone)]
pub struct MarketDataClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    symbol: String,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    volume: Option<String>,
    #[serde(default)]
    instrument_class: InstrumentClass,
}

#[derive(Debug, Deserialize)]
struct RawBar {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
}

fn parse_decimal(raw: Option<&str>) -> Option<Decimal> {
    raw.and_then(|s| Decimal::from_str(s.trim()).ok())
}

impl RawSnapshot {
    /// Unparseable quote fields become `None` so the row still reaches the trace
    fn parse(self) -> UniverseRow {
        UniverseRow {
            price: parse_decimal(self.price.as_deref()),
            volume: parse_decimal(self.volume.as_deref()),
            symbol: self.symbol,
            instrument_class: self.instrument_class,
        }
    }
}

impl RawBar {
    fn parse(&self) -> Option<Bar> {
        Some(Bar {
            open_time: self.open_time,
            open: Decimal::from_str(&self.open).ok()?,
            high: Decimal::from_str(&self.high).ok()?,
            low: Decimal::from_str(&self.low).ok()?,
            close: Decimal::from_str(&self.close).ok()?,
            volume: Decimal::from_str(&self.volume).ok()?,
        })
    }
}

impl MarketDataClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Build from `SQUEEZE_MARKET_DATA_URL` / `SQUEEZE_MARKET_DATA_API_KEY`
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("SQUEEZE_MARKET_DATA_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let api_key = std::env::var("SQUEEZE_MARKET_DATA_API_KEY").ok().filter(|k| !k.is_empty());
        info!(base_url = %base_url, authenticated = api_key.is_some(), "Market data client configured");
        Self::new(&base_url, api_key)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self.client.get(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Market data API error {}: {}", status, body);
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl UniverseProvider for MarketDataClient {
    async fn fetch_universe(&self) -> Result<Vec<UniverseRow>> {
        let raw: Vec<RawSnapshot> = self.send_json(self.get("/v1/universe")).await?;

        let universe: Vec<UniverseRow> = raw.into_iter().map(RawSnapshot::parse).collect();
        let unquoted = universe.iter().filter(|r| r.price.is_none() || r.volume.is_none()).count();
        if unquoted > 0 {
            debug!(unquoted, "Universe rows without a usable quote");
        }

        info!(count = universe.len(), "Fetched universe snapshot");
        Ok(universe)
    }

    async fn fetch_history(&self, symbols: &[String], bars: usize) -> Result<HashMap<String, Vec<Bar>>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let request = self
            .get("/v1/history")
            .query(&[("symbols", symbols.join(",")), ("bars", bars.to_string())]);
        let raw: HashMap<String, Vec<RawBar>> = self.send_json(request).await?;

        debug!(requested = symbols.len(), returned = raw.len(), "Fetched history batch");

        // A single malformed bar invalidates that symbol's window
        Ok(raw
            .into_iter()
            .filter_map(|(symbol, bars)| {
                let parsed: Option<Vec<Bar>> = bars.iter().map(RawBar::parse).collect();
                parsed.map(|bars| (symbol, bars))
            })
            .collect())
    }
}

#[async_trait]
impl ShortInterestProvider for MarketDataClient {
    async fn fetch_short_interest(&self, symbols: &[String]) -> Result<HashMap<String, ShortInterestData>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }
        let request = self.get("/v1/short-interest").query(&[("symbols", symbols.join(","))]);
        self.send_json(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_snapshot_row() {
        let raw: RawSnapshot =
            serde_json::from_str(r#"{"symbol":"GME","price":"24.10","volume":"8200000","instrument_class":"common_stock"}"#)
                .unwrap();
        let row = raw.parse();
        assert_eq!(row.price, Some(dec!(24.10)));
        assert_eq!(row.instrument_class, InstrumentClass::CommonStock);
    }

    #[test]
    fn test_bad_quote_keeps_row_without_price() {
        let raw: RawSnapshot = serde_json::from_str(r#"{"symbol":"X","price":"n/a","volume":"1"}"#).unwrap();
        let row = raw.parse();
        assert_eq!(row.symbol, "X");
        assert_eq!(row.price, None);
        assert_eq!(row.volume, Some(dec!(1)));

        let raw: RawSnapshot = serde_json::from_str(r#"{"symbol":"Y"}"#).unwrap();
        assert!(raw.parse().into_snapshot().is_none());
    }

    #[test]
    fn test_parse_bar() {
        let raw: RawBar =
            serde_json::from_str(r#"{"t":1700000000000,"o":"1.0","h":"1.2","l":"0.9","c":"1.1","v":"500"}"#).unwrap();
        let bar = raw.parse().unwrap();
        assert_eq!(bar.open_time, 1_700_000_000_000);
        assert_eq!(bar.high, dec!(1.2));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = MarketDataClient::new("http://localhost:9000/", None).unwrap();
        assert_eq!(client.base_url, "http://localhost:9000");
    }
}
