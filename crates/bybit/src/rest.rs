use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use domain::types::{Price, PricePoint, TimestampMs};

/// Daily klines. Everything the strategy reads is a daily close.
pub const DAILY: &str = "D";

/// One page is at most this many klines.
pub const MAX_PAGE: u16 = 1000;

#[derive(Clone)]
pub struct BybitRest {
    client: reqwest::Client,
    base: String,
}

impl BybitRest {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("http client build failed")?;

        Ok(Self {
            client,
            base: "https://api.bybit.com".to_string(),
        })
    }

    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Daily closes in `[start_ms, end_ms]`, oldest first.
    pub async fn get_daily_closes(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
        limit: u16, // 1..=1000
    ) -> anyhow::Result<Vec<PricePoint>> {
        let query = [
            ("category", "spot".to_string()),
            ("symbol", symbol.to_string()),
            ("interval", DAILY.to_string()),
            ("start", start_ms.to_string()),
            ("end", end_ms.to_string()),
            ("limit", limit.clamp(1, MAX_PAGE).to_string()),
        ];
        self.klines(&query).await
    }

    /// The `limit` most recent daily closes, oldest first. The last one is the
    /// still-open day.
    pub async fn get_recent_daily_closes(
        &self,
        symbol: &str,
        limit: u16,
    ) -> anyhow::Result<Vec<PricePoint>> {
        let query = [
            ("category", "spot".to_string()),
            ("symbol", symbol.to_string()),
            ("interval", DAILY.to_string()),
            ("limit", limit.clamp(1, MAX_PAGE).to_string()),
        ];
        self.klines(&query).await
    }

    pub async fn get_last_price(&self, symbol: &str) -> anyhow::Result<Price> {
        let url = format!("{}/v5/market/tickers", self.base);

        let resp: ApiResp<TickerResult> = self
            .client
            .get(url)
            .query(&[("category", "spot"), ("symbol", symbol)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let result = resp.into_result()?;
        let Some(t) = result.list.first() else {
            bail!("no ticker for {}", symbol);
        };

        let p: f64 = t
            .last_price
            .parse()
            .with_context(|| format!("bad lastPrice '{}'", t.last_price))?;
        Ok(Price(p))
    }

    async fn klines(&self, query: &[(&str, String)]) -> anyhow::Result<Vec<PricePoint>> {
        let url = format!("{}/v5/market/kline", self.base);

        let resp: ApiResp<KlineResult> = self
            .client
            .get(url)
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_klines(resp.into_result()?.list)
    }
}

#[derive(Debug, Deserialize)]
struct ApiResp<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: Option<T>,
}

impl<T> ApiResp<T> {
    fn into_result(self) -> anyhow::Result<T> {
        if self.ret_code != 0 {
            bail!("bybit error {}: {}", self.ret_code, self.ret_msg);
        }
        self.result.context("bybit response without result")
    }
}

#[derive(Debug, Deserialize)]
struct KlineResult {
    list: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TickerResult {
    list: Vec<TickerRow>,
}

#[derive(Debug, Deserialize)]
struct TickerRow {
    #[serde(rename = "lastPrice")]
    last_price: String,
}

/// Rows are `[startTime, open, high, low, close, volume, turnover]`, newest first.
fn parse_klines(list: Vec<Vec<String>>) -> anyhow::Result<Vec<PricePoint>> {
    let mut out = Vec::with_capacity(list.len());

    for row in list.into_iter().rev() {
        let (Some(ts), Some(close)) = (row.first(), row.get(4)) else {
            bail!("short kline row: {:?}", row);
        };

        let ts: i64 = ts.parse().with_context(|| format!("bad kline ts '{}'", ts))?;
        let close: f64 = close
            .parse()
            .with_context(|| format!("bad kline close '{}'", close))?;
        let date = TimestampMs(ts)
            .to_date()
            .with_context(|| format!("kline ts out of range: {}", ts))?;

        out.push(PricePoint {
            date,
            close: Price(close),
        });
    }

    Ok(out)
}

pub async fn download_range(
    api: &BybitRest,
    symbol: &str,
    start_ms: i64,
    end_ms: i64,
) -> anyhow::Result<Vec<PricePoint>> {
    let mut all: Vec<PricePoint> = Vec::new();
    let mut cursor_end = end_ms;

    loop {
        if cursor_end <= start_ms {
            break;
        }

        let page = api
            .get_daily_closes(symbol, start_ms, cursor_end, MAX_PAGE)
            .await?;
        // page is ascending after parse
        let Some(first) = page.first() else { break };

        let first_ms = first
            .date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .context("bad kline date")?;
        all.extend(page);

        // step back before the oldest kline so the same page is not fetched again
        cursor_end = first_ms - 1;

        tokio::time::sleep(Duration::from_millis(120)).await;
    }

    // pages come newest-first; sort and drop overlaps
    all.sort_by_key(|p| p.date);
    all.dedup_by_key(|p| p.date);

    Ok(all)
}
