use crate::error::SimulationError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{BacktestWindow, Kline, Timeframe};
use database::PgStateStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Window-bounded read of historical bars.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Bars of `timeframe` whose open time lies in `[window.start, window.end)`,
    /// ordered by open time.
    async fn klines(&self, timeframe: Timeframe, window: BacktestWindow) -> Result<Vec<Kline>, SimulationError>;
}

/// Reads bars for one symbol from the `klines` table.
#[derive(Debug, Clone)]
pub struct PgKlineSource {
    store: PgStateStore,
    symbol: String,
}

impl PgKlineSource {
    pub fn new(store: PgStateStore, symbol: impl Into<String>) -> Self {
        Self {
            store,
            symbol: symbol.into(),
        }
    }
}

#[async_trait]
impl MarketDataSource for PgKlineSource {
    async fn klines(&self, timeframe: Timeframe, window: BacktestWindow) -> Result<Vec<Kline>, SimulationError> {
        let klines = self
            .store
            .get_klines_by_date_range(&self.symbol, timeframe.as_str(), window.start, window.end)
            .await?;
        Ok(klines)
    }
}

/// Bars held in memory, per timeframe.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKlineSource {
    series: BTreeMap<Timeframe, Vec<Kline>>,
}

impl InMemoryKlineSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the bars of `timeframe`. They are sorted by open time.
    pub fn insert(&mut self, timeframe: Timeframe, mut klines: Vec<Kline>) {
        klines.sort_by_key(|k| k.open_time);
        self.series.insert(timeframe, klines);
    }

    /// A seeded random-walk price path for every timeframe in `timeframes`,
    /// covering `[start, end)`. Used for dry runs without a database.
    pub fn synthetic(
        timeframes: &[Timeframe],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        seed: u64,
    ) -> Self {
        let mut source = Self::new();
        for (offset, timeframe) in timeframes.iter().enumerate() {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(offset as u64));
            source.insert(*timeframe, random_walk(&mut rng, *timeframe, start, end));
        }
        source
    }
}

fn random_walk(rng: &mut StdRng, timeframe: Timeframe, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Kline> {
    let step = timeframe.bar_duration();
    let mut klines = Vec::new();
    let mut price = 100.0_f64;
    let mut open_time = start;
    while open_time < end {
        let open = price;
        let change: f64 = rng.random_range(-0.01..0.0105);
        price = (price * (1.0 + change)).max(1.0);
        let high = open.max(price) * (1.0 + rng.random_range(0.0..0.003));
        let low = open.min(price) * (1.0 - rng.random_range(0.0..0.003));
        let volume: f64 = rng.random_range(50.0..150.0);

        let dec = |v: f64| Decimal::from_f64(v).unwrap_or_default().round_dp(4);
        klines.push(Kline {
            open_time,
            open: dec(open),
            high: dec(high),
            low: dec(low),
            close: dec(price),
            volume: dec(volume),
            close_time: open_time + step,
        });
        open_time += step;
    }
    klines
}

#[async_trait]
impl MarketDataSource for InMemoryKlineSource {
    async fn klines(&self, timeframe: Timeframe, window: BacktestWindow) -> Result<Vec<Kline>, SimulationError> {
        Ok(self
            .series
            .get(&timeframe)
            .map(|bars| {
                bars.iter()
                    .filter(|k| k.open_time >= window.start && k.open_time < window.end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[tokio::test]
    async fn test_synthetic_source_is_seeded_and_window_bounded() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = start + Duration::days(3);
        let a = InMemoryKlineSource::synthetic(&[Timeframe::H1], start, end, 9);
        let b = InMemoryKlineSource::synthetic(&[Timeframe::H1], start, end, 9);

        let window = BacktestWindow::new(start + Duration::days(1), end);
        let bars = a.klines(Timeframe::H1, window).await.unwrap();
        assert_eq!(bars.len(), 48);
        assert_eq!(bars[0].open_time, window.start);
        assert_eq!(bars, b.klines(Timeframe::H1, window).await.unwrap());
        assert!(a.klines(Timeframe::D1, window).await.unwrap().is_empty());
    }
}
