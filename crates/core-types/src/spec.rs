use crate::enums::{Indicator, Timeframe};
use crate::error::CoreError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Deterministic identity of a `StrategySpec`: the hex SHA-256 of its canonical JSON.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecId(String);

impl SpecId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A short prefix for log lines and tables.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl From<String> for SpecId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SpecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Named numeric parameters of one indicator (e.g. `period = 14`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndicatorParams(BTreeMap<String, Decimal>);

impl IndicatorParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: Decimal) -> Self {
        self.0.insert(name.to_string(), value.normalize());
        self
    }

    pub fn get(&self, name: &str) -> Option<Decimal> {
        self.0.get(name).copied()
    }

    /// Reads an integer parameter such as a lookback period, falling back to `default`.
    pub fn period(&self, name: &str, default: usize) -> usize {
        use rust_decimal::prelude::ToPrimitive;
        self.get(name)
            .and_then(|v| v.to_usize())
            .filter(|v| *v > 0)
            .unwrap_or(default)
    }

    fn normalized(&self) -> Self {
        Self(self.0.iter().map(|(k, v)| (k.clone(), v.normalize())).collect())
    }
}

impl From<BTreeMap<String, Decimal>> for IndicatorParams {
    fn from(map: BTreeMap<String, Decimal>) -> Self {
        Self(map).normalized()
    }
}

/// Immutable description of a strategy: which indicators, on which timeframe,
/// with which parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategySpec {
    id: SpecId,
    timeframe: Timeframe,
    indicators: Vec<Indicator>,
    params: BTreeMap<Indicator, IndicatorParams>,
}

/// The fields that participate in the identity hash, in a fixed order.
#[derive(Serialize)]
struct CanonicalSpec<'a> {
    timeframe: Timeframe,
    indicators: &'a [Indicator],
    params: &'a BTreeMap<Indicator, IndicatorParams>,
}

impl StrategySpec {
    /// Builds a spec from any collection of indicators.
    ///
    /// Indicators are deduplicated and put in canonical order, so two specs that
    /// differ only in the order their indicators were listed share one identity.
    /// Parameters are taken from `param_defaults` for the chosen indicators only.
    pub fn new(
        timeframe: Timeframe,
        indicators: impl IntoIterator<Item = Indicator>,
        param_defaults: &BTreeMap<Indicator, IndicatorParams>,
        max_indicators: usize,
    ) -> Result<Self, CoreError> {
        let mut indicators: Vec<Indicator> = indicators.into_iter().collect();
        indicators.sort();
        indicators.dedup();

        if indicators.is_empty() || indicators.len() > max_indicators {
            return Err(CoreError::IndicatorCount {
                got: indicators.len(),
                max: max_indicators,
            });
        }

        let params: BTreeMap<Indicator, IndicatorParams> = indicators
            .iter()
            .map(|ind| {
                let p = param_defaults.get(ind).map(|p| p.normalized()).unwrap_or_default();
                (*ind, p)
            })
            .collect();

        let id = Self::compute_id(timeframe, &indicators, &params)?;
        Ok(Self {
            id,
            timeframe,
            indicators,
            params,
        })
    }

    fn compute_id(
        timeframe: Timeframe,
        indicators: &[Indicator],
        params: &BTreeMap<Indicator, IndicatorParams>,
    ) -> Result<SpecId, CoreError> {
        let canonical = serde_json::to_vec(&CanonicalSpec {
            timeframe,
            indicators,
            params,
        })?;
        let digest = Sha256::digest(&canonical);
        Ok(SpecId(hex::encode(digest)))
    }

    pub fn id(&self) -> &SpecId {
        &self.id
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn indicators(&self) -> &[Indicator] {
        &self.indicators
    }

    pub fn params(&self, indicator: Indicator) -> Option<&IndicatorParams> {
        self.params.get(&indicator)
    }

    /// Recomputes the identity hash; `false` means the stored id was tampered with.
    pub fn verify_id(&self) -> bool {
        Self::compute_id(self.timeframe, &self.indicators, &self.params)
            .map(|id| id == self.id)
            .unwrap_or(false)
    }

    /// A compact label such as `1h:ema+rsi`.
    pub fn label(&self) -> String {
        let names: Vec<&str> = self.indicators.iter().map(|i| i.as_str()).collect();
        format!("{}:{}", self.timeframe, names.join("+"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn defaults() -> BTreeMap<Indicator, IndicatorParams> {
        BTreeMap::from([
            (Indicator::Rsi, IndicatorParams::new().with("period", dec!(14))),
            (Indicator::Ema, IndicatorParams::new().with("period", dec!(21))),
        ])
    }

    #[test]
    fn test_short_id_respects_char_boundaries() {
        let id = SpecId::from("ééééééééééééééé".to_string());
        assert_eq!(id.short(), "éééééééééééé");
        assert_eq!(SpecId::from("abc".to_string()).short(), "abc");

        let hashed = StrategySpec::new(Timeframe::H1, [Indicator::Rsi], &defaults(), 5).unwrap();
        assert_eq!(hashed.id().short().len(), 12);
    }

    #[test]
    fn test_identity_ignores_listing_order_and_duplicates() {
        let a = StrategySpec::new(Timeframe::H1, [Indicator::Rsi, Indicator::Ema], &defaults(), 5).unwrap();
        let b = StrategySpec::new(
            Timeframe::H1,
            [Indicator::Ema, Indicator::Rsi, Indicator::Ema],
            &defaults(),
            5,
        )
        .unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(a.indicators(), &[Indicator::Ema, Indicator::Rsi]);
        assert_eq!(a.label(), "1h:ema+rsi");
    }

    #[test]
    fn test_identity_depends_on_timeframe_and_params() {
        let a = StrategySpec::new(Timeframe::H1, [Indicator::Rsi], &defaults(), 5).unwrap();
        let b = StrategySpec::new(Timeframe::H4, [Indicator::Rsi], &defaults(), 5).unwrap();
        assert_ne!(a.id(), b.id());

        let mut other = defaults();
        other.insert(Indicator::Rsi, IndicatorParams::new().with("period", dec!(7)));
        let c = StrategySpec::new(Timeframe::H1, [Indicator::Rsi], &other, 5).unwrap();
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_param_scale_does_not_change_identity() {
        let mut scaled = defaults();
        scaled.insert(Indicator::Rsi, IndicatorParams::new().with("period", dec!(14.00)));
        let a = StrategySpec::new(Timeframe::D1, [Indicator::Rsi], &defaults(), 5).unwrap();
        let b = StrategySpec::new(Timeframe::D1, [Indicator::Rsi], &scaled, 5).unwrap();
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_indicator_bound_is_enforced() {
        let err = StrategySpec::new(Timeframe::H1, Indicator::ALL, &defaults(), 5).unwrap_err();
        assert!(matches!(err, CoreError::IndicatorCount { got: 9, max: 5 }));
        assert!(StrategySpec::new(Timeframe::H1, [], &defaults(), 5).is_err());
    }

    #[test]
    fn test_serde_round_trip_keeps_valid_id() {
        let spec = StrategySpec::new(Timeframe::M15, [Indicator::Rsi, Indicator::Ema], &defaults(), 5).unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        let back: StrategySpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
        assert!(back.verify_id());
        assert_eq!(spec.id().as_str().len(), 64);
    }

    #[test]
    fn test_period_falls_back_to_default() {
        let p = IndicatorParams::new().with("period", dec!(20));
        assert_eq!(p.period("period", 14), 20);
        assert_eq!(p.period("slow", 26), 26);
    }
}
