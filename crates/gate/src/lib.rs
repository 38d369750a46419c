//! # ASES Promotion Gate
//!
//! Decides whether an evaluated candidate is good enough to be offered to the
//! portfolio, and defines the composite score used to rank strategies.

use configuration::PromotionThresholds;
use core_types::{MetricValue, PerformanceMetrics};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One promotion rule a candidate failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Breach {
    /// A metric could not be computed at all.
    InsufficientData { metric: String },
    ProfitFactor { actual: MetricValue, required: Decimal },
    WinRate { actual: Decimal, required: Decimal },
    MaxDrawdown { actual: Decimal, limit: Decimal },
    SharpeRatio { actual: MetricValue, required: Decimal },
    TradesPerDay { actual: Decimal, required: Decimal },
    DailyLoss { actual: Decimal, limit: Decimal },
}

impl fmt::Display for Breach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Breach::InsufficientData { metric } => write!(f, "{} not computable", metric),
            Breach::ProfitFactor { actual, required } => {
                write!(f, "profit factor {} < {}", actual, required)
            }
            Breach::WinRate { actual, required } => write!(f, "win rate {} < {}", actual, required),
            Breach::MaxDrawdown { actual, limit } => write!(f, "max drawdown {} > {}", actual, limit),
            Breach::SharpeRatio { actual, required } => write!(f, "sharpe {} < {}", actual, required),
            Breach::TradesPerDay { actual, required } => {
                write!(f, "trades/day {} < {}", actual.round_dp(3), required)
            }
            Breach::DailyLoss { actual, limit } => write!(f, "worst daily loss {} > {}", actual, limit),
        }
    }
}

/// The gate's verdict on one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Promote,
    /// Too few trades to judge; retry with a longer window.
    Hold { trades: usize, required: usize },
    Reject { breaches: Vec<Breach> },
}

impl GateDecision {
    /// Joins the breaches into one line for a record's reason detail.
    pub fn describe(&self) -> String {
        match self {
            GateDecision::Promote => "promote".to_string(),
            GateDecision::Hold { trades, required } => {
                format!("hold: {} trades, {} required", trades, required)
            }
            GateDecision::Reject { breaches } => breaches
                .iter()
                .map(|b| b.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

/// Applies a fixed set of thresholds. Stateless and freely shareable.
#[derive(Debug, Clone)]
pub struct PromotionGate {
    thresholds: PromotionThresholds,
}

impl PromotionGate {
    pub fn new(thresholds: PromotionThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &PromotionThresholds {
        &self.thresholds
    }

    pub fn evaluate(&self, metrics: &PerformanceMetrics) -> GateDecision {
        let t = &self.thresholds;

        // 1. Undefined metrics cannot be judged and are never promoted.
        let undefined: Vec<Breach> = [
            ("profit_factor", metrics.profit_factor),
            ("sharpe_ratio", metrics.sharpe_ratio),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_insufficient())
        .map(|(name, _)| Breach::InsufficientData {
            metric: name.to_string(),
        })
        .collect();
        if !undefined.is_empty() {
            return GateDecision::Reject { breaches: undefined };
        }

        // 2. Too small a sample.
        if metrics.total_trades < t.min_sample_trades {
            return GateDecision::Hold {
                trades: metrics.total_trades,
                required: t.min_sample_trades,
            };
        }

        // 3. Every threshold, collecting all failures.
        let mut breaches = Vec::new();
        if !metrics.profit_factor.at_least(t.min_profit_factor) {
            breaches.push(Breach::ProfitFactor {
                actual: metrics.profit_factor,
                required: t.min_profit_factor,
            });
        }
        if metrics.win_rate < t.min_win_rate {
            breaches.push(Breach::WinRate {
                actual: metrics.win_rate,
                required: t.min_win_rate,
            });
        }
        if metrics.max_drawdown > t.max_drawdown_threshold {
            breaches.push(Breach::MaxDrawdown {
                actual: metrics.max_drawdown,
                limit: t.max_drawdown_threshold,
            });
        }
        if !metrics.sharpe_ratio.at_least(t.min_sharpe_ratio) {
            breaches.push(Breach::SharpeRatio {
                actual: metrics.sharpe_ratio,
                required: t.min_sharpe_ratio,
            });
        }
        if metrics.trades_per_day < t.min_trades_per_day {
            breaches.push(Breach::TradesPerDay {
                actual: metrics.trades_per_day,
                required: t.min_trades_per_day,
            });
        }
        if metrics.worst_daily_loss > t.max_daily_loss {
            breaches.push(Breach::DailyLoss {
                actual: metrics.worst_daily_loss,
                limit: t.max_daily_loss,
            });
        }

        if breaches.is_empty() {
            GateDecision::Promote
        } else {
            tracing::trace!(breaches = breaches.len(), "promotion thresholds not met");
            GateDecision::Reject { breaches }
        }
    }
}

/// Ranking key for strategies: profit factor first, Sharpe as the tie-breaker.
///
/// Field order defines the derived ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompositeScore {
    pub profit_factor: MetricValue,
    pub sharpe_ratio: MetricValue,
}

impl CompositeScore {
    pub fn of(metrics: &PerformanceMetrics) -> Self {
        Self {
            profit_factor: metrics.profit_factor,
            sharpe_ratio: metrics.sharpe_ratio,
        }
    }

    /// The lowest possible score, used for strategies with no metrics at all.
    pub fn floor() -> Self {
        Self {
            profit_factor: MetricValue::InsufficientData,
            sharpe_ratio: MetricValue::InsufficientData,
        }
    }
}

impl fmt::Display for CompositeScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pf={} sharpe={}", self.profit_factor, self.sharpe_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    /// Scenario metrics: pf 2.0, win 0.5, dd 0.1, sharpe 1.5, 5 trades/day, worst day 0.03.
    fn strong() -> PerformanceMetrics {
        PerformanceMetrics {
            total_trades: 150,
            winning_trades: 75,
            losing_trades: 75,
            gross_profit: dec!(2000),
            gross_loss: dec!(1000),
            net_profit: dec!(1000),
            profit_factor: MetricValue::Finite(dec!(2.0)),
            win_rate: dec!(0.5),
            max_drawdown: dec!(0.1),
            sharpe_ratio: MetricValue::Finite(dec!(1.5)),
            daily_losses: vec![],
            worst_daily_loss: dec!(0.03),
            trades_per_day: dec!(5),
            period_days: 30,
        }
    }

    fn gate() -> PromotionGate {
        PromotionGate::new(PromotionThresholds::default())
    }

    #[test]
    fn test_all_thresholds_met_promotes() {
        assert_eq!(gate().evaluate(&strong()), GateDecision::Promote);
    }

    #[test]
    fn test_single_failed_threshold_rejects() {
        let metrics = PerformanceMetrics {
            win_rate: dec!(0.40),
            ..strong()
        };
        let decision = gate().evaluate(&metrics);
        assert_eq!(
            decision,
            GateDecision::Reject {
                breaches: vec![Breach::WinRate {
                    actual: dec!(0.40),
                    required: dec!(0.45)
                }]
            }
        );
    }

    #[test]
    fn test_zero_trades_are_rejected_not_held() {
        let metrics = PerformanceMetrics {
            total_trades: 0,
            profit_factor: MetricValue::InsufficientData,
            sharpe_ratio: MetricValue::InsufficientData,
            ..strong()
        };
        match gate().evaluate(&metrics) {
            GateDecision::Reject { breaches } => {
                assert_eq!(breaches.len(), 2);
                assert!(breaches.iter().all(|b| matches!(b, Breach::InsufficientData { .. })));
            }
            other => panic!("expected reject, got {other:?}"),
        }
    }

    #[test]
    fn test_small_sample_is_held() {
        let metrics = PerformanceMetrics {
            total_trades: 4,
            ..strong()
        };
        assert_eq!(
            gate().evaluate(&metrics),
            GateDecision::Hold {
                trades: 4,
                required: 10
            }
        );
    }

    #[test]
    fn test_every_breach_is_listed() {
        let metrics = PerformanceMetrics {
            profit_factor: MetricValue::Finite(dec!(1.2)),
            max_drawdown: dec!(0.35),
            worst_daily_loss: dec!(0.08),
            ..strong()
        };
        let decision = gate().evaluate(&metrics);
        let GateDecision::Reject { breaches } = &decision else {
            panic!("expected reject");
        };
        assert_eq!(breaches.len(), 3);
        assert!(decision.describe().contains("max drawdown 0.35 > 0.20"));
    }

    #[test]
    fn test_boundary_values_pass() {
        let metrics = PerformanceMetrics {
            profit_factor: MetricValue::Finite(dec!(1.5)),
            win_rate: dec!(0.45),
            max_drawdown: dec!(0.20),
            sharpe_ratio: MetricValue::Finite(dec!(1.0)),
            trades_per_day: dec!(3),
            worst_daily_loss: dec!(0.05),
            ..strong()
        };
        assert_eq!(gate().evaluate(&metrics), GateDecision::Promote);
    }

    #[test]
    fn test_infinite_profit_factor_passes() {
        let metrics = PerformanceMetrics {
            profit_factor: MetricValue::PositiveInfinity,
            ..strong()
        };
        assert_eq!(gate().evaluate(&metrics), GateDecision::Promote);
    }

    #[test]
    fn test_composite_score_orders_by_profit_factor_then_sharpe() {
        let score = |pf: MetricValue, sharpe: MetricValue| CompositeScore {
            profit_factor: pf,
            sharpe_ratio: sharpe,
        };
        let low = score(MetricValue::Finite(dec!(1.6)), MetricValue::Finite(dec!(3.0)));
        let high = score(MetricValue::Finite(dec!(2.0)), MetricValue::Finite(dec!(1.1)));
        let higher = score(MetricValue::Finite(dec!(2.0)), MetricValue::Finite(dec!(1.2)));
        let unbounded = score(MetricValue::PositiveInfinity, MetricValue::InsufficientData);

        assert!(low < high);
        assert!(high < higher);
        assert!(higher < unbounded);
        assert!(CompositeScore::floor() < low);
    }
}
