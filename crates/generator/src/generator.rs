use crate::error::GeneratorError;
use configuration::{GeneratorConfig, StrategyConfig};
use core_types::{Indicator, SpecId, StrategySpec};
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashSet};

/// The outcome of one generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateBatch {
    pub specs: Vec<StrategySpec>,
    /// `true` when nothing unexplored was left before this batch was drawn.
    pub exhausted: bool,
    /// Unexplored specs skipped because they overlap an active strategy too much.
    pub skipped_overlap: usize,
}

/// Samples unexplored specs uniformly without replacement.
pub struct CandidateGenerator {
    space: Vec<StrategySpec>,
    max_overlap: Decimal,
    rng: StdRng,
}

impl CandidateGenerator {
    /// Enumerates the full search space: every configured timeframe crossed with
    /// every indicator subset of size `1..=max_indicators_per_strategy`.
    pub fn new(strategy: &StrategyConfig, generator: &GeneratorConfig) -> Result<Self, GeneratorError> {
        let indicators: Vec<Indicator> = strategy
            .available_indicators
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let timeframes: Vec<_> = strategy.available_timeframes.iter().copied().unique().collect();

        if indicators.is_empty() || timeframes.is_empty() {
            return Err(GeneratorError::EmptySearchSpace(
                "no timeframes or no indicators configured".to_string(),
            ));
        }

        let max_size = strategy.max_indicators_per_strategy.min(indicators.len());
        let mut space = Vec::new();
        for timeframe in timeframes {
            for size in 1..=max_size {
                for subset in indicators.iter().copied().combinations(size) {
                    space.push(StrategySpec::new(
                        timeframe,
                        subset,
                        &strategy.indicator_params,
                        strategy.max_indicators_per_strategy,
                    )?);
                }
            }
        }

        let rng = match generator.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        tracing::debug!(space_size = space.len(), seed = ?generator.seed, "candidate search space built");
        Ok(Self {
            space,
            max_overlap: generator.max_indicator_overlap,
            rng,
        })
    }

    /// Total number of specs in the search space.
    pub fn space_size(&self) -> usize {
        self.space.len()
    }

    /// Draws up to `count` specs whose identity is not in `known`.
    ///
    /// Specs sharing a timeframe with an `active` spec and overlapping its
    /// indicator set by more than the configured ratio are skipped as well.
    pub fn generate(
        &mut self,
        count: usize,
        known: &HashSet<SpecId>,
        active: &[StrategySpec],
    ) -> CandidateBatch {
        let unexplored: Vec<&StrategySpec> = self
            .space
            .iter()
            .filter(|spec| !known.contains(spec.id()))
            .collect();
        let exhausted = unexplored.is_empty();

        let eligible: Vec<&StrategySpec> = unexplored
            .iter()
            .copied()
            .filter(|spec| {
                !active.iter().any(|a| {
                    a.timeframe() == spec.timeframe() && indicator_overlap(a, spec) > self.max_overlap
                })
            })
            .collect();
        let skipped_overlap = unexplored.len() - eligible.len();

        let amount = count.min(eligible.len());
        let specs: Vec<StrategySpec> = index::sample(&mut self.rng, eligible.len(), amount)
            .into_iter()
            .map(|i| eligible[i].clone())
            .collect();

        if exhausted {
            tracing::warn!(space_size = self.space.len(), "candidate search space exhausted");
        } else {
            tracing::info!(
                requested = count,
                generated = specs.len(),
                unexplored = unexplored.len(),
                skipped_overlap,
                "candidates generated"
            );
        }

        CandidateBatch {
            specs,
            exhausted,
            skipped_overlap,
        }
    }
}

/// Jaccard similarity of two specs' indicator sets.
pub fn indicator_overlap(a: &StrategySpec, b: &StrategySpec) -> Decimal {
    let left: BTreeSet<Indicator> = a.indicators().iter().copied().collect();
    let right: BTreeSet<Indicator> = b.indicators().iter().copied().collect();
    let union = left.union(&right).count();
    if union == 0 {
        return Decimal::ZERO;
    }
    Decimal::from(left.intersection(&right).count()) / Decimal::from(union)
}
