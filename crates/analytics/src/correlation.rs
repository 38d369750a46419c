use chrono::NaiveDate;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Pearson correlation of two daily return series over the dates they share.
///
/// Returns `None` when fewer than `min_overlap` dates overlap or either side is
/// constant over the overlap; an undefined correlation is not a violation.
pub fn correlation(
    a: &BTreeMap<NaiveDate, Decimal>,
    b: &BTreeMap<NaiveDate, Decimal>,
    min_overlap: usize,
) -> Option<Decimal> {
    let pairs: Vec<(Decimal, Decimal)> = a
        .iter()
        .filter_map(|(date, x)| b.get(date).map(|y| (*x, *y)))
        .collect();

    if pairs.len() < min_overlap.max(2) {
        return None;
    }

    let n = Decimal::from(pairs.len());
    let mean_a = pairs.iter().map(|(x, _)| *x).sum::<Decimal>() / n;
    let mean_b = pairs.iter().map(|(_, y)| *y).sum::<Decimal>() / n;

    let mut covariance = Decimal::ZERO;
    let mut var_a = Decimal::ZERO;
    let mut var_b = Decimal::ZERO;
    for (x, y) in &pairs {
        let dx = *x - mean_a;
        let dy = *y - mean_b;
        covariance += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    if var_a <= Decimal::ZERO || var_b <= Decimal::ZERO {
        return None;
    }

    let denominator = var_a.sqrt()? * var_b.sqrt()?;
    if denominator.is_zero() {
        return None;
    }
    let rho = covariance / denominator;
    Some(rho.clamp(Decimal::NEGATIVE_ONE, Decimal::ONE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn series(values: &[Decimal]) -> BTreeMap<NaiveDate, Decimal> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (start + chrono::Duration::days(i as i64), *v))
            .collect()
    }

    #[test]
    fn test_identical_series_correlate_fully() {
        let a = series(&[dec!(0.01), dec!(-0.02), dec!(0.03), dec!(0.00)]);
        let rho = correlation(&a, &a, 3).unwrap();
        assert!((rho - Decimal::ONE).abs() < dec!(0.000001));
    }

    #[test]
    fn test_mirrored_series_correlate_negatively() {
        let a = series(&[dec!(0.01), dec!(-0.02), dec!(0.03)]);
        let b = series(&[dec!(-0.01), dec!(0.02), dec!(-0.03)]);
        let rho = correlation(&a, &b, 3).unwrap();
        assert!((rho + Decimal::ONE).abs() < dec!(0.000001));
    }

    #[test]
    fn test_only_overlapping_dates_count() {
        let a = series(&[dec!(0.01), dec!(0.02), dec!(0.03), dec!(0.04)]);
        let mut b = series(&[dec!(0.01), dec!(0.02)]);
        assert_eq!(correlation(&a, &b, 3), None);

        b.insert(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(), dec!(0.03));
        assert!(correlation(&a, &b, 3).is_some());
    }

    #[test]
    fn test_constant_series_is_undefined() {
        let a = series(&[dec!(0.01), dec!(0.01), dec!(0.01)]);
        let b = series(&[dec!(0.01), dec!(0.02), dec!(0.03)]);
        assert_eq!(correlation(&a, &b, 2), None);
    }
}
