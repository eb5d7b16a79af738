//! Progressive income tax on withdrawals, its gross-up inverse, and the
//! inflation re-indexing of band cutoffs.

use super::types::TaxBands;

pub const BASIC_RATE: f64 = 0.20;
pub const HIGHER_RATE: f64 = 0.40;
pub const ADDITIONAL_RATE: f64 = 0.45;

/// Upper end of the gross-up search. Targets whose net exceeds what this gross
/// yields saturate here.
pub const GROSS_CEILING: f64 = 2_000_000.0;
pub const GROSS_UP_ITERATIONS: u32 = 50;

pub fn income_tax(gross: f64, bands: &TaxBands) -> f64 {
    if gross <= bands.personal_allowance {
        return 0.0;
    }

    let basic_taxable = (gross.min(bands.basic_rate_limit) - bands.personal_allowance).max(0.0);
    let higher_taxable = (gross.min(bands.higher_rate_limit) - bands.basic_rate_limit).max(0.0);
    let additional_taxable = (gross - bands.higher_rate_limit).max(0.0);

    basic_taxable * BASIC_RATE + higher_taxable * HIGHER_RATE + additional_taxable * ADDITIONAL_RATE
}

pub fn net_income(gross: f64, bands: &TaxBands) -> f64 {
    gross - income_tax(gross, bands)
}

/// Gross annual income needed so that `net_income` reaches `net_target`.
///
/// Bisection over `[0, GROSS_CEILING]` with a fixed iteration count, so it
/// always terminates. The upper bracket is returned, so the result never nets
/// less than the target unless the target is out of reach of the ceiling.
pub fn required_gross_for_net(net_target: f64, bands: &TaxBands) -> f64 {
    if net_target <= 0.0 {
        return 0.0;
    }

    let mut lo = 0.0;
    let mut hi = GROSS_CEILING;

    for _ in 0..GROSS_UP_ITERATIONS {
        let mid = (lo + hi) * 0.5;
        if net_income(mid, bands) < net_target {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    hi
}

/// Band cutoffs in force `periods_elapsed` periods after the start.
///
/// Cutoffs step up by the accumulated per-period inflation only at multiples
/// of `reindex_periods`; a re-index period of 1 follows inflation every period.
pub fn bands_for_period(
    base: TaxBands,
    periods_elapsed: usize,
    period_inflation: f64,
    reindex_periods: u32,
) -> TaxBands {
    let reindex = reindex_periods.max(1) as usize;
    let indexed_periods = reindex * (periods_elapsed / reindex);
    base.scaled((1.0 + period_inflation).powf(indexed_periods as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, prop_assume, proptest};

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn uk() -> TaxBands {
        TaxBands::UK_2024
    }

    /// Per-band inversion of `net_income`, used as an oracle for the bisection.
    fn closed_form_gross(net_target: f64, bands: &TaxBands) -> f64 {
        let pa = bands.personal_allowance;
        let net_at_basic = net_income(bands.basic_rate_limit, bands);
        let net_at_higher = net_income(bands.higher_rate_limit, bands);
        if net_target <= pa {
            net_target.max(0.0)
        } else if net_target <= net_at_basic {
            pa + (net_target - pa) / (1.0 - BASIC_RATE)
        } else if net_target <= net_at_higher {
            bands.basic_rate_limit + (net_target - net_at_basic) / (1.0 - HIGHER_RATE)
        } else {
            bands.higher_rate_limit + (net_target - net_at_higher) / (1.0 - ADDITIONAL_RATE)
        }
    }

    #[test]
    fn income_below_allowance_is_untaxed() {
        assert_eq!(income_tax(0.0, &uk()), 0.0);
        assert_eq!(income_tax(12_570.0, &uk()), 0.0);
        assert_eq!(income_tax(-500.0, &uk()), 0.0);
    }

    #[test]
    fn uk_bands_apply_progressive_rates() {
        // 37_700 at 20% + 9_730 at 40%
        assert_approx_tol(income_tax(60_000.0, &uk()), 11_432.0, 1e-9);
        // 37_700 at 20% + 74_870 at 40% + 24_860 at 45%
        assert_approx_tol(income_tax(150_000.0, &uk()), 48_675.0, 1e-9);
        assert_approx_tol(net_income(150_000.0, &uk()), 101_325.0, 1e-9);
    }

    #[test]
    fn gross_up_for_forty_thousand_net_converges_within_a_penny() {
        let gross = required_gross_for_net(40_000.0, &uk());
        assert_approx_tol(net_income(gross, &uk()), 40_000.0, 0.01);
        assert_approx_tol(gross, 46_857.5, 0.01);
    }

    #[test]
    fn gross_up_of_zero_or_negative_target_is_zero() {
        assert_eq!(required_gross_for_net(0.0, &uk()), 0.0);
        assert_eq!(required_gross_for_net(-10.0, &uk()), 0.0);
    }

    #[test]
    fn gross_up_saturates_at_ceiling() {
        let gross = required_gross_for_net(50_000_000.0, &uk());
        assert_approx_tol(gross, GROSS_CEILING, 1e-6);
    }

    #[test]
    fn stepped_bands_only_move_at_reindex_boundaries() {
        let base = uk();
        let inflation = 0.05;
        for year in 0..5 {
            assert_eq!(bands_for_period(base, year, inflation, 5), base);
        }
        let stepped = bands_for_period(base, 5, inflation, 5);
        assert_approx_tol(
            stepped.personal_allowance,
            12_570.0 * 1.05_f64.powi(5),
            1e-6,
        );
        assert_eq!(bands_for_period(base, 9, inflation, 5), stepped);
        assert_approx_tol(
            bands_for_period(base, 10, inflation, 5).higher_rate_limit,
            125_140.0 * 1.05_f64.powi(10),
            1e-6,
        );
    }

    #[test]
    fn continuous_bands_move_every_period() {
        let base = uk();
        let bands = bands_for_period(base, 3, 0.01, 1);
        assert_approx_tol(bands.basic_rate_limit, 50_270.0 * 1.01_f64.powi(3), 1e-6);
    }

    #[test]
    fn monthly_stepping_matches_annual_stepping() {
        let base = uk();
        let annual: f64 = 0.048;
        let monthly = (1.0 + annual).powf(1.0 / 12.0) - 1.0;
        let from_months = bands_for_period(base, 61, monthly, 60);
        let from_years = bands_for_period(base, 5, annual, 5);
        assert_approx_tol(
            from_months.personal_allowance,
            from_years.personal_allowance,
            1e-6,
        );
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_net_income_is_monotonic(
            g1 in 0u32..3_000_000,
            step in 1u32..200_000,
            pa in 0u32..20_000,
            basic_width in 0u32..80_000,
            higher_width in 0u32..150_000
        ) {
            let bands = TaxBands {
                personal_allowance: pa as f64,
                basic_rate_limit: (pa + basic_width) as f64,
                higher_rate_limit: (pa + basic_width + higher_width) as f64,
            };
            let low = g1 as f64;
            let high = low + step as f64;
            prop_assert!(net_income(low, &bands) <= net_income(high, &bands));
        }

        #[test]
        fn prop_gross_up_round_trips_within_a_penny(
            target in 0u32..1_000_000,
            pa in 0u32..20_000,
            basic_width in 0u32..80_000,
            higher_width in 0u32..150_000
        ) {
            let bands = TaxBands {
                personal_allowance: pa as f64,
                basic_rate_limit: (pa + basic_width) as f64,
                higher_rate_limit: (pa + basic_width + higher_width) as f64,
            };
            let target = target as f64;
            prop_assume!(target <= net_income(GROSS_CEILING, &bands));

            let gross = required_gross_for_net(target, &bands);
            prop_assert!((net_income(gross, &bands) - target).abs() <= 0.01);
            prop_assert!((gross - closed_form_gross(target, &bands)).abs() <= 0.01);
        }
    }
}
