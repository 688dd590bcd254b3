use rand::Rng;

use super::error::EngineError;
use super::types::ReturnAssumption;

/// Monthly growth multiplier equivalent to `expected_annual_rate` compounded over a year.
pub fn expected_monthly_multiplier(expected_annual_rate: f64) -> Result<f64, EngineError> {
    if !expected_annual_rate.is_finite() {
        return Err(EngineError::invalid("expected_annual_rate", "must be a finite number"));
    }

    let base = 1.0 + expected_annual_rate;
    if base <= 0.0 {
        return Err(EngineError::ArithmeticDomain(format!(
            "expected annual return of {expected_annual_rate} leaves a growth base of {base}, \
             which has no real twelfth root"
        )));
    }

    Ok(base.powf(1.0 / 12.0))
}

/// Builds the per-month multiplier series shared by both scenarios of one evaluation.
///
/// Jitter is additive and unclamped, so a wide half-width can push a multiplier below
/// zero. When a shock is given, exactly one month (uniformly chosen) is overwritten with
/// `1 + shock` after the jitter pass.
pub fn monthly_return_series<R: Rng + ?Sized>(
    assumption: &ReturnAssumption,
    months: u32,
    rng: &mut R,
) -> Result<Vec<f64>, EngineError> {
    if months == 0 {
        return Err(EngineError::invalid("months", "must be >= 1"));
    }

    let expected = expected_monthly_multiplier(assumption.expected_annual_rate)?;
    let mut rates = vec![expected; months as usize];

    if let Some(half_width) = assumption.monthly_jitter {
        if !half_width.is_finite() || half_width < 0.0 {
            return Err(EngineError::invalid("monthly_jitter", "must be a finite number >= 0"));
        }
        // Scaling a unit draw keeps huge half-widths from overflowing the sampled range.
        for rate in rates.iter_mut() {
            *rate += rng.gen_range(-1.0_f64..=1.0) * half_width;
        }
    }

    if let Some(shock) = assumption.shock {
        if !shock.is_finite() {
            return Err(EngineError::invalid("shock", "must be a finite number"));
        }
        let shocked_month = rng.gen_range(0..rates.len());
        rates[shocked_month] = 1.0 + shock;
    }

    Ok(rates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    #[test]
    fn fixed_five_percent_gives_twelve_equal_multipliers() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let rates = monthly_return_series(&ReturnAssumption::fixed(0.05), 12, &mut rng)
            .expect("valid assumption");

        assert_eq!(rates.len(), 12);
        for rate in &rates {
            assert_eq!(*rate, rates[0]);
            assert_approx_tol(*rate, 1.004074, 1e-6);
        }

        let compounded: f64 = rates.iter().product();
        assert_approx_tol(compounded, 1.05, 1e-12);
    }

    #[test]
    fn fixed_series_does_not_consume_randomness() {
        let mut used = ChaCha8Rng::seed_from_u64(9);
        let mut untouched = ChaCha8Rng::seed_from_u64(9);
        monthly_return_series(&ReturnAssumption::fixed(0.07), 24, &mut used).expect("valid");
        assert_eq!(used.gen_range(0..u64::MAX), untouched.gen_range(0..u64::MAX));
    }

    #[test]
    fn negative_returns_above_minus_one_hundred_percent_are_allowed() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let rates = monthly_return_series(&ReturnAssumption::fixed(-0.5), 12, &mut rng)
            .expect("valid assumption");
        assert_approx_tol(rates.iter().product(), 0.5, 1e-12);
    }

    #[test]
    fn total_loss_or_worse_is_an_arithmetic_domain_error() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for rate in [-1.0, -1.5] {
            let err = monthly_return_series(&ReturnAssumption::fixed(rate), 12, &mut rng)
                .expect_err("must reject");
            assert!(matches!(err, EngineError::ArithmeticDomain(_)), "{err}");
        }
    }

    #[test]
    fn zero_months_is_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let err = monthly_return_series(&ReturnAssumption::fixed(0.05), 0, &mut rng)
            .expect_err("must reject");
        assert!(matches!(
            err,
            EngineError::InvalidParameter { name: "months", .. }
        ));
    }

    #[test]
    fn negative_jitter_is_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let assumption = ReturnAssumption {
            expected_annual_rate: 0.05,
            monthly_jitter: Some(-0.01),
            shock: None,
        };
        let err = monthly_return_series(&assumption, 12, &mut rng).expect_err("must reject");
        assert!(matches!(
            err,
            EngineError::InvalidParameter {
                name: "monthly_jitter",
                ..
            }
        ));
    }

    #[test]
    fn wide_jitter_is_not_clamped() {
        let assumption = ReturnAssumption {
            expected_annual_rate: 0.0,
            monthly_jitter: Some(3.0),
            shock: None,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let rates = monthly_return_series(&assumption, 500, &mut rng).expect("valid");
        assert!(rates.iter().any(|r| *r < 0.0));
    }

    #[test]
    fn largest_finite_jitter_draws_without_overflow() {
        let assumption = ReturnAssumption {
            expected_annual_rate: 0.05,
            monthly_jitter: Some(1e308),
            shock: None,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let rates = monthly_return_series(&assumption, 3, &mut rng).expect("finite jitter");
        assert_eq!(rates.len(), 3);
        assert!(rates.iter().all(|r| r.is_finite()));
    }

    #[test]
    fn same_seed_gives_same_series() {
        let assumption = ReturnAssumption {
            expected_annual_rate: 0.06,
            monthly_jitter: Some(0.02),
            shock: Some(-0.3),
        };
        let a = monthly_return_series(&assumption, 36, &mut ChaCha8Rng::seed_from_u64(5))
            .expect("valid");
        let b = monthly_return_series(&assumption, 36, &mut ChaCha8Rng::seed_from_u64(5))
            .expect("valid");
        assert_eq!(a, b);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_shock_overwrites_exactly_one_month(
            months in 1u32..240,
            seed in 0u64..10_000,
            annual in -0.5f64..0.5,
        ) {
            let assumption = ReturnAssumption {
                expected_annual_rate: annual,
                monthly_jitter: None,
                shock: Some(-0.3),
            };
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let rates = monthly_return_series(&assumption, months, &mut rng).expect("valid");
            let expected = expected_monthly_multiplier(annual).expect("valid");

            prop_assert_eq!(rates.len(), months as usize);
            let shocked_value = 1.0 + -0.3;
            let shocked = rates.iter().filter(|r| **r == shocked_value).count();
            let untouched = rates.iter().filter(|r| **r == expected).count();
            prop_assert_eq!(shocked, 1);
            prop_assert_eq!(untouched, months as usize - 1);
        }

        #[test]
        fn prop_jitter_stays_within_half_width(
            months in 1u32..240,
            seed in 0u64..10_000,
            annual in -0.5f64..0.5,
            half_width in 0.0f64..0.2,
        ) {
            let assumption = ReturnAssumption {
                expected_annual_rate: annual,
                monthly_jitter: Some(half_width),
                shock: None,
            };
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let rates = monthly_return_series(&assumption, months, &mut rng).expect("valid");
            let expected = expected_monthly_multiplier(annual).expect("valid");

            for rate in rates {
                prop_assert!(rate >= expected - half_width - 1e-12);
                prop_assert!(rate <= expected + half_width + 1e-12);
            }
        }

        #[test]
        fn prop_shock_with_jitter_still_hits_one_month(
            months in 1u32..120,
            seed in 0u64..10_000,
        ) {
            // Jitter is drawn from (1.0 ± 0.001); a -0.5 shock (0.5) can never be produced by it.
            let assumption = ReturnAssumption {
                expected_annual_rate: 0.0,
                monthly_jitter: Some(0.001),
                shock: Some(-0.5),
            };
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let rates = monthly_return_series(&assumption, months, &mut rng).expect("valid");
            prop_assert_eq!(rates.iter().filter(|r| **r == 0.5).count(), 1);
            prop_assert_eq!(
                rates.iter().filter(|r| (**r - 1.0).abs() <= 0.001 + 1e-12).count(),
                months as usize - 1
            );
        }
    }
}
