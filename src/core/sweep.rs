use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::info;

use super::engine::evaluate;
use super::error::EngineError;
use super::types::{Inputs, Scenario, SweepCell, SweepConfig, SweepResult};

/// Inclusive, evenly spaced grid from `min` to `max` with at most `max_points` entries.
///
/// The point count is checked before anything is allocated.
pub fn rate_grid(
    min: f64,
    max: f64,
    step: f64,
    max_points: usize,
) -> Result<Vec<f64>, EngineError> {
    if !min.is_finite() || !max.is_finite() || max < min {
        return Err(EngineError::invalid("rate_grid", "bounds must be finite with min <= max"));
    }
    if !step.is_finite() || step <= 0.0 {
        return Err(EngineError::invalid("rate_grid", "step must be > 0"));
    }

    let intervals = ((max - min) / step + 1e-9).floor();
    if !intervals.is_finite() || intervals >= max_points as f64 {
        return Err(EngineError::invalid(
            "rate_grid",
            format!(
                "{:.0} points per axis; at most {max_points} are allowed",
                intervals + 1.0
            ),
        ));
    }

    let points = intervals as usize + 1;
    Ok((0..points).map(|i| min + step * i as f64).collect())
}

/// Runs `trials` paired evaluations for every (loan rate, expected return) pair.
///
/// Cells run in parallel, each with its own generator derived from `config.seed` and the
/// cell position, so results do not depend on thread scheduling.
pub fn run_sweep(config: &SweepConfig) -> Result<SweepResult, EngineError> {
    if config.trials == 0 {
        return Err(EngineError::invalid("trials", "must be > 0"));
    }
    if config.loan_rates.is_empty() || config.return_rates.is_empty() {
        return Err(EngineError::invalid("rate_grid", "must contain at least one rate"));
    }
    config.base.validate()?;

    info!(
        loan_rates = config.loan_rates.len(),
        return_rates = config.return_rates.len(),
        trials = config.trials,
        seed = config.seed,
        "starting loan-vs-liquidation sweep"
    );

    let pairs: Vec<(f64, f64)> = config
        .loan_rates
        .iter()
        .flat_map(|loan_rate| {
            config
                .return_rates
                .iter()
                .map(move |return_rate| (*loan_rate, *return_rate))
        })
        .collect();

    let cells = pairs
        .par_iter()
        .enumerate()
        .map(|(index, (loan_rate, return_rate))| {
            let mut inputs = config.base;
            inputs.loan.annual_rate = *loan_rate;
            inputs.returns.expected_annual_rate = *return_rate;
            evaluate_cell(&inputs, config.trials, derive_seed(config.seed, index as u64))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let loan_majority = cells
        .iter()
        .filter(|cell| cell.majority == Scenario::Loan)
        .count();
    info!(
        cells = cells.len(),
        loan_majority,
        "finished loan-vs-liquidation sweep"
    );

    Ok(SweepResult {
        loan_rates: config.loan_rates.clone(),
        return_rates: config.return_rates.clone(),
        trials: config.trials,
        seed: config.seed,
        cells,
    })
}

fn evaluate_cell(inputs: &Inputs, trials: u32, seed: u64) -> Result<SweepCell, EngineError> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut loan_wins = 0_u32;
    let mut advantages = Vec::with_capacity(trials as usize);

    for _ in 0..trials {
        let verdict = evaluate(inputs, &mut rng)?;
        if verdict.loan_is_better {
            loan_wins += 1;
        }
        advantages.push(verdict.loan_advantage());
    }

    // The loan has to win strictly more than half the trials; ties go to liquidation.
    let majority = if u64::from(loan_wins) * 2 > u64::from(trials) {
        Scenario::Loan
    } else {
        Scenario::Liquidate
    };

    Ok(SweepCell {
        loan_rate: inputs.loan.annual_rate,
        expected_return_rate: inputs.returns.expected_annual_rate,
        trials,
        loan_wins,
        loan_win_rate: f64::from(loan_wins) / f64::from(trials),
        majority,
        p10_loan_advantage: percentile(&mut advantages, 10.0),
        median_loan_advantage: percentile(&mut advantages, 50.0),
        p90_loan_advantage: percentile(&mut advantages, 90.0),
    })
}

fn derive_seed(base_seed: u64, cell_index: u64) -> u64 {
    splitmix64(base_seed ^ cell_index.rotate_left(32))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{LoanTerms, PortfolioState, ReturnAssumption, TaxPolicy};
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn plot_base_inputs(jitter: Option<f64>) -> Inputs {
        Inputs {
            portfolio: PortfolioState {
                total_value: 500_000.0,
                unrealized_gain: 70_000.0,
            },
            loan: LoanTerms {
                principal: 200_000.0,
                annual_rate: 0.0,
                term_months: 12,
            },
            tax: TaxPolicy::default(),
            returns: ReturnAssumption {
                expected_annual_rate: 0.0,
                monthly_jitter: jitter,
                shock: None,
            },
        }
    }

    fn corner_config(jitter: Option<f64>, trials: u32) -> SweepConfig {
        SweepConfig {
            base: plot_base_inputs(jitter),
            loan_rates: vec![0.0, 0.19],
            return_rates: vec![0.0, 0.19],
            trials,
            seed: 42,
        }
    }

    #[test]
    fn rate_grid_is_inclusive_and_evenly_spaced() {
        let grid = rate_grid(0.0, 0.19, 0.01, 101).expect("valid grid");
        assert_eq!(grid.len(), 20);
        assert_approx(grid[0], 0.0);
        assert_approx(grid[19], 0.19);
        for pair in grid.windows(2) {
            assert!((pair[1] - pair[0] - 0.01).abs() < 1e-12);
        }

        assert_eq!(rate_grid(0.05, 0.05, 0.01, 1).expect("single point"), vec![0.05]);
    }

    #[test]
    fn rate_grid_rejects_bad_bounds() {
        assert!(rate_grid(0.1, 0.0, 0.01, 101).is_err());
        assert!(rate_grid(0.0, 0.1, 0.0, 101).is_err());
        assert!(rate_grid(f64::NAN, 0.1, 0.01, 101).is_err());
    }

    #[test]
    fn rate_grid_refuses_more_points_than_allowed() {
        assert_eq!(rate_grid(0.0, 1.0, 0.01, 101).expect("exactly at the cap").len(), 101);
        assert!(rate_grid(0.0, 1.0, 0.01, 100).is_err());

        // Would be ~1.9e8 points; must fail without building them.
        let err = rate_grid(0.0, 0.19, 1e-9, 101).expect_err("too fine");
        assert!(err.to_string().contains("at most 101"), "{err}");
        assert!(rate_grid(0.0, f64::MAX, f64::MIN_POSITIVE, 101).is_err());
    }

    #[test]
    fn deterministic_corners_match_hand_analysis() {
        let result = run_sweep(&corner_config(None, 5)).expect("valid sweep");
        assert_eq!(result.cells.len(), 4);

        // Free loan and 19% growth: leaving the full portfolio invested wins.
        let cheap_loan_high_growth = result.cell(0, 1).expect("cell");
        assert_eq!(cheap_loan_high_growth.majority, Scenario::Loan);
        assert_eq!(cheap_loan_high_growth.loan_wins, 5);

        // 19% loan and no growth: the interest outweighs the tax saved.
        let costly_loan_no_growth = result.cell(1, 0).expect("cell");
        assert_eq!(costly_loan_no_growth.majority, Scenario::Liquidate);
        assert_eq!(costly_loan_no_growth.loan_wins, 0);
        assert_approx(costly_loan_no_growth.loan_win_rate, 0.0);

        // Without randomization every trial is identical, so all percentiles agree.
        for cell in &result.cells {
            assert_approx(cell.p10_loan_advantage, cell.median_loan_advantage);
            assert_approx(cell.p90_loan_advantage, cell.median_loan_advantage);
        }
    }

    #[test]
    fn cells_are_ordered_by_loan_rate_then_return() {
        let result = run_sweep(&corner_config(None, 1)).expect("valid sweep");
        let order: Vec<(f64, f64)> = result
            .cells
            .iter()
            .map(|c| (c.loan_rate, c.expected_return_rate))
            .collect();
        assert_eq!(order, vec![(0.0, 0.0), (0.0, 0.19), (0.19, 0.0), (0.19, 0.19)]);
        assert!(result.cell(2, 0).is_none());
    }

    #[test]
    fn same_seed_reproduces_randomized_sweep() {
        let a = run_sweep(&corner_config(Some(0.01), 50)).expect("valid sweep");
        let b = run_sweep(&corner_config(Some(0.01), 50)).expect("valid sweep");
        for (left, right) in a.cells.iter().zip(b.cells.iter()) {
            assert_eq!(left.loan_wins, right.loan_wins);
            assert_eq!(left.median_loan_advantage, right.median_loan_advantage);
        }
    }

    #[test]
    fn randomized_sweep_spreads_advantage() {
        let result = run_sweep(&corner_config(Some(0.01), 200)).expect("valid sweep");
        for cell in &result.cells {
            assert!(cell.p10_loan_advantage <= cell.median_loan_advantage);
            assert!(cell.median_loan_advantage <= cell.p90_loan_advantage);
            assert!(cell.p10_loan_advantage < cell.p90_loan_advantage);
        }
    }

    #[test]
    fn invalid_sweeps_are_rejected() {
        let mut config = corner_config(None, 0);
        assert!(matches!(
            run_sweep(&config),
            Err(EngineError::InvalidParameter { name: "trials", .. })
        ));

        config.trials = 1;
        config.return_rates.clear();
        assert!(run_sweep(&config).is_err());

        let mut config = corner_config(None, 1);
        config.base.tax.capital_gains_rate = 1.0;
        assert!(run_sweep(&config).is_err());
    }

    #[test]
    fn domain_errors_abort_the_sweep() {
        let mut config = corner_config(None, 1);
        config.return_rates = vec![0.05, -1.0];
        assert!(matches!(
            run_sweep(&config),
            Err(EngineError::ArithmeticDomain(_))
        ));
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0];
        assert_approx(percentile(&mut values, 50.0), 2.5);
        assert_approx(percentile(&mut values, 0.0), 1.0);
        assert_approx(percentile(&mut values, 100.0), 4.0);
        assert_approx(percentile(&mut [], 50.0), 0.0);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_derived_seeds_differ_across_cells(
            base in 0u64..u64::MAX,
            a in 0u64..4096,
            b in 0u64..4096,
        ) {
            if a != b {
                prop_assert!(derive_seed(base, a) != derive_seed(base, b));
            } else {
                prop_assert_eq!(derive_seed(base, a), derive_seed(base, b));
            }
        }
    }
}
