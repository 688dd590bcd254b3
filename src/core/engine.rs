use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use super::error::EngineError;
use super::returns::monthly_return_series;
use super::types::{Inputs, Scenario, ScenarioResult, Verdict};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoanCost {
    pub total_payback: f64,
    pub monthly_payment: f64,
}

/// Portfolio balance left after selling enough to net `amount_needed` after capital-gains tax.
///
/// Gains are sold first. If the gross sale fits inside the unrealized gains, the whole sale
/// is taxed; otherwise every gain is realized and the shortfall comes out of cost basis
/// tax-free.
pub fn balance_after_withdrawal(
    total_value: f64,
    unrealized_gain: f64,
    amount_needed: f64,
    tax_rate: f64,
) -> Result<f64, EngineError> {
    if !tax_rate.is_finite() || !(0.0..1.0).contains(&tax_rate) {
        return Err(EngineError::invalid("capital_gains_rate", "must be in [0, 1)"));
    }

    let keep_fraction = 1.0 - tax_rate;
    let gross_sale = amount_needed / keep_fraction;
    if gross_sale <= unrealized_gain {
        return Ok(total_value - gross_sale);
    }

    let net_from_gains = unrealized_gain * keep_fraction;
    let remaining = amount_needed - net_from_gains;
    Ok((total_value - unrealized_gain) - remaining)
}

/// Loan cost with the full-term interest compounded once on the principal and spread evenly
/// over the months. This is not a per-period amortization table.
pub fn loan_cost(
    principal: f64,
    annual_rate: f64,
    term_months: u32,
) -> Result<LoanCost, EngineError> {
    if !principal.is_finite() || principal <= 0.0 {
        return Err(EngineError::invalid("principal", "must be > 0"));
    }
    if !annual_rate.is_finite() || annual_rate < 0.0 {
        return Err(EngineError::invalid("annual_rate", "must be >= 0"));
    }
    if term_months == 0 {
        return Err(EngineError::invalid("term_months", "must be >= 1"));
    }

    let years = f64::from(term_months) / 12.0;
    let total_payback = principal * (1.0 + annual_rate).powf(years);
    Ok(LoanCost {
        total_payback,
        monthly_payment: total_payback / f64::from(term_months),
    })
}

/// Ending balance after adding `contribution` then applying each month's multiplier in order.
pub fn project_portfolio(start: f64, contribution: f64, monthly_rates: &[f64]) -> f64 {
    monthly_rates
        .iter()
        .fold(start, |balance, rate| (balance + contribution) * rate)
}

/// Compares funding `inputs.loan.principal` from the portfolio against borrowing it.
///
/// Both scenarios are projected through the same monthly series drawn from `rng`, so the
/// comparison is paired. The loan wins only when it ends strictly ahead.
pub fn evaluate<R: Rng + ?Sized>(inputs: &Inputs, rng: &mut R) -> Result<Verdict, EngineError> {
    inputs.validate()?;

    let portfolio = &inputs.portfolio;
    let loan = &inputs.loan;

    let cost = loan_cost(loan.principal, loan.annual_rate, loan.term_months)?;
    let portfolio_after_withdrawal = balance_after_withdrawal(
        portfolio.total_value,
        portfolio.unrealized_gain,
        loan.principal,
        inputs.tax.capital_gains_rate,
    )?;
    let monthly_return_rates = monthly_return_series(&inputs.returns, loan.term_months, rng)?;

    let liquidate = ScenarioResult {
        starting_value: portfolio_after_withdrawal,
        monthly_contribution: cost.monthly_payment,
        total_contributed: cost.monthly_payment * f64::from(loan.term_months),
        ending_value: project_portfolio(
            portfolio_after_withdrawal,
            cost.monthly_payment,
            &monthly_return_rates,
        ),
    };
    let loan_result = ScenarioResult {
        starting_value: portfolio.total_value,
        monthly_contribution: 0.0,
        total_contributed: 0.0,
        ending_value: project_portfolio(portfolio.total_value, 0.0, &monthly_return_rates),
    };

    let loan_is_better = loan_result.ending_value > liquidate.ending_value;
    let amount_sold = portfolio.total_value - portfolio_after_withdrawal;
    debug!(
        liquidate_end = liquidate.ending_value,
        loan_end = loan_result.ending_value,
        loan_is_better,
        "evaluated loan vs liquidation"
    );

    Ok(Verdict {
        loan_is_better,
        winner: if loan_is_better {
            Scenario::Loan
        } else {
            Scenario::Liquidate
        },
        loan_payback_total: cost.total_payback,
        monthly_payment: cost.monthly_payment,
        portfolio_after_withdrawal,
        amount_sold,
        tax_paid: amount_sold - loan.principal,
        monthly_return_rates,
        liquidate,
        loan: loan_result,
    })
}

pub fn evaluate_seeded(inputs: &Inputs, seed: u64) -> Result<Verdict, EngineError> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    evaluate(inputs, &mut rng)
}
