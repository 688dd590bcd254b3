use serde::Serialize;

use super::error::EngineError;

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioState {
    pub total_value: f64,
    pub unrealized_gain: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanTerms {
    pub principal: f64,
    pub annual_rate: f64,
    pub term_months: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxPolicy {
    /// Capital-gains tax rate as a fraction in `[0, 1)`.
    pub capital_gains_rate: f64,
}

impl Default for TaxPolicy {
    fn default() -> Self {
        Self {
            capital_gains_rate: 0.25,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnAssumption {
    pub expected_annual_rate: f64,
    /// Half-width `w` of the uniform `[-w, +w]` noise added to every monthly multiplier.
    pub monthly_jitter: Option<f64>,
    /// Fractional drop (e.g. `-0.3`) written over one randomly chosen month.
    pub shock: Option<f64>,
}

impl ReturnAssumption {
    pub fn fixed(expected_annual_rate: f64) -> Self {
        Self {
            expected_annual_rate,
            monthly_jitter: None,
            shock: None,
        }
    }

    pub fn is_deterministic(&self) -> bool {
        self.monthly_jitter.is_none() && self.shock.is_none()
    }
}

/// Everything one evaluation needs. All rates are fractions, not percentages.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inputs {
    pub portfolio: PortfolioState,
    pub loan: LoanTerms,
    pub tax: TaxPolicy,
    pub returns: ReturnAssumption,
}

impl Inputs {
    /// Range checks run before any computation. The post-withdrawal balance has no sign
    /// check: an expense larger than the portfolio can net starts the liquidate scenario
    /// below zero.
    pub fn validate(&self) -> Result<(), EngineError> {
        let portfolio = &self.portfolio;
        if !portfolio.total_value.is_finite() || portfolio.total_value <= 0.0 {
            return Err(EngineError::invalid("total_value", "must be > 0"));
        }
        if !portfolio.unrealized_gain.is_finite()
            || portfolio.unrealized_gain < 0.0
            || portfolio.unrealized_gain > portfolio.total_value
        {
            return Err(EngineError::invalid(
                "unrealized_gain",
                "must be between 0 and the total portfolio value",
            ));
        }

        let loan = &self.loan;
        if !loan.principal.is_finite() || loan.principal <= 0.0 {
            return Err(EngineError::invalid("principal", "must be > 0"));
        }
        if !loan.annual_rate.is_finite() || loan.annual_rate < 0.0 {
            return Err(EngineError::invalid("annual_rate", "must be >= 0"));
        }
        if loan.term_months == 0 {
            return Err(EngineError::invalid("term_months", "must be >= 1"));
        }

        let tax_rate = self.tax.capital_gains_rate;
        if !tax_rate.is_finite() || !(0.0..1.0).contains(&tax_rate) {
            return Err(EngineError::invalid("capital_gains_rate", "must be in [0, 1)"));
        }

        let returns = &self.returns;
        if !returns.expected_annual_rate.is_finite() {
            return Err(EngineError::invalid("expected_annual_rate", "must be a finite number"));
        }
        if let Some(half_width) = returns.monthly_jitter {
            if !half_width.is_finite() || half_width < 0.0 {
                return Err(EngineError::invalid("monthly_jitter", "must be a finite number >= 0"));
            }
        }
        if let Some(shock) = returns.shock {
            if !shock.is_finite() {
                return Err(EngineError::invalid("shock", "must be a finite number"));
            }
        }

        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    Liquidate,
    Loan,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub starting_value: f64,
    pub monthly_contribution: f64,
    pub total_contributed: f64,
    pub ending_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub loan_is_better: bool,
    pub winner: Scenario,
    pub loan_payback_total: f64,
    pub monthly_payment: f64,
    pub portfolio_after_withdrawal: f64,
    pub amount_sold: f64,
    pub tax_paid: f64,
    pub monthly_return_rates: Vec<f64>,
    pub liquidate: ScenarioResult,
    pub loan: ScenarioResult,
}

impl Verdict {
    /// Loan-scenario ending value minus liquidate-scenario ending value.
    pub fn loan_advantage(&self) -> f64 {
        self.loan.ending_value - self.liquidate.ending_value
    }
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Template evaluation; its loan rate and expected return are replaced per grid cell.
    pub base: Inputs,
    pub loan_rates: Vec<f64>,
    pub return_rates: Vec<f64>,
    pub trials: u32,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepCell {
    pub loan_rate: f64,
    pub expected_return_rate: f64,
    pub trials: u32,
    pub loan_wins: u32,
    pub loan_win_rate: f64,
    pub majority: Scenario,
    pub p10_loan_advantage: f64,
    pub median_loan_advantage: f64,
    pub p90_loan_advantage: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepResult {
    pub loan_rates: Vec<f64>,
    pub return_rates: Vec<f64>,
    pub trials: u32,
    pub seed: u64,
    pub cells: Vec<SweepCell>,
}

impl SweepResult {
    pub fn cell(&self, loan_index: usize, return_index: usize) -> Option<&SweepCell> {
        if loan_index >= self.loan_rates.len() || return_index >= self.return_rates.len() {
            return None;
        }
        self.cells.get(loan_index * self.return_rates.len() + return_index)
    }
}
