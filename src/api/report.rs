use std::fmt;

use crate::core::{Inputs, Scenario, SweepResult, Verdict};

const AMOUNT_SCALES: [(f64, &str); 4] = [(1e12, "T"), (1e9, "B"), (1e6, "M"), (1e3, "K")];

/// Abbreviates an amount with a T/B/M/K suffix, e.g. `100K`, `1.23M`, `512.5`.
pub fn format_amount(amount: f64) -> String {
    for (scale, suffix) in AMOUNT_SCALES {
        if amount.abs() >= scale {
            if amount % scale == 0.0 {
                return format!("{:.0}{suffix}", amount / scale);
            }
            return format!("{}{suffix}", two_decimals_trimmed(amount / scale));
        }
    }
    two_decimals_trimmed(amount)
}

pub fn format_percent(fraction: f64) -> String {
    format!("{:.2}%", 100.0 * fraction)
}

fn two_decimals_trimmed(value: f64) -> String {
    let text = format!("{value:.2}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

pub fn render_verdict(inputs: &Inputs, verdict: &Verdict) -> String {
    VerdictReport { inputs, verdict }.to_string()
}

/// Text grid of the sweep: one row per expected return, one column per loan rate.
/// `L` marks cells where the loan wins the majority of trials.
pub fn render_sweep(result: &SweepResult) -> String {
    SweepGrid(result).to_string()
}

struct VerdictReport<'a> {
    inputs: &'a Inputs,
    verdict: &'a Verdict,
}

impl fmt::Display for VerdictReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { inputs, verdict } = self;
        let loan = &inputs.loan;
        let portfolio = &inputs.portfolio;

        writeln!(
            f,
            "Loan of ${} over {} months, {} yearly interest.",
            format_amount(loan.principal),
            loan.term_months,
            format_percent(loan.annual_rate)
        )?;
        writeln!(
            f,
            "Portfolio of ${} (${} unrealized gains), expecting {} yearly return, {} gains tax.",
            format_amount(portfolio.total_value),
            format_amount(portfolio.unrealized_gain),
            format_percent(inputs.returns.expected_annual_rate),
            format_percent(inputs.tax.capital_gains_rate)
        )?;
        if let Some(half_width) = inputs.returns.monthly_jitter {
            writeln!(
                f,
                "* monthly return randomized by up to +/-{}",
                format_percent(half_width)
            )?;
        }
        if let Some(shock) = inputs.returns.shock {
            writeln!(
                f,
                "* one random month replaced by a {} move",
                format_percent(shock)
            )?;
        }

        writeln!(f)?;
        writeln!(f, "Option 1 - pull from the portfolio:")?;
        writeln!(
            f,
            "  sell ${} (${} of it capital-gains tax), leaving ${}",
            format_amount(verdict.amount_sold),
            format_amount(verdict.tax_paid),
            format_amount(verdict.portfolio_after_withdrawal)
        )?;
        writeln!(
            f,
            "  invest ${} every month instead of repaying a loan",
            format_amount(verdict.liquidate.monthly_contribution)
        )?;
        writeln!(
            f,
            "  portfolio after {} months: ${}",
            loan.term_months,
            format_amount(verdict.liquidate.ending_value)
        )?;

        writeln!(f)?;
        writeln!(f, "Option 2 - take the loan:")?;
        writeln!(
            f,
            "  repay ${} in total, ${} per month",
            format_amount(verdict.loan_payback_total),
            format_amount(verdict.monthly_payment)
        )?;
        writeln!(
            f,
            "  portfolio after {} months: ${}",
            loan.term_months,
            format_amount(verdict.loan.ending_value)
        )?;

        writeln!(f)?;
        writeln!(
            f,
            "Is the loan worth it: {}",
            if verdict.loan_is_better { "Yes!" } else { "No!" }
        )
    }
}

struct SweepGrid<'a>(&'a SweepResult);

impl fmt::Display for SweepGrid<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = self.0;
        writeln!(
            f,
            "Loan wins (L) vs liquidation wins (.) over {} trials per cell, seed {}",
            result.trials, result.seed
        )?;
        writeln!(f, "rows: expected yearly return, columns: loan yearly rate")?;

        write!(f, "{:>8} ", "")?;
        for loan_rate in &result.loan_rates {
            write!(f, "{:>7}", format!("{:.1}", 100.0 * loan_rate))?;
        }
        writeln!(f)?;

        for (return_index, return_rate) in result.return_rates.iter().enumerate().rev() {
            write!(f, "{:>7}% ", format!("{:.1}", 100.0 * return_rate))?;
            for loan_index in 0..result.loan_rates.len() {
                let mark = match result.cell(loan_index, return_index).map(|c| c.majority) {
                    Some(Scenario::Loan) => "L",
                    Some(Scenario::Liquidate) => ".",
                    None => "?",
                };
                write!(f, "{mark:>7}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
