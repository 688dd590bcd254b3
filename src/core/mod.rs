mod engine;
mod error;
mod returns;
mod sweep;
mod types;

pub use engine::{
    LoanCost, balance_after_withdrawal, evaluate, evaluate_seeded, loan_cost, project_portfolio,
};
pub use error::EngineError;
pub use returns::{expected_monthly_multiplier, monthly_return_series};
pub use sweep::{rate_grid, run_sweep};
pub use types::{
    Inputs, LoanTerms, PortfolioState, ReturnAssumption, Scenario, ScenarioResult, SweepCell,
    SweepConfig, SweepResult, TaxPolicy, Verdict,
};
