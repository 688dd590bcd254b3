use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    Inputs, LoanTerms, PortfolioState, ReturnAssumption, SweepConfig, SweepResult, TaxPolicy,
    Verdict, evaluate_seeded, rate_grid, run_sweep,
};

pub mod report;

use report::{render_sweep, render_verdict};

const MAX_GRID_POINTS: usize = 101;
const MAX_TRIALS: u32 = 100_000;
const MAX_LOAN_MONTHS: u32 = 1200;

#[derive(Parser, Debug)]
#[command(
    name = "loanworth",
    about = "Compare funding an expense from a taxable portfolio against taking a fixed-rate loan"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate one loan-vs-liquidation decision
    Evaluate(EvaluateArgs),
    /// Monte-Carlo sweep over a grid of loan rates and expected returns
    Sweep(SweepArgs),
    /// Serve the JSON HTTP API
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    #[arg(long, help = "Total market value of the portfolio")]
    portfolio_value: f64,
    #[arg(long, help = "Part of the portfolio value that is unrealized gain")]
    unrealized_gains: f64,
    #[arg(long, help = "Expense to fund, i.e. the loan principal")]
    loan_amount: f64,
    #[arg(long, help = "Yearly loan interest in percent, e.g. 6")]
    loan_rate: f64,
    #[arg(long, help = "Loan term in months")]
    loan_months: u32,
    #[arg(
        long,
        allow_hyphen_values = true,
        help = "Expected yearly portfolio return in percent, e.g. 5"
    )]
    expected_return: f64,
    #[arg(
        long,
        default_value_t = 25.0,
        help = "Capital gains tax rate in percent"
    )]
    capital_gains_tax_rate: f64,
    #[arg(
        long,
        help = "Half-width of uniform noise added to each monthly growth factor, in percent"
    )]
    monthly_return_jitter: Option<f64>,
    #[arg(
        long,
        allow_hyphen_values = true,
        help = "One random month moves by this percent instead, e.g. -30"
    )]
    shock_drop: Option<f64>,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, help = "Print the verdict as JSON instead of a text report")]
    json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    #[arg(long, default_value_t = 500_000.0)]
    portfolio_value: f64,
    #[arg(long, default_value_t = 70_000.0)]
    unrealized_gains: f64,
    #[arg(long, default_value_t = 200_000.0)]
    loan_amount: f64,
    #[arg(long, default_value_t = 12)]
    loan_months: u32,
    #[arg(
        long,
        default_value_t = 25.0,
        help = "Capital gains tax rate in percent"
    )]
    capital_gains_tax_rate: f64,
    #[arg(
        long,
        default_value_t = 1.0,
        help = "Half-width of monthly growth factor noise in percent; 0 disables it"
    )]
    monthly_return_jitter: f64,
    #[arg(
        long,
        allow_hyphen_values = true,
        help = "One random month moves by this percent instead, e.g. -30"
    )]
    shock_drop: Option<f64>,
    #[arg(long, default_value_t = 0.0, help = "Lowest rate on both axes in percent")]
    rate_min: f64,
    #[arg(long, default_value_t = 19.0, help = "Highest rate on both axes in percent")]
    rate_max: f64,
    #[arg(long, default_value_t = 1.0, help = "Grid spacing in percent")]
    rate_step: f64,
    #[arg(long, default_value_t = 1000, help = "Evaluations per grid cell")]
    trials: u32,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, help = "Print the sweep as JSON instead of a text grid")]
    json: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct EvaluatePayload {
    portfolio_value: Option<f64>,
    unrealized_gains: Option<f64>,
    loan_amount: Option<f64>,
    loan_rate: Option<f64>,
    loan_months: Option<u32>,
    expected_return: Option<f64>,
    cgt_rate: Option<f64>,
    monthly_return_jitter: Option<f64>,
    shock_drop: Option<f64>,
    seed: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SweepPayload {
    portfolio_value: Option<f64>,
    unrealized_gains: Option<f64>,
    loan_amount: Option<f64>,
    loan_months: Option<u32>,
    cgt_rate: Option<f64>,
    monthly_return_jitter: Option<f64>,
    shock_drop: Option<f64>,
    rate_min: Option<f64>,
    rate_max: Option<f64>,
    rate_step: Option<f64>,
    trials: Option<u32>,
    seed: Option<u64>,
}

#[derive(Debug)]
struct EvaluateRequest {
    inputs: Inputs,
    seed: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateResponse {
    inputs: Inputs,
    seed: u64,
    verdict: Verdict,
    report: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SweepResponse {
    sweep: SweepResult,
    grid: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn percent(value: f64) -> f64 {
    value / 100.0
}

fn build_inputs(args: &EvaluateArgs) -> Result<Inputs, String> {
    if !args.portfolio_value.is_finite() || args.portfolio_value <= 0.0 {
        return Err("--portfolio-value must be > 0".to_string());
    }

    if args.unrealized_gains < 0.0 || args.unrealized_gains > args.portfolio_value {
        return Err("--unrealized-gains must be between 0 and --portfolio-value".to_string());
    }

    if !args.loan_amount.is_finite() || args.loan_amount <= 0.0 {
        return Err("--loan-amount must be > 0".to_string());
    }

    if !args.loan_rate.is_finite() || args.loan_rate < 0.0 {
        return Err("--loan-rate must be >= 0".to_string());
    }

    if args.loan_months == 0 || args.loan_months > MAX_LOAN_MONTHS {
        return Err(format!("--loan-months must be between 1 and {MAX_LOAN_MONTHS}"));
    }

    if !args.expected_return.is_finite() || args.expected_return <= -100.0 {
        return Err("--expected-return must be > -100".to_string());
    }

    if !(0.0..100.0).contains(&args.capital_gains_tax_rate) {
        return Err("--capital-gains-tax-rate must be >= 0 and < 100".to_string());
    }

    if let Some(jitter) = args.monthly_return_jitter {
        if !jitter.is_finite() || jitter < 0.0 {
            return Err("--monthly-return-jitter must be >= 0".to_string());
        }
    }

    if let Some(shock) = args.shock_drop {
        if !shock.is_finite() {
            return Err("--shock-drop must be a finite percent".to_string());
        }
    }

    let inputs = Inputs {
        portfolio: PortfolioState {
            total_value: args.portfolio_value,
            unrealized_gain: args.unrealized_gains,
        },
        loan: LoanTerms {
            principal: args.loan_amount,
            annual_rate: percent(args.loan_rate),
            term_months: args.loan_months,
        },
        tax: TaxPolicy {
            capital_gains_rate: percent(args.capital_gains_tax_rate),
        },
        returns: ReturnAssumption {
            expected_annual_rate: percent(args.expected_return),
            monthly_jitter: args.monthly_return_jitter.map(percent),
            shock: args.shock_drop.map(percent),
        },
    };
    inputs.validate().map_err(|e| e.to_string())?;
    Ok(inputs)
}

fn build_sweep_config(args: &SweepArgs) -> Result<SweepConfig, String> {
    if args.trials == 0 || args.trials > MAX_TRIALS {
        return Err(format!("--trials must be between 1 and {MAX_TRIALS}"));
    }

    if !args.monthly_return_jitter.is_finite() || args.monthly_return_jitter < 0.0 {
        return Err("--monthly-return-jitter must be >= 0".to_string());
    }

    if args.rate_min < 0.0 {
        return Err("--rate-min must be >= 0 since loan rates cannot be negative".to_string());
    }

    let rates = rate_grid(
        percent(args.rate_min),
        percent(args.rate_max),
        percent(args.rate_step),
        MAX_GRID_POINTS,
    )
    .map_err(|e| format!("--rate-min/--rate-max/--rate-step: {e}"))?;

    // The grid supplies both rates, so any valid pair stands in for validation.
    let base = build_inputs(&EvaluateArgs {
        portfolio_value: args.portfolio_value,
        unrealized_gains: args.unrealized_gains,
        loan_amount: args.loan_amount,
        loan_rate: args.rate_min,
        loan_months: args.loan_months,
        expected_return: args.rate_min,
        capital_gains_tax_rate: args.capital_gains_tax_rate,
        monthly_return_jitter: (args.monthly_return_jitter > 0.0)
            .then_some(args.monthly_return_jitter),
        shock_drop: args.shock_drop,
        seed: args.seed,
        json: args.json,
    })?;

    Ok(SweepConfig {
        base,
        loan_rates: rates.clone(),
        return_rates: rates,
        trials: args.trials,
        seed: args.seed,
    })
}

/// Runs one CLI command to completion.
pub async fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Evaluate(args) => {
            let inputs = build_inputs(&args)?;
            let verdict = evaluate_seeded(&inputs, args.seed).map_err(|e| e.to_string())?;
            if args.json {
                let body = serde_json::to_string_pretty(&verdict).map_err(|e| e.to_string())?;
                println!("{body}");
            } else {
                print!("{}", render_verdict(&inputs, &verdict));
            }
        }
        Command::Sweep(args) => {
            let config = build_sweep_config(&args)?;
            let result = run_sweep(&config).map_err(|e| e.to_string())?;
            if args.json {
                let body = serde_json::to_string_pretty(&result).map_err(|e| e.to_string())?;
                println!("{body}");
            } else {
                print!("{}", render_sweep(&result));
            }
        }
        Command::Serve { port } => {
            run_http_server(port)
                .await
                .map_err(|e| format!("Server error: {e}"))?;
        }
    }
    Ok(())
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "loanworth HTTP API listening");
    info!("local access: http://127.0.0.1:{port}/api/evaluate");

    axum::serve(listener, router()).await
}

fn router() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/evaluate",
            get(evaluate_get_handler).post(evaluate_post_handler),
        )
        .route(
            "/api/sweep",
            get(sweep_get_handler).post(sweep_post_handler),
        )
        .fallback(not_found_handler)
}

async fn health_handler() -> impl IntoResponse {
    with_cache_control("ok")
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn evaluate_get_handler(Query(payload): Query<EvaluatePayload>) -> Response {
    evaluate_handler_impl(payload).await
}

async fn evaluate_post_handler(Json(payload): Json<EvaluatePayload>) -> Response {
    evaluate_handler_impl(payload).await
}

async fn evaluate_handler_impl(payload: EvaluatePayload) -> Response {
    let request = match evaluate_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => {
            warn!(%msg, "rejected evaluate request");
            return error_response(StatusCode::BAD_REQUEST, &msg);
        }
    };

    match evaluate_seeded(&request.inputs, request.seed) {
        Ok(verdict) => json_response(
            StatusCode::OK,
            EvaluateResponse {
                report: render_verdict(&request.inputs, &verdict),
                inputs: request.inputs,
                seed: request.seed,
                verdict,
            },
        ),
        Err(e) => {
            warn!(error = %e, "evaluation failed");
            error_response(StatusCode::BAD_REQUEST, &e.to_string())
        }
    }
}

async fn sweep_get_handler(Query(payload): Query<SweepPayload>) -> Response {
    sweep_handler_impl(payload).await
}

async fn sweep_post_handler(Json(payload): Json<SweepPayload>) -> Response {
    sweep_handler_impl(payload).await
}

async fn sweep_handler_impl(payload: SweepPayload) -> Response {
    let config = match sweep_config_from_payload(payload) {
        Ok(config) => config,
        Err(msg) => {
            warn!(%msg, "rejected sweep request");
            return error_response(StatusCode::BAD_REQUEST, &msg);
        }
    };

    match tokio::task::spawn_blocking(move || run_sweep(&config)).await {
        Ok(Ok(sweep)) => json_response(
            StatusCode::OK,
            SweepResponse {
                grid: render_sweep(&sweep),
                sweep,
            },
        ),
        Ok(Err(e)) => {
            warn!(error = %e, "sweep failed");
            error_response(StatusCode::BAD_REQUEST, &e.to_string())
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("sweep worker failed: {e}"),
        ),
    }
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    with_cache_control((status, Json(body)))
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn evaluate_request_from_json(json: &str) -> Result<EvaluateRequest, String> {
    let payload = serde_json::from_str::<EvaluatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    evaluate_request_from_payload(payload)
}

fn evaluate_request_from_payload(payload: EvaluatePayload) -> Result<EvaluateRequest, String> {
    let mut args = default_evaluate_args_for_api();

    if let Some(v) = payload.portfolio_value {
        args.portfolio_value = v;
    }
    if let Some(v) = payload.unrealized_gains {
        args.unrealized_gains = v;
    }
    if let Some(v) = payload.loan_amount {
        args.loan_amount = v;
    }
    if let Some(v) = payload.loan_rate {
        args.loan_rate = v;
    }
    if let Some(v) = payload.loan_months {
        args.loan_months = v;
    }
    if let Some(v) = payload.expected_return {
        args.expected_return = v;
    }
    if let Some(v) = payload.cgt_rate {
        args.capital_gains_tax_rate = v;
    }
    if payload.monthly_return_jitter.is_some() {
        args.monthly_return_jitter = payload.monthly_return_jitter;
    }
    if payload.shock_drop.is_some() {
        args.shock_drop = payload.shock_drop;
    }
    if let Some(v) = payload.seed {
        args.seed = v;
    }

    let inputs = build_inputs(&args)?;
    Ok(EvaluateRequest {
        inputs,
        seed: args.seed,
    })
}

fn sweep_config_from_payload(payload: SweepPayload) -> Result<SweepConfig, String> {
    let mut args = default_sweep_args_for_api();

    if let Some(v) = payload.portfolio_value {
        args.portfolio_value = v;
    }
    if let Some(v) = payload.unrealized_gains {
        args.unrealized_gains = v;
    }
    if let Some(v) = payload.loan_amount {
        args.loan_amount = v;
    }
    if let Some(v) = payload.loan_months {
        args.loan_months = v;
    }
    if let Some(v) = payload.cgt_rate {
        args.capital_gains_tax_rate = v;
    }
    if let Some(v) = payload.monthly_return_jitter {
        args.monthly_return_jitter = v;
    }
    if payload.shock_drop.is_some() {
        args.shock_drop = payload.shock_drop;
    }
    if let Some(v) = payload.rate_min {
        args.rate_min = v;
    }
    if let Some(v) = payload.rate_max {
        args.rate_max = v;
    }
    if let Some(v) = payload.rate_step {
        args.rate_step = v;
    }
    if let Some(v) = payload.trials {
        args.trials = v;
    }
    if let Some(v) = payload.seed {
        args.seed = v;
    }

    build_sweep_config(&args)
}

fn default_evaluate_args_for_api() -> EvaluateArgs {
    EvaluateArgs {
        portfolio_value: 500_000.0,
        unrealized_gains: 200_000.0,
        loan_amount: 100_000.0,
        loan_rate: 6.0,
        loan_months: 12,
        expected_return: 5.0,
        capital_gains_tax_rate: 25.0,
        monthly_return_jitter: None,
        shock_drop: None,
        seed: 42,
        json: true,
    }
}

fn default_sweep_args_for_api() -> SweepArgs {
    SweepArgs {
        portfolio_value: 500_000.0,
        unrealized_gains: 70_000.0,
        loan_amount: 200_000.0,
        loan_months: 12,
        capital_gains_tax_rate: 25.0,
        monthly_return_jitter: 1.0,
        shock_drop: None,
        rate_min: 0.0,
        rate_max: 19.0,
        rate_step: 1.0,
        trials: 200,
        seed: 42,
        json: true,
    }
}
