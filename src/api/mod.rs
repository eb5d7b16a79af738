use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{Local, NaiveDate};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    AggregateResult, AggregateSummary, BracketIndexing, DEFAULT_MILESTONES, Granularity,
    RunSummary, SimError, SimulationParameters, SimulationResult, TaxBands, TransitionPolicy,
    WithdrawalMode, describe_run, run_aggregate, simulate_path, summarize_aggregate,
    summarize_run,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliGranularity {
    Monthly,
    Annual,
}

impl From<CliGranularity> for Granularity {
    fn from(value: CliGranularity) -> Self {
        match value {
            CliGranularity::Monthly => Granularity::Monthly,
            CliGranularity::Annual => Granularity::Annual,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliWithdrawalMode {
    Strict,
    FixedRate,
}

impl From<CliWithdrawalMode> for WithdrawalMode {
    fn from(value: CliWithdrawalMode) -> Self {
        match value {
            CliWithdrawalMode::Strict => WithdrawalMode::Strict,
            CliWithdrawalMode::FixedRate => WithdrawalMode::FixedRate,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliTransition {
    SkipWithdrawal,
    WithdrawImmediately,
}

impl From<CliTransition> for TransitionPolicy {
    fn from(value: CliTransition) -> Self {
        match value {
            CliTransition::SkipWithdrawal => TransitionPolicy::SkipWithdrawal,
            CliTransition::WithdrawImmediately => TransitionPolicy::WithdrawImmediately,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiGranularity {
    #[serde(alias = "month", alias = "months")]
    Monthly,
    #[serde(alias = "year", alias = "yearly", alias = "annually")]
    Annual,
}

impl From<ApiGranularity> for CliGranularity {
    fn from(value: ApiGranularity) -> Self {
        match value {
            ApiGranularity::Monthly => CliGranularity::Monthly,
            ApiGranularity::Annual => CliGranularity::Annual,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiWithdrawalMode {
    Strict,
    #[serde(alias = "fixedRate", alias = "fixed_rate", alias = "fixed")]
    FixedRate,
}

impl From<ApiWithdrawalMode> for CliWithdrawalMode {
    fn from(value: ApiWithdrawalMode) -> Self {
        match value {
            ApiWithdrawalMode::Strict => CliWithdrawalMode::Strict,
            ApiWithdrawalMode::FixedRate => CliWithdrawalMode::FixedRate,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiTransition {
    #[serde(alias = "skipWithdrawal", alias = "skip_withdrawal", alias = "skip")]
    SkipWithdrawal,
    #[serde(
        alias = "withdrawImmediately",
        alias = "withdraw_immediately",
        alias = "immediate"
    )]
    WithdrawImmediately,
}

impl From<ApiTransition> for CliTransition {
    fn from(value: ApiTransition) -> Self {
        match value {
            ApiTransition::SkipWithdrawal => CliTransition::SkipWithdrawal,
            ApiTransition::WithdrawImmediately => CliTransition::WithdrawImmediately,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    start_date: Option<NaiveDate>,
    initial_deposit: Option<f64>,
    periodic_deposit: Option<f64>,
    deposit_growth: Option<f64>,
    annual_return: Option<f64>,
    volatility: Option<f64>,
    inflation: Option<f64>,
    withdrawal_rate: Option<f64>,
    target_living_cost: Option<f64>,
    years: Option<u32>,
    granularity: Option<ApiGranularity>,
    withdrawal_mode: Option<ApiWithdrawalMode>,
    transition: Option<ApiTransition>,

    uk_personal_allowance: Option<f64>,
    uk_basic_rate_limit: Option<f64>,
    uk_higher_rate_limit: Option<f64>,
    bracket_reindex_years: Option<u32>,

    simulations: Option<u32>,
    seed: Option<u64>,
    outlier_percentile: Option<f64>,
}

#[derive(Parser, Debug)]
#[command(
    name = "nestegg",
    about = "Monte Carlo projection of deposits, growth and taxed retirement withdrawals"
)]
pub struct Cli {
    #[arg(long, help = "First simulated period (YYYY-MM-DD), defaults to today")]
    start_date: Option<NaiveDate>,
    #[arg(long, default_value_t = 1000.0)]
    initial_deposit: f64,
    #[arg(
        long,
        default_value_t = 100.0,
        help = "Deposit added every period while accumulating"
    )]
    periodic_deposit: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Growth of the periodic deposit per period in percent"
    )]
    deposit_growth_rate: f64,
    #[arg(
        long,
        default_value_t = 14.8,
        help = "Expected annual nominal return in percent"
    )]
    annual_return_rate: f64,
    #[arg(
        long,
        default_value_t = 15.0,
        help = "Annual return volatility in percent"
    )]
    annual_volatility: f64,
    #[arg(
        long,
        default_value_t = 4.8,
        help = "Expected annual inflation in percent"
    )]
    inflation_rate: f64,
    #[arg(
        long,
        default_value_t = 4.0,
        help = "Sustainable annual withdrawal rate in percent"
    )]
    withdrawal_rate: f64,
    #[arg(
        long,
        default_value_t = 30000.0,
        help = "Net annual living cost in today's money"
    )]
    target_living_cost: f64,
    #[arg(long, default_value_t = 20, help = "Number of years to simulate")]
    years: u32,
    #[arg(long, value_enum, default_value_t = CliGranularity::Monthly)]
    granularity: CliGranularity,
    #[arg(
        long,
        value_enum,
        default_value_t = CliWithdrawalMode::Strict,
        help = "strict: withdraw just enough to net the living cost; fixed-rate: withdraw the rate every year"
    )]
    withdrawal_mode: CliWithdrawalMode,
    #[arg(
        long,
        value_enum,
        default_value_t = CliTransition::SkipWithdrawal,
        help = "Whether to withdraw in the period retirement begins"
    )]
    transition: CliTransition,
    #[arg(
        long,
        default_value_t = 12570.0,
        help = "UK personal allowance (today's money)"
    )]
    uk_personal_allowance: f64,
    #[arg(
        long,
        default_value_t = 50270.0,
        help = "Upper income bound for UK basic rate band (today's money)"
    )]
    uk_basic_rate_limit: f64,
    #[arg(
        long,
        default_value_t = 125140.0,
        help = "Upper income bound for UK higher rate band (today's money)"
    )]
    uk_higher_rate_limit: f64,
    #[arg(
        long,
        default_value_t = 5,
        help = "Years between tax band re-indexing; 0 re-indexes every period"
    )]
    bracket_reindex_years: u32,
    #[arg(long, default_value_t = 1000)]
    simulations: u32,
    #[arg(long, help = "Base seed; omitted draws one from entropy")]
    seed: Option<u64>,
    #[arg(
        long,
        default_value_t = 90.0,
        help = "Percentile above which retired withdrawals are treated as outliers"
    )]
    outlier_percentile: f64,
}

const MAX_HTTP_SIMULATIONS: u32 = 10_000;

#[derive(Copy, Clone, Debug)]
struct RunOptions {
    simulations: u32,
    outlier_percentile: f64,
}

#[derive(Debug)]
struct ApiRequest {
    params: SimulationParameters,
    options: RunOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    granularity: Granularity,
    withdrawal_mode: WithdrawalMode,
    transition: TransitionPolicy,
    bracket_indexing: BracketIndexing,
    start_date: NaiveDate,
    path: SimulationResult,
    path_summary: RunSummary,
    path_description: String,
    aggregate: AggregateResult,
    aggregate_summary: AggregateSummary,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_request(cli: Cli) -> Result<ApiRequest, String> {
    if cli.simulations == 0 {
        return Err("--simulations must be > 0".to_string());
    }
    if cli.years == 0 {
        return Err("--years must be > 0".to_string());
    }
    if cli.years > 100 {
        return Err("--years must be <= 100".to_string());
    }
    for (name, value) in [
        ("--initial-deposit", cli.initial_deposit),
        ("--periodic-deposit", cli.periodic_deposit),
        ("--target-living-cost", cli.target_living_cost),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(format!("{name} must be >= 0"));
        }
    }
    for (name, value) in [
        ("--deposit-growth-rate", cli.deposit_growth_rate),
        ("--annual-return-rate", cli.annual_return_rate),
        ("--inflation-rate", cli.inflation_rate),
    ] {
        if !value.is_finite() || value <= -100.0 {
            return Err(format!("{name} must be > -100"));
        }
    }
    if !cli.annual_volatility.is_finite() || cli.annual_volatility < 0.0 {
        return Err("--annual-volatility must be >= 0".to_string());
    }
    if !cli.withdrawal_rate.is_finite() || cli.withdrawal_rate < 0.0 {
        return Err("--withdrawal-rate must be >= 0".to_string());
    }
    if cli.withdrawal_mode == CliWithdrawalMode::FixedRate && cli.withdrawal_rate <= 0.0 {
        return Err("--withdrawal-rate must be > 0 with --withdrawal-mode=fixed-rate".to_string());
    }
    if cli.uk_personal_allowance < 0.0 {
        return Err("UK tax thresholds must be >= 0".to_string());
    }
    if cli.uk_basic_rate_limit < cli.uk_personal_allowance {
        return Err("--uk-basic-rate-limit must be >= --uk-personal-allowance".to_string());
    }
    if cli.uk_higher_rate_limit < cli.uk_basic_rate_limit {
        return Err("--uk-higher-rate-limit must be >= --uk-basic-rate-limit".to_string());
    }
    if !(0.0..=100.0).contains(&cli.outlier_percentile) {
        return Err("--outlier-percentile must be between 0 and 100".to_string());
    }

    let bracket_indexing = if cli.bracket_reindex_years == 0 {
        BracketIndexing::Continuous
    } else {
        BracketIndexing::Stepped {
            every_years: cli.bracket_reindex_years,
        }
    };

    let params = SimulationParameters {
        initial_deposit: cli.initial_deposit,
        periodic_deposit: cli.periodic_deposit,
        deposit_growth_rate: cli.deposit_growth_rate / 100.0,
        annual_return_rate: cli.annual_return_rate / 100.0,
        annual_volatility: cli.annual_volatility / 100.0,
        annual_inflation_rate: cli.inflation_rate / 100.0,
        annual_withdrawal_rate: cli.withdrawal_rate / 100.0,
        target_annual_living_cost: cli.target_living_cost,
        years: cli.years,
        start_date: cli
            .start_date
            .unwrap_or_else(|| Local::now().date_naive()),
        granularity: cli.granularity.into(),
        withdrawal_mode: cli.withdrawal_mode.into(),
        transition: cli.transition.into(),
        tax_bands: TaxBands {
            personal_allowance: cli.uk_personal_allowance,
            basic_rate_limit: cli.uk_basic_rate_limit,
            higher_rate_limit: cli.uk_higher_rate_limit,
        },
        bracket_indexing,
        seed: cli.seed,
    };
    params.validate().map_err(|e| e.to_string())?;

    Ok(ApiRequest {
        params,
        options: RunOptions {
            simulations: cli.simulations,
            outlier_percentile: cli.outlier_percentile,
        },
    })
}

fn run_request(request: &ApiRequest) -> Result<SimulateResponse, SimError> {
    let params = &request.params;
    let path = simulate_path(params)?;
    let aggregate = run_aggregate(
        params,
        request.options.simulations,
        Some(request.options.outlier_percentile),
    )?;

    let path_summary = summarize_run(&path, params.start_date, &DEFAULT_MILESTONES);
    let aggregate_summary = summarize_aggregate(&aggregate, &DEFAULT_MILESTONES);

    Ok(SimulateResponse {
        granularity: params.granularity,
        withdrawal_mode: params.withdrawal_mode,
        transition: params.transition,
        bracket_indexing: params.bracket_indexing,
        start_date: params.start_date,
        path_description: describe_run(&path_summary),
        path,
        path_summary,
        aggregate,
        aggregate_summary,
    })
}

/// Runs one path plus the aggregate for parsed flags and returns the
/// pretty-printed JSON report.
pub fn run_cli(cli: Cli) -> Result<String, String> {
    let request = build_request(cli)?;
    let response = run_request(&request).map_err(|e| e.to_string())?;
    serde_json::to_string_pretty(&response).map_err(|e| format!("failed to encode report: {e}"))
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/api/health", get(health_handler))
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "nestegg HTTP API listening");

    axum::serve(listener, app).await
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, serde_json::json!({ "status": "ok" }))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => {
            warn!(error = %msg, "rejected simulate request");
            return error_response(StatusCode::BAD_REQUEST, &msg);
        }
    };

    match tokio::task::spawn_blocking(move || run_request(&request)).await {
        Ok(Ok(response)) => json_response(StatusCode::OK, response),
        Ok(Err(e)) => {
            warn!(error = %e, "simulation failed");
            error_response(StatusCode::BAD_REQUEST, &e.to_string())
        }
        Err(e) => {
            warn!(error = %e, "simulation task aborted");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "simulation task aborted")
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
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
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: SimulatePayload) -> Result<ApiRequest, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.start_date {
        cli.start_date = Some(v);
    }
    if let Some(v) = payload.initial_deposit {
        cli.initial_deposit = v;
    }
    if let Some(v) = payload.periodic_deposit {
        cli.periodic_deposit = v;
    }
    if let Some(v) = payload.deposit_growth {
        cli.deposit_growth_rate = v;
    }
    if let Some(v) = payload.annual_return {
        cli.annual_return_rate = v;
    }
    if let Some(v) = payload.volatility {
        cli.annual_volatility = v;
    }
    if let Some(v) = payload.inflation {
        cli.inflation_rate = v;
    }
    if let Some(v) = payload.withdrawal_rate {
        cli.withdrawal_rate = v;
    }
    if let Some(v) = payload.target_living_cost {
        cli.target_living_cost = v;
    }
    if let Some(v) = payload.years {
        cli.years = v;
    }
    if let Some(v) = payload.granularity {
        cli.granularity = v.into();
    }
    if let Some(v) = payload.withdrawal_mode {
        cli.withdrawal_mode = v.into();
    }
    if let Some(v) = payload.transition {
        cli.transition = v.into();
    }

    if let Some(v) = payload.uk_personal_allowance {
        cli.uk_personal_allowance = v;
    }
    if let Some(v) = payload.uk_basic_rate_limit {
        cli.uk_basic_rate_limit = v;
    }
    if let Some(v) = payload.uk_higher_rate_limit {
        cli.uk_higher_rate_limit = v;
    }
    if let Some(v) = payload.bracket_reindex_years {
        cli.bracket_reindex_years = v;
    }

    if let Some(v) = payload.simulations {
        cli.simulations = v;
    }
    if let Some(v) = payload.seed {
        cli.seed = Some(v);
    }
    if let Some(v) = payload.outlier_percentile {
        cli.outlier_percentile = v;
    }

    if cli.simulations > MAX_HTTP_SIMULATIONS {
        return Err(format!(
            "simulations must be <= {MAX_HTTP_SIMULATIONS} over HTTP"
        ));
    }

    build_request(cli)
}

fn default_cli_for_api() -> Cli {
    Cli {
        start_date: None,
        initial_deposit: 1_000.0,
        periodic_deposit: 100.0,
        deposit_growth_rate: 0.0,
        annual_return_rate: 14.8,
        annual_volatility: 15.0,
        inflation_rate: 4.8,
        withdrawal_rate: 4.0,
        target_living_cost: 30_000.0,
        years: 20,
        granularity: CliGranularity::Monthly,
        withdrawal_mode: CliWithdrawalMode::Strict,
        transition: CliTransition::SkipWithdrawal,
        uk_personal_allowance: 12_570.0,
        uk_basic_rate_limit: 50_270.0,
        uk_higher_rate_limit: 125_140.0,
        bracket_reindex_years: 5,
        simulations: 1_000,
        seed: None,
        outlier_percentile: 90.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_cli() -> Cli {
        let mut cli = default_cli_for_api();
        cli.start_date = NaiveDate::from_ymd_opt(2025, 1, 1);
        cli.seed = Some(7);
        cli.simulations = 20;
        cli
    }

    #[test]
    fn default_cli_matches_parsed_defaults() {
        let parsed = Cli::try_parse_from(["nestegg"]).expect("defaults parse");
        let defaults = default_cli_for_api();
        assert_approx(parsed.initial_deposit, defaults.initial_deposit);
        assert_approx(parsed.annual_return_rate, defaults.annual_return_rate);
        assert_approx(parsed.target_living_cost, defaults.target_living_cost);
        assert_eq!(parsed.years, defaults.years);
        assert_eq!(parsed.granularity, defaults.granularity);
        assert_eq!(parsed.withdrawal_mode, defaults.withdrawal_mode);
        assert_eq!(parsed.bracket_reindex_years, defaults.bracket_reindex_years);
        assert_eq!(parsed.simulations, defaults.simulations);
    }

    #[test]
    fn build_request_converts_percentages_to_fractions() {
        let request = build_request(sample_cli()).expect("valid inputs");
        let params = request.params;
        assert_approx(params.annual_return_rate, 0.148);
        assert_approx(params.annual_volatility, 0.15);
        assert_approx(params.annual_inflation_rate, 0.048);
        assert_approx(params.annual_withdrawal_rate, 0.04);
        assert_eq!(
            params.bracket_indexing,
            BracketIndexing::Stepped { every_years: 5 }
        );
        assert_eq!(request.options.simulations, 20);
    }

    #[test]
    fn zero_reindex_years_selects_continuous_indexing() {
        let mut cli = sample_cli();
        cli.bracket_reindex_years = 0;
        let request = build_request(cli).expect("valid inputs");
        assert_eq!(request.params.bracket_indexing, BracketIndexing::Continuous);
    }

    #[test]
    fn build_request_rejects_zero_rate_in_fixed_rate_mode() {
        let mut cli = sample_cli();
        cli.withdrawal_mode = CliWithdrawalMode::FixedRate;
        cli.withdrawal_rate = 0.0;
        let err = build_request(cli).expect_err("must reject zero fixed rate");
        assert!(err.contains("--withdrawal-rate"));
    }

    #[test]
    fn build_request_rejects_invalid_band_order() {
        let mut cli = sample_cli();
        cli.uk_basic_rate_limit = 10_000.0;
        let err = build_request(cli).expect_err("must reject bad threshold order");
        assert!(err.contains("--uk-basic-rate-limit"));
    }

    #[test]
    fn build_request_rejects_zero_years_and_simulations() {
        let mut cli = sample_cli();
        cli.years = 0;
        assert!(build_request(cli).expect_err("zero years").contains("--years"));

        let mut cli = sample_cli();
        cli.simulations = 0;
        assert!(
            build_request(cli)
                .expect_err("zero simulations")
                .contains("--simulations")
        );
    }

    #[test]
    fn cli_parses_flags_and_start_date() {
        let cli = Cli::try_parse_from([
            "nestegg",
            "--start-date",
            "2030-06-15",
            "--granularity",
            "annual",
            "--withdrawal-mode",
            "fixed-rate",
            "--transition",
            "withdraw-immediately",
            "--years",
            "12",
        ])
        .expect("flags parse");
        let request = build_request(cli).expect("valid inputs");
        assert_eq!(
            request.params.start_date,
            NaiveDate::from_ymd_opt(2030, 6, 15).expect("valid date")
        );
        assert_eq!(request.params.granularity, Granularity::Annual);
        assert_eq!(request.params.withdrawal_mode, WithdrawalMode::FixedRate);
        assert_eq!(
            request.params.transition,
            TransitionPolicy::WithdrawImmediately
        );
        assert_eq!(request.params.total_periods(), 12);
    }

    #[test]
    fn api_request_from_json_parses_web_keys() {
        let json = r#"{
          "startDate": "2026-03-01",
          "initialDeposit": 5000,
          "periodicDeposit": 250,
          "depositGrowth": 0.5,
          "annualReturn": 7,
          "volatility": 12,
          "inflation": 2.5,
          "withdrawalRate": 3.5,
          "targetLivingCost": 40000,
          "years": 35,
          "granularity": "annual",
          "withdrawalMode": "fixedRate",
          "transition": "immediate",
          "bracketReindexYears": 0,
          "simulations": 250,
          "seed": 11,
          "outlierPercentile": 95
        }"#;
        let request = api_request_from_json(json).expect("json should parse");
        let params = request.params;

        assert_eq!(
            params.start_date,
            NaiveDate::from_ymd_opt(2026, 3, 1).expect("valid date")
        );
        assert_approx(params.initial_deposit, 5_000.0);
        assert_approx(params.periodic_deposit, 250.0);
        assert_approx(params.deposit_growth_rate, 0.005);
        assert_approx(params.annual_return_rate, 0.07);
        assert_approx(params.annual_volatility, 0.12);
        assert_approx(params.annual_inflation_rate, 0.025);
        assert_approx(params.annual_withdrawal_rate, 0.035);
        assert_approx(params.target_annual_living_cost, 40_000.0);
        assert_eq!(params.years, 35);
        assert_eq!(params.granularity, Granularity::Annual);
        assert_eq!(params.withdrawal_mode, WithdrawalMode::FixedRate);
        assert_eq!(params.transition, TransitionPolicy::WithdrawImmediately);
        assert_eq!(params.bracket_indexing, BracketIndexing::Continuous);
        assert_eq!(params.seed, Some(11));
        assert_eq!(request.options.simulations, 250);
        assert_approx(request.options.outlier_percentile, 95.0);
    }

    #[test]
    fn api_request_rejects_oversized_http_batches() {
        let err = api_request_from_json(r#"{ "simulations": 10001 }"#)
            .expect_err("must cap simulations");
        assert!(err.contains("simulations"));
        assert!(api_request_from_json(r#"{ "simulations": 10000 }"#).is_ok());
    }

    #[test]
    fn simulate_response_serialization_contains_expected_fields() {
        let mut cli = sample_cli();
        cli.years = 2;
        cli.annual_volatility = 0.0;
        cli.simulations = 3;

        let request = build_request(cli).expect("valid inputs");
        let response = run_request(&request).expect("simulation runs");
        assert_eq!(response.path.points.len(), 24);
        assert_eq!(response.aggregate.mean_portfolio.len(), 24);
        assert!(
            response.aggregate.success_rate == 0.0 || response.aggregate.success_rate == 100.0
        );

        let json = serde_json::to_string(&response).expect("response should serialize");
        for key in [
            "\"path\"",
            "\"pathSummary\"",
            "\"pathDescription\"",
            "\"aggregate\"",
            "\"aggregateSummary\"",
            "\"meanPortfolio\"",
            "\"filteredWithdrawal\"",
            "\"successRate\"",
            "\"retirementDate\"",
            "\"withdrawalMode\":\"strict\"",
            "\"granularity\":\"monthly\"",
            "\"startDate\":\"2025-01-01\"",
        ] {
            assert!(json.contains(key), "missing {key} in {json}");
        }
    }

    #[test]
    fn run_cli_emits_json_report() {
        let cli = Cli::try_parse_from([
            "nestegg",
            "--start-date",
            "2025-01-01",
            "--years",
            "3",
            "--simulations",
            "5",
            "--seed",
            "3",
        ])
        .expect("flags parse");
        let report = run_cli(cli).expect("cli run succeeds");
        let value: serde_json::Value = serde_json::from_str(&report).expect("valid json");
        assert_eq!(value["aggregate"]["runs"], 5);
        assert_eq!(
            value["path"]["points"].as_array().map(|points| points.len()),
            Some(36)
        );
    }

    #[test]
    fn run_cli_reports_invalid_flags_as_errors() {
        let cli = Cli::try_parse_from(["nestegg", "--years", "0"]).expect("flags parse");
        let err = run_cli(cli).expect_err("zero years is rejected");
        assert!(err.contains("--years"));

        assert!(Cli::try_parse_from(["nestegg", "--granularity", "weekly"]).is_err());
    }
}
