use axum::{
    Router,
    extract::{Json, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::cli::{BacktestArgs, build_inputs};
use crate::core::{
    Decline, Inputs, MarketTick, PeriodsResult, SimError, TracingObserver, declines, sim_periods,
};
use crate::data::resample_annual;

type Market = Arc<Vec<MarketTick>>;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BacktestPayload {
    withdrawals_per_year: Option<u32>,
    withdrawal_rate: Option<f64>,
    initial_balance: Option<f64>,
    period_length: Option<usize>,
    annual: Option<bool>,

    cash_cushion: Option<bool>,
    cash_cushion_target: Option<f64>,
    cash_use_threshold: Option<f64>,
    cash_rebuild_threshold: Option<f64>,
    cash_rebuild_rate: Option<f64>,
    cash_fraction: Option<f64>,

    paycut: Option<bool>,
    paycut_threshold: Option<f64>,
    paycut_rate: Option<f64>,
    raise: Option<bool>,
    raise_threshold: Option<f64>,
    raise_rate: Option<f64>,
    ratchet: Option<bool>,
    ratchet_to_rate: Option<f64>,

    history: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DeclinesQuery {
    min_percent: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BacktestResponse {
    withdrawal_rate: f64,
    withdrawals_per_year: u32,
    ticks_per_year: u32,
    period_length: usize,
    #[serde(flatten)]
    result: PeriodsResult,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    ticks: usize,
    first_date: Option<chrono::NaiveDate>,
    last_date: Option<chrono::NaiveDate>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn router(market: Market) -> Router {
    Router::new()
        .route(
            "/api/backtest",
            get(backtest_get_handler).post(backtest_post_handler),
        )
        .route("/api/declines", get(declines_handler))
        .route("/api/health", get(health_handler))
        .fallback(not_found_handler)
        .with_state(market)
}

pub async fn run_http_server(port: u16, market: Vec<MarketTick>) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(Arc::new(market));

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "backtest HTTP API listening");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn health_handler(State(market): State<Market>) -> Response {
    json_response(
        StatusCode::OK,
        HealthResponse {
            status: "ok",
            ticks: market.len(),
            first_date: market.first().map(|tick| tick.date),
            last_date: market.last().map(|tick| tick.date),
        },
    )
}

async fn backtest_get_handler(
    State(market): State<Market>,
    Query(payload): Query<BacktestPayload>,
) -> Response {
    backtest_handler_impl(market, payload).await
}

async fn backtest_post_handler(
    State(market): State<Market>,
    Json(payload): Json<BacktestPayload>,
) -> Response {
    backtest_handler_impl(market, payload).await
}

async fn backtest_handler_impl(market: Market, payload: BacktestPayload) -> Response {
    let inputs = match inputs_from_payload(payload) {
        Ok(inputs) => inputs,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let run_inputs = inputs.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let series = if run_inputs.ticks_per_year == 1 {
            resample_annual(&market, 12)
        } else {
            market.to_vec()
        };
        sim_periods(&series, &run_inputs, &TracingObserver)
    })
    .await;

    match joined {
        Ok(Ok(result)) => json_response(StatusCode::OK, build_backtest_response(&inputs, result)),
        Ok(Err(err)) => sim_error_response(&err),
        Err(join_err) => {
            error!(error = %join_err, "backtest task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Backtest task failed")
        }
    }
}

async fn declines_handler(
    State(market): State<Market>,
    Query(query): Query<DeclinesQuery>,
) -> Response {
    let min_percent = query.min_percent.unwrap_or(5.0);
    if !min_percent.is_finite() || min_percent < 0.0 {
        return error_response(StatusCode::BAD_REQUEST, "minPercent must be >= 0");
    }
    let found = significant_declines(&market, min_percent / 100.0);
    json_response(StatusCode::OK, found)
}

fn significant_declines(market: &[MarketTick], min_fraction: f64) -> Vec<Decline<MarketTick>> {
    declines(market.iter().copied())
        .filter(|decline| decline.percent >= min_fraction)
        .collect()
}

fn sim_error_response(err: &SimError) -> Response {
    match err {
        SimError::InvalidConfig(_) | SimError::InsufficientData { .. } => {
            warn!(error = %err, "rejected backtest request");
            error_response(StatusCode::BAD_REQUEST, &err.to_string())
        }
        SimError::EmptyWindow
        | SimError::MissingField { .. }
        | SimError::InvariantViolation { .. } => {
            error!(error = %err, "backtest aborted");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
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
fn inputs_from_json(json: &str) -> Result<Inputs, String> {
    let payload = serde_json::from_str::<BacktestPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    inputs_from_payload(payload)
}

fn inputs_from_payload(payload: BacktestPayload) -> Result<Inputs, String> {
    let mut args = BacktestArgs::default();

    if let Some(v) = payload.withdrawals_per_year {
        args.withdrawals_per_year = v;
    }
    if let Some(v) = payload.withdrawal_rate {
        args.withdrawal_rate = v;
    }
    if let Some(v) = payload.initial_balance {
        args.initial_balance = v;
    }
    if let Some(v) = payload.period_length {
        args.period_length = v;
    }
    if let Some(v) = payload.annual {
        args.annual = v;
    }

    if let Some(v) = payload.cash_cushion {
        args.cash_cushion = v;
    }
    if let Some(v) = payload.cash_cushion_target {
        args.cash_cushion_target = v;
    }
    if let Some(v) = payload.cash_use_threshold {
        args.cash_use_threshold = v;
    }
    if let Some(v) = payload.cash_rebuild_threshold {
        args.cash_rebuild_threshold = v;
    }
    if let Some(v) = payload.cash_rebuild_rate {
        args.cash_rebuild_rate = v;
    }
    args.cash_fraction = payload.cash_fraction;

    if let Some(v) = payload.paycut {
        args.paycut = v;
    }
    if let Some(v) = payload.paycut_threshold {
        args.paycut_threshold = v;
    }
    if let Some(v) = payload.paycut_rate {
        args.paycut_rate = v;
    }
    if let Some(v) = payload.raise {
        args.raise = v;
    }
    if let Some(v) = payload.raise_threshold {
        args.raise_threshold = v;
    }
    if let Some(v) = payload.raise_rate {
        args.raise_rate = v;
    }
    if let Some(v) = payload.ratchet {
        args.ratchet = v;
    }
    if let Some(v) = payload.ratchet_to_rate {
        args.ratchet_to_rate = v;
    }
    if let Some(v) = payload.history {
        args.history = v;
    }

    build_inputs(&args)
}

fn build_backtest_response(inputs: &Inputs, result: PeriodsResult) -> BacktestResponse {
    BacktestResponse {
        withdrawal_rate: inputs.annual_withdrawal_rate,
        withdrawals_per_year: inputs.withdrawals_per_year,
        ticks_per_year: inputs.ticks_per_year,
        period_length: inputs.period_length,
        result,
    }
}
