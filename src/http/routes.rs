use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use coincache_core::types::{CoinView, PriceRecord};
use coincache_monitor::{stale_after, HealthReport};
use coincache_refresh::RefreshHandle;
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::{ApiError, ApiResult};
use super::AppState;

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    skip: usize,
    limit: Option<usize>,
    #[serde(default)]
    include_metadata: bool,
    #[serde(default)]
    include_prices: bool,
}

#[derive(Deserialize)]
struct CoinQuery {
    #[serde(default)]
    include_metadata: bool,
}

#[derive(Deserialize)]
struct CreateQuery {
    coin_id: String,
}

#[derive(Deserialize)]
struct PricesQuery {
    /// Comma-separated coin ids
    coin_ids: String,
}

#[derive(Deserialize)]
struct TopQuery {
    #[serde(default = "default_top_limit")]
    limit: usize,
}

fn default_top_limit() -> usize {
    10
}

async fn index() -> Json<Value> {
    Json(json!({ "message": "Welcome to the coincache API" }))
}

async fn list_coins(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<Vec<CoinView>>> {
    let limit = q.limit.unwrap_or(state.default_list_limit);
    let coins = state
        .service
        .read_coin_list(q.skip, limit, q.include_metadata, q.include_prices)
        .await?;
    Ok(Json(coins))
}

async fn get_coin(
    State(state): State<Arc<AppState>>,
    Path(coin_id): Path<String>,
    Query(q): Query<CoinQuery>,
) -> ApiResult<Json<CoinView>> {
    let coin = state.service.read_coin(&coin_id, q.include_metadata).await?;
    Ok(Json(coin))
}

async fn create_coin(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CreateQuery>,
) -> ApiResult<Json<CoinView>> {
    let coin = state.service.create_coin(q.coin_id.trim()).await?;
    Ok(Json(coin))
}

async fn delete_coin(
    State(state): State<Arc<AppState>>,
    Path(coin_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.service.delete_coin(&coin_id).await?;
    Ok(Json(json!({ "message": format!("Coin {} deleted", coin_id) })))
}

async fn get_prices(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PricesQuery>,
) -> ApiResult<Json<Vec<PriceRecord>>> {
    let ids: Vec<String> = q
        .coin_ids
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();

    let prices = state.service.read_prices(&ids).await?;
    if prices.is_empty() {
        return Err(ApiError::NotFound("No prices found".to_string()));
    }
    Ok(Json(prices))
}

async fn get_price(
    State(state): State<Arc<AppState>>,
    Path(coin_id): Path<String>,
) -> ApiResult<Json<PriceRecord>> {
    let price = state.service.read_price(&coin_id).await?;
    Ok(Json(price))
}

async fn top_coins(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TopQuery>,
) -> ApiResult<Json<Vec<CoinView>>> {
    let coins = state.service.read_top_coins(q.limit).await?;
    Ok(Json(coins))
}

async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthReport>) {
    let config = state.engine.config();
    let running = state
        .refresh
        .as_ref()
        .map(RefreshHandle::is_running)
        .unwrap_or(false);

    let report = HealthReport::new(
        &state.engine.status(),
        running,
        state.service.cache().stats(),
        stale_after(config.interval, config.backoff),
        Utc::now(),
    );
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(index))
        .route("/coins", get(list_coins).post(create_coin))
        .route("/coins/{coin_id}", get(get_coin).delete(delete_coin))
        .route("/prices", get(get_prices))
        .route("/prices/{coin_id}", get(get_price))
        .route("/market/top", get(top_coins))
        .route("/health", get(health))
}
