//! HTTP endpoints for health checks, metrics and book queries

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::MarketDataError;
use crate::orderbook::{wall_clock_micros, Level, LevelSnapshot, Side};
use crate::AppState;

type ApiError = (StatusCode, String);

/// Build the router over the shared state
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/books/:symbol", get(book_levels))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the listener fails
pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

fn api_error(e: MarketDataError) -> ApiError {
    let status = match e {
        MarketDataError::UnknownSymbol(_) => StatusCode::NOT_FOUND,
        MarketDataError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let now = wall_clock_micros();
    let books = state.registry.read().await;
    let entries: serde_json::Map<String, serde_json::Value> = books
        .symbols()
        .into_iter()
        .filter_map(|symbol| {
            let book = books.get(&symbol)?;
            let stats = book.stats();
            let entry = serde_json::json!({
                "ready": book.is_ready(),
                "timestamp_micros": stats.timestamp,
                "staleness_micros": stats.staleness_micros(now),
            });
            Some((symbol, entry))
        })
        .collect();

    Json(serde_json::json!({
        "status": "healthy",
        "component": "book-monitor",
        "exchange": state.config.exchange.name(),
        "books": entries,
        "queued_events": state.events.len(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics(State(state): State<AppState>) -> Result<String, ApiError> {
    state.metrics.render().map_err(api_error)
}

#[derive(Debug, Deserialize)]
pub struct DepthQuery {
    depth: Option<usize>,
}

/// Aggregates, price levels and age of one book
#[derive(Debug, Serialize)]
pub struct BookView {
    symbol: String,
    timestamp_micros: u64,
    staleness_micros: u64,
    aggregate: LevelSnapshot,
    bids: Vec<Level>,
    asks: Vec<Level>,
}

async fn book_levels(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<DepthQuery>,
) -> Result<Json<BookView>, ApiError> {
    let depth = query.depth.unwrap_or(state.config.depth_levels);
    let books = state.registry.read().await;
    let book = books
        .get(&symbol)
        .ok_or_else(|| api_error(MarketDataError::UnknownSymbol(symbol.clone())))?;
    let aggregate = book.top_levels(depth).map_err(api_error)?;

    Ok(Json(BookView {
        timestamp_micros: book.timestamp_micros(),
        staleness_micros: book.stats().staleness_micros(wall_clock_micros()),
        aggregate,
        bids: book.levels(Side::Bid, depth),
        asks: book.levels(Side::Ask, depth),
        symbol,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::orderbook::{BookMutation, Side};
    use rust_decimal_macros::dec;

    async fn state() -> AppState {
        let config = Config {
            symbols: vec!["BTCUSD".to_string(), "ETHUSD".to_string()],
            ..Config::default()
        };
        let state = AppState::new(config).unwrap();
        state.registry.write().await.apply_batch(
            &[
                BookMutation::insert("BTCUSD", Side::Bid, 1, dec!(100), dec!(2)),
                BookMutation::insert("BTCUSD", Side::Bid, 2, dec!(99), dec!(1)),
                BookMutation::insert("BTCUSD", Side::Ask, 3, dec!(101), dec!(4)),
            ],
            "BITFINEX",
            1,
        );
        state
    }

    fn depth(depth: Option<usize>) -> Query<DepthQuery> {
        Query(DepthQuery { depth })
    }

    #[tokio::test]
    async fn test_book_levels_for_ready_book() {
        let state = state().await;
        let Json(view) = book_levels(State(state), Path("BTCUSD".to_string()), depth(Some(1)))
            .await
            .unwrap();

        assert_eq!(view.aggregate.n, 1);
        assert_eq!(view.aggregate.bids_vwap, dec!(100));
        assert_eq!(view.aggregate.asks_total_size, dec!(4));
        assert_eq!(view.bids, vec![Level { price: dec!(100), quantity: dec!(2) }]);
        assert_eq!(view.asks, vec![Level { price: dec!(101), quantity: dec!(4) }]);
        assert_eq!(view.timestamp_micros, 1);
        assert!(view.staleness_micros > 0);
    }

    #[tokio::test]
    async fn test_book_levels_status_codes() {
        let state = state().await;

        let (status, _) = book_levels(State(state.clone()), Path("ETHUSD".to_string()), depth(None))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = book_levels(State(state), Path("DOGEUSD".to_string()), depth(None))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_reports_book_age() {
        let Json(body) = health_check(State(state().await)).await;
        assert_eq!(body["exchange"], "BITFINEX");
        assert_eq!(body["books"]["BTCUSD"]["ready"], true);
        assert_eq!(body["books"]["BTCUSD"]["timestamp_micros"], 1);
        assert!(body["books"]["BTCUSD"]["staleness_micros"].as_u64().unwrap() > 0);
        assert_eq!(body["books"]["ETHUSD"]["ready"], false);
        assert_eq!(body["queued_events"], 0);
    }

    #[tokio::test]
    async fn test_metrics_renders_counters() {
        let state = state().await;
        state.metrics.reconnects.inc();
        let text = metrics(State(state)).await.unwrap();
        assert!(text.contains("feed_reconnects_total 1"));
    }
}
