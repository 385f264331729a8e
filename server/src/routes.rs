//! HTTP routes.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
#[cfg(feature = "swagger-ui")]
use axum::response::Redirect;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::debug;
use utoipa::{OpenApi, ToSchema};
#[cfg(feature = "swagger-ui")]
use utoipa_swagger_ui::SwaggerUi;

use ratecache_common::{
    parse_utc_rfc3339, AccessLogEntry, AccessLogQuery, CurrentRates, RateCacheError, Timestamp,
    DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT, UNKNOWN_SOURCE,
};
use ratecache_core::CacheMetricsSnapshot;

use crate::error::{ApiError, ErrorBody, FieldError};
use crate::openapi::{ApiDoc, OPENAPI_JSON_PATH};
#[cfg(feature = "swagger-ui")]
use crate::openapi::{SWAGGER_UI_ENTRY, SWAGGER_UI_PATH};
use crate::state::AppState;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let router = Router::new()
        .route("/v1/current-rates", get(current_rates))
        .route("/v1/access-logs", get(access_logs))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route(OPENAPI_JSON_PATH, get(openapi_json));

    #[cfg(feature = "swagger-ui")]
    let router = router
        .route("/api-docs", get(|| async { Redirect::permanent(SWAGGER_UI_ENTRY) }))
        .merge(
            SwaggerUi::new(SWAGGER_UI_PATH)
                .config(utoipa_swagger_ui::Config::from(OPENAPI_JSON_PATH)),
        );

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Current exchange rates, revalidated in the background when stale.
#[utoipa::path(
    get,
    path = "/v1/current-rates",
    tag = "Rates",
    params(
        ("X-Forwarded-For" = Option<String>, Header, description = "Caller address behind a proxy"),
    ),
    responses(
        (status = 200, description = "Latest stored rates", body = CurrentRates),
        (status = 400, description = "Forwarded address is not an IP", body = ErrorBody),
        (status = 500, description = "Storage failure", body = ErrorBody),
        (status = 503, description = "No stored rates and the provider has none", body = ErrorBody),
    )
)]
pub async fn current_rates(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Json<CurrentRates>, ApiError> {
    let source_address = source_address(&headers, peer.map(|c| c.0), state.trust_proxy)?;
    debug!(source_address = %source_address, "Serving current rates");

    let snapshot = state
        .service
        .get_current_rates_and_log_access(&source_address)
        .await?;

    Ok(Json(snapshot.to_current_rates()))
}

/// Caller address: first forwarded hop when proxies are trusted, else the
/// peer, else [`UNKNOWN_SOURCE`].
fn source_address(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy: bool,
) -> Result<String, ApiError> {
    let forwarded = trust_proxy
        .then(|| headers.get("x-forwarded-for"))
        .flatten()
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());

    match (forwarded, peer) {
        (Some(hop), _) => hop
            .parse::<IpAddr>()
            .map(|ip| ip.to_string())
            .map_err(|_| ApiError::InvalidInput(vec![FieldError::new("ip", "Invalid ip")])),
        (None, Some(peer)) => Ok(peer.ip().to_string()),
        (None, None) => Ok(UNKNOWN_SOURCE.to_string()),
    }
}

/// Raw `/v1/access-logs` query string.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogsParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl AccessLogsParams {
    /// Check every rule and build the store query, or report all failures.
    pub fn validate(&self) -> Result<AccessLogQuery, Vec<FieldError>> {
        let mut errors = Vec::new();

        let start = parse_date(
            self.start_date.as_deref(),
            "startDate",
            "Start date",
            &mut errors,
        );
        let end = parse_date(self.end_date.as_deref(), "endDate", "End date", &mut errors);

        let limit = match self.limit.as_deref().map(str::trim) {
            None | Some("") => Some(DEFAULT_PAGE_LIMIT),
            Some(raw) => match raw.parse::<i64>() {
                Err(_) => {
                    errors.push(FieldError::new("limit", "Limit must be an integer"));
                    None
                }
                Ok(n) if n < 1 => {
                    errors.push(FieldError::new("limit", "Limit must be at least 1"));
                    None
                }
                Ok(n) if n > i64::from(MAX_PAGE_LIMIT) => {
                    errors.push(FieldError::new(
                        "limit",
                        format!("Limit cannot exceed {MAX_PAGE_LIMIT}"),
                    ));
                    None
                }
                Ok(n) => u32::try_from(n).ok(),
            },
        };

        let offset = match self.offset.as_deref().map(str::trim) {
            None | Some("") => Some(0),
            Some(raw) => match raw.parse::<i64>() {
                Err(_) => {
                    errors.push(FieldError::new("offset", "Offset must be an integer"));
                    None
                }
                Ok(n) if n < 0 => {
                    errors.push(FieldError::new("offset", "Offset must be 0 or greater"));
                    None
                }
                Ok(n) => match u32::try_from(n) {
                    Ok(n) => Some(n),
                    Err(_) => {
                        errors.push(FieldError::new("offset", "Offset is too large"));
                        None
                    }
                },
            },
        };

        if let (Some(start), Some(end)) = (start, end) {
            if end < start {
                errors.push(FieldError::new(
                    "endDate",
                    "End date must be after start date",
                ));
            }
        }

        match (limit, offset) {
            (Some(limit), Some(offset)) if errors.is_empty() => Ok(AccessLogQuery {
                start,
                end,
                limit,
                offset,
            }),
            _ => Err(errors),
        }
    }
}

fn parse_date(
    raw: Option<&str>,
    field: &'static str,
    label: &str,
    errors: &mut Vec<FieldError>,
) -> Option<Timestamp> {
    let raw = raw?;
    if let Some(ts) = parse_utc_rfc3339(raw) {
        return Some(ts);
    }

    let message = if chrono::DateTime::parse_from_rfc3339(raw).is_ok() {
        format!("{label} must explicitly end with Z to indicate UTC")
    } else {
        format!("{label} must be a valid ISO 8601 date")
    };
    errors.push(FieldError::new(field, message));
    None
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AccessLogsResponse {
    pub data: Vec<AccessLogEntry>,
    pub pagination: Pagination,
}

/// Page through the access audit trail, newest first.
#[utoipa::path(
    get,
    path = "/v1/access-logs",
    tag = "Access logs",
    params(
        ("startDate" = Option<String>, Query, description = "Inclusive lower bound, UTC"),
        ("endDate" = Option<String>, Query, description = "Inclusive upper bound, UTC"),
        ("limit" = Option<u32>, Query, description = "Page size, 1 to 1000 (default 100)"),
        ("offset" = Option<u32>, Query, description = "Page index (default 0)"),
    ),
    responses(
        (status = 200, description = "One page of access records", body = AccessLogsResponse),
        (status = 400, description = "Invalid query parameters", body = ErrorBody),
        (status = 500, description = "Storage failure", body = ErrorBody),
    )
)]
pub async fn access_logs(
    State(state): State<AppState>,
    Query(params): Query<AccessLogsParams>,
) -> Result<Json<AccessLogsResponse>, ApiError> {
    let query = params.validate().map_err(ApiError::InvalidInput)?;

    let data = state
        .access_log
        .query(&query)
        .await
        .map_err(|e| RateCacheError::internal("failed to read access logs", e))?;

    Ok(Json(AccessLogsResponse {
        data,
        pagination: Pagination {
            limit: query.limit,
            offset: query.offset,
        },
    }))
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Operations",
    responses((status = 200, description = "Process is serving"))
)]
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Operations",
    responses((status = 200, description = "Cache and queue counters", body = CacheMetricsSnapshot))
)]
pub async fn metrics(State(state): State<AppState>) -> Json<CacheMetricsSnapshot> {
    Json(state.service.metrics().snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Duration;
    use tower::ServiceExt;

    use ratecache_common::{now, ExchangeRateSnapshot, LatestRates, RateTable, SnapshotId};
    use ratecache_core::{CacheConfig, MemoryStore, MockRateFetcher, QueueWorker, RateCacheService};

    struct TestApp {
        app: Router,
        worker: QueueWorker,
        store: Arc<MemoryStore>,
        fetcher: Arc<MockRateFetcher>,
    }

    fn usd_rates() -> LatestRates {
        let table: RateTable = [("EUR".to_string(), 0.85), ("GBP".to_string(), 0.79)]
            .into_iter()
            .collect();
        LatestRates::new("USD", table, now())
    }

    fn test_app(trust_proxy: bool) -> TestApp {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(MockRateFetcher::new("mock"));
        fetcher.set_rates(usd_rates());

        let (service, worker) = RateCacheService::start(
            fetcher.clone(),
            store.clone(),
            store.clone(),
            CacheConfig::default(),
        );
        let app = router(AppState::new(service, store.clone(), trust_proxy));

        TestApp {
            app,
            worker,
            store,
            fetcher,
        }
    }

    async fn get(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_current_rates_cold_start() {
        let t = test_app(true);

        let req = Request::builder()
            .uri("/v1/current-rates")
            .header("x-forwarded-for", "203.0.113.5, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        let (status, body) = get(&t.app, req).await;
        t.worker.shutdown().await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["base"], "USD");
        assert_eq!(body["rates"]["EUR"], 0.85);
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
        assert_eq!(t.fetcher.calls(), 1);

        let entries = t.store.access_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source_address, "203.0.113.5");
    }

    #[tokio::test]
    async fn test_current_rates_serves_stored_snapshot() {
        let t = test_app(true);
        let persisted_at = now() - Duration::minutes(5);
        t.store.insert_snapshot(ExchangeRateSnapshot::from_latest(
            SnapshotId::new(1),
            usd_rates(),
            persisted_at,
        ));

        let (status, body) = get(&t.app, request("/v1/current-rates")).await;
        t.worker.shutdown().await;

        assert_eq!(status, StatusCode::OK);
        let served: CurrentRates = serde_json::from_value(body).unwrap();
        assert_eq!(served.timestamp, persisted_at);
        assert_eq!(t.fetcher.calls(), 0);
        assert_eq!(t.store.access_entries()[0].source_address, UNKNOWN_SOURCE);
    }

    #[tokio::test]
    async fn test_forwarded_header_ignored_without_trust_proxy() {
        let t = test_app(false);
        t.store.insert_snapshot(ExchangeRateSnapshot::from_latest(
            SnapshotId::new(1),
            usd_rates(),
            now(),
        ));

        let req = Request::builder()
            .uri("/v1/current-rates")
            .header("x-forwarded-for", "203.0.113.5")
            .body(Body::empty())
            .unwrap();
        let (status, _) = get(&t.app, req).await;
        t.worker.shutdown().await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(t.store.access_entries()[0].source_address, UNKNOWN_SOURCE);
    }

    #[tokio::test]
    async fn test_invalid_forwarded_address_rejected() {
        let t = test_app(true);

        let req = Request::builder()
            .uri("/v1/current-rates")
            .header("x-forwarded-for", "not-an-ip")
            .body(Body::empty())
            .unwrap();
        let (status, body) = get(&t.app, req).await;
        t.worker.shutdown().await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid input");
        assert_eq!(t.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_current_rates_upstream_unavailable() {
        let t = test_app(true);
        t.fetcher.set_empty();

        let (status, body) = get(&t.app, request("/v1/current-rates")).await;
        t.worker.shutdown().await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "error");
        assert_eq!(
            body["message"],
            "Unable to fetch latest currency rates from provider"
        );
    }

    #[tokio::test]
    async fn test_current_rates_store_failure_is_500() {
        let t = test_app(true);
        t.store.fail_reads(true);

        let (status, body) = get(&t.app, request("/v1/current-rates")).await;
        t.worker.shutdown().await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
    }

    #[tokio::test]
    async fn test_access_logs_defaults_and_ordering() {
        let t = test_app(true);
        let base = now() - Duration::minutes(10);
        for i in 0..3 {
            t.store.insert_access(AccessLogEntry::new(
                format!("10.0.0.{i}"),
                base + Duration::minutes(i),
            ));
        }

        let (status, body) = get(&t.app, request("/v1/access-logs")).await;
        t.worker.shutdown().await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pagination"]["limit"], 100);
        assert_eq!(body["pagination"]["offset"], 0);
        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data[0]["ipAddress"], "10.0.0.2");
        assert!(data[0]["accessedAt"].is_string());
    }

    #[tokio::test]
    async fn test_access_logs_paging_and_range() {
        let t = test_app(true);
        for i in 0..5 {
            t.store.insert_access(AccessLogEntry::new(
                format!("10.0.0.{i}"),
                chrono::DateTime::parse_from_rfc3339(&format!("2024-01-0{}T12:00:00Z", i + 1))
                    .unwrap()
                    .with_timezone(&chrono::Utc),
            ));
        }

        let uri = concat!(
            "/v1/access-logs?startDate=2024-01-02T00:00:00Z",
            "&endDate=2024-01-05T00:00:00Z&limit=2&offset=1",
        );
        let (status, body) = get(&t.app, request(uri)).await;
        t.worker.shutdown().await;

        assert_eq!(status, StatusCode::OK);
        let addresses: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["ipAddress"].as_str().unwrap())
            .collect();
        assert_eq!(addresses, vec!["10.0.0.1"]);
        assert_eq!(body["pagination"]["limit"], 2);
        assert_eq!(body["pagination"]["offset"], 1);
    }

    #[tokio::test]
    async fn test_access_logs_validation_reports_every_rule() {
        let t = test_app(true);

        let uri = "/v1/access-logs?startDate=2024-01-01T00:00:00%2B02:00&limit=5000&offset=-1";
        let (status, body) = get(&t.app, request(uri)).await;
        t.worker.shutdown().await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Invalid input");
        let fields: Vec<&str> = body["details"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["field"].as_str().unwrap())
            .collect();
        assert_eq!(fields, vec!["startDate", "limit", "offset"]);
    }

    #[tokio::test]
    async fn test_access_logs_store_failure_is_500() {
        let t = test_app(true);
        t.store.fail_reads(true);

        let (status, body) = get(&t.app, request("/v1/access-logs")).await;
        t.worker.shutdown().await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let t = test_app(true);

        let (status, body) = get(&t.app, request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        get(&t.app, request("/v1/current-rates")).await;
        let (status, body) = get(&t.app, request("/metrics")).await;
        t.worker.shutdown().await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["coldStarts"], 1);
    }

    #[tokio::test]
    async fn test_openapi_document_served() {
        let t = test_app(true);

        let (status, body) = get(&t.app, request("/api-docs/openapi.json")).await;
        t.worker.shutdown().await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["openapi"].as_str().unwrap().starts_with("3."));
        assert!(body["paths"].get("/v1/current-rates").is_some());
        assert!(body["paths"].get("/v1/access-logs").is_some());
        assert!(body["paths"]["/v1/access-logs"]["get"]["parameters"].is_array());
    }

    #[cfg(feature = "swagger-ui")]
    #[tokio::test]
    async fn test_api_docs_redirects_to_swagger_ui() {
        let t = test_app(true);

        let response = t.app.clone().oneshot(request("/api-docs")).await.unwrap();
        t.worker.shutdown().await;

        assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(
            response.headers()["location"],
            crate::openapi::SWAGGER_UI_ENTRY
        );
    }

    #[test]
    fn test_validate_end_before_start() {
        let params = AccessLogsParams {
            start_date: Some("2024-02-01T00:00:00Z".to_string()),
            end_date: Some("2024-01-01T00:00:00Z".to_string()),
            ..Default::default()
        };
        let errors = params.validate().unwrap_err();
        assert_eq!(
            errors,
            vec![FieldError::new("endDate", "End date must be after start date")]
        );
    }

    #[test]
    fn test_validate_messages() {
        let params = AccessLogsParams {
            start_date: Some("yesterday".to_string()),
            end_date: Some("2024-01-01T00:00:00+00:00".to_string()),
            limit: Some("0".to_string()),
            offset: Some("x".to_string()),
        };
        let messages: Vec<String> = params
            .validate()
            .unwrap_err()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(
            messages,
            vec![
                "Start date must be a valid ISO 8601 date",
                "End date must explicitly end with Z to indicate UTC",
                "Limit must be at least 1",
                "Offset must be an integer",
            ]
        );
    }

    #[test]
    fn test_validate_accepts_bounds() {
        let params = AccessLogsParams {
            limit: Some("1000".to_string()),
            offset: Some("0".to_string()),
            ..Default::default()
        };
        let query = params.validate().unwrap();
        assert_eq!(query.limit, 1000);
        assert_eq!(query.offset, 0);
        assert!(query.start.is_none());
    }

    #[test]
    fn test_source_address_resolution() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "192.0.2.10:55000".parse().unwrap();
        fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>, trust: bool) -> String {
            source_address(headers, peer, trust).unwrap()
        }

        assert_eq!(resolve(&headers, Some(peer), true), "192.0.2.10");
        assert_eq!(resolve(&headers, None, true), UNKNOWN_SOURCE);

        headers.insert("x-forwarded-for", "2001:db8::1, 10.0.0.1".parse().unwrap());
        assert_eq!(resolve(&headers, Some(peer), true), "2001:db8::1");
        assert_eq!(resolve(&headers, Some(peer), false), "192.0.2.10");
    }
}
