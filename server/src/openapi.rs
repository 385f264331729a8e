//! OpenAPI document for the RateCache HTTP API.
//!
//! Generated from the handler annotations in [`crate::routes`] and served
//! under `/api-docs`.

use utoipa::OpenApi;

use ratecache_common::{AccessLogEntry, CurrentRates};
use ratecache_core::CacheMetricsSnapshot;

use crate::error::{ErrorBody, FieldError};
use crate::routes::{self, AccessLogsResponse, Pagination};

/// Where the JSON document is served.
pub const OPENAPI_JSON_PATH: &str = "/api-docs/openapi.json";

/// Mount point of the Swagger UI.
#[cfg(feature = "swagger-ui")]
pub const SWAGGER_UI_PATH: &str = "/api-docs/ui";

/// Landing page that `/api-docs` redirects to.
#[cfg(feature = "swagger-ui")]
pub const SWAGGER_UI_ENTRY: &str = "/api-docs/ui/";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "RateCache API",
        description = "Current exchange rates served from a stale-while-revalidate cache, \
                       plus the audit trail of rate reads."
    ),
    tags(
        (name = "Rates", description = "Current exchange rates"),
        (name = "Access logs", description = "Audit trail of rate reads"),
        (name = "Operations", description = "Liveness and cache counters")
    ),
    paths(
        routes::current_rates,
        routes::access_logs,
        routes::health,
        routes::metrics,
    ),
    components(schemas(
        CurrentRates,
        AccessLogEntry,
        AccessLogsResponse,
        Pagination,
        CacheMetricsSnapshot,
        ErrorBody,
        FieldError,
    ))
)]
pub struct ApiDoc;
