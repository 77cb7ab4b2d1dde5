use crate::error::ApiError;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthChecks {
    pub database: bool,
    pub jwt_uses_default: bool,
}

/// Public health check endpoint with dependency checks
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is degraded", body = HealthResponse)
    ),
    tag = "Health"
)]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let checks = HealthChecks {
        database: state.db.ping(),
        jwt_uses_default: state.jwt_uses_default,
    };

    if checks.jwt_uses_default {
        warn!("Health check: using default JWT secret, not safe for production");
    }
    if !checks.database {
        warn!("Health check: database unavailable");
    }

    let healthy = checks.database && !checks.jwt_uses_default;
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        timestamp: state.clock.now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks,
    };

    if healthy {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}

pub async fn not_found() -> Result<HttpResponse, ApiError> {
    Err(ApiError::not_found("Route not found"))
}
