use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    Json as BodyJson,
};
use tracing::{error, info, warn};

use crate::{
    dns::{Changes, Endpoint},
    error::ProviderError,
    provider::ApplyReport,
    AppState,
};

// Content-Type external-dns expects on every webhook response
pub const WEBHOOK_CT: &str = "application/external.dns.webhook+json;version=1";

fn webhook_headers() -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert("Content-Type", HeaderValue::from_static(WEBHOOK_CT));
    h
}

// ── GET /healthz ──────────────────────────────────────────────────────────────

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

// ── GET / ─────────────────────────────────────────────────────────────────────
// Domain-filter negotiation.

pub async fn negotiate(State(state): State<AppState>) -> impl IntoResponse {
    (webhook_headers(), Json(state.provider.domain_filter().clone()))
}

// ── GET /records ──────────────────────────────────────────────────────────────

pub async fn get_records(State(state): State<AppState>) -> Response {
    match state.provider.records().await {
        Ok(eps) => {
            info!("GET /records → {} endpoint(s)", eps.len());
            (webhook_headers(), Json(eps)).into_response()
        }
        Err(e) => {
            error!("GET /records error: {e}");
            error_response(&e)
        }
    }
}

// ── POST /records ─────────────────────────────────────────────────────────────
//
// external-dns expects 204 on success. A partially applied batch answers
// with the error status of the first failure and the per-zone report, so
// the controller retries and the next GET /records shows what landed.

pub async fn apply_changes(
    State(state): State<AppState>,
    BodyJson(changes): BodyJson<Changes>,
) -> Response {
    info!(
        create = changes.create.len(),
        update = changes.update_new.len(),
        delete = changes.delete.len(),
        dry_run = state.provider.is_dry_run(),
        "POST /records"
    );

    match state.provider.apply_changes(changes).await {
        Ok(report) if report.is_success() => StatusCode::NO_CONTENT.into_response(),
        Ok(report) => partial_failure_response(report),
        Err(e) => {
            error!("POST /records error: {e}");
            error_response(&e)
        }
    }
}

// ── POST /adjustendpoints ─────────────────────────────────────────────────────
//
// Called by external-dns before planning. Returns the endpoints this
// provider owns, in the shape it will store them: names lowercased without
// trailing dot, TTL defaulted and raised to Porkbun's minimum, host targets
// without trailing dot. Anything outside the domain filter is dropped.

pub async fn adjust_endpoints(
    State(state): State<AppState>,
    BodyJson(endpoints): BodyJson<Vec<Endpoint>>,
) -> impl IntoResponse {
    let proposed = endpoints.len();
    let adjusted = state.provider.adjust_endpoints(endpoints);
    if adjusted.len() != proposed {
        warn!(
            "adjustendpoints: kept {} of {} endpoint(s)",
            adjusted.len(),
            proposed
        );
    }
    (webhook_headers(), Json(adjusted))
}

// ── helpers ───────────────────────────────────────────────────────────────────

pub fn status_for(e: &ProviderError) -> StatusCode {
    match e {
        ProviderError::InvalidBatch(_) => StatusCode::BAD_REQUEST,
        ProviderError::RegistrarRejected { .. } => StatusCode::BAD_GATEWAY,
        ProviderError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ProviderError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ProviderError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: &ProviderError) -> Response {
    (
        status_for(e),
        Json(serde_json::json!({"error": e.to_string()})),
    )
        .into_response()
}

fn partial_failure_response(report: ApplyReport) -> Response {
    let status = report
        .first_error()
        .map(status_for)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let message = report
        .first_error()
        .map(ToString::to_string)
        .unwrap_or_default();
    error!(
        "POST /records partially applied ({} operation(s) done): {message}",
        report.applied()
    );
    (
        status,
        Json(serde_json::json!({
            "error": message,
            "accepted": report.accepted,
            "zones": report.zones,
        })),
    )
        .into_response()
}
