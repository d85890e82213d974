//! Service status and liveness handlers.

use axum::extract::State;
use axum::response::Json;
use protogate_types::models::AccountStatus;

use crate::state::AppState;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `GET /` summary: account pool health, quota numbers, and counters.
pub async fn service_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let set = state.store.snapshot().await;
    let stats = state.monitor.stats().await;
    let uptime_seconds = (chrono::Utc::now() - state.started_at).num_seconds();

    let accounts: Vec<serde_json::Value> = set
        .accounts
        .iter()
        .map(|account| {
            serde_json::json!({
                "email": account.email,
                "status": account.status.as_str(),
                "quota_remaining": account.quota.as_ref().map(|q| q.remaining()),
                "quota_reset": account.quota.as_ref().and_then(|q| q.next_refresh_time.clone()),
            })
        })
        .collect();

    Json(serde_json::json!({
        "service": "protogate",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime_seconds,
        "accounts": {
            "total": set.len(),
            "available": set.count_by_status(AccountStatus::Available),
            "quota_exhausted": set.count_by_status(AccountStatus::QuotaExhausted),
            "refresh_failed": set.count_by_status(AccountStatus::RefreshFailed),
            "invalid_token": set.count_by_status(AccountStatus::InvalidToken),
            "detail": accounts,
        },
        "stats": stats,
    }))
}
