use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use crate::ledger::LedgerError;

use super::types::{
    AckResponse, BanRequest, BanResponse, ErrorResponse, EvaluateRequest, EvaluateResponse,
    ObserveActivityRequest, RecordOperationRequest, RecordOperationResponse, ServerUsersResponse,
};
use super::ApiState;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

pub async fn observe_activity(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ObserveActivityRequest>,
) -> ApiResult<AckResponse> {
    if request.server_name.trim().is_empty() {
        return Err(bad_request(
            "invalid_server_name",
            "server_name cannot be empty",
        ));
    }

    state
        .ledger
        .ensure_server(request.server_id, &request.server_name);
    Ok(Json(AckResponse { success: true }))
}

pub async fn evaluate_quota(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<EvaluateRequest>,
) -> ApiResult<EvaluateResponse> {
    match state.ledger.evaluate(request.server_id, request.user_id) {
        Ok(()) => Ok(Json(EvaluateResponse {
            exceeded: false,
            reason: None,
            detail: None,
        })),
        Err(err) => Ok(Json(EvaluateResponse {
            exceeded: true,
            reason: Some(err.code().to_string()),
            detail: Some(err.to_string()),
        })),
    }
}

pub async fn record_operation(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<RecordOperationRequest>,
) -> ApiResult<RecordOperationResponse> {
    if request.username.trim().is_empty() {
        return Err(bad_request("invalid_username", "username cannot be empty"));
    }
    if request.from_lang.trim().is_empty() || request.to_lang.trim().is_empty() {
        return Err(bad_request(
            "invalid_language",
            "from_lang and to_lang cannot be empty",
        ));
    }

    match state.ledger.record_operation(
        request.server_id,
        request.user_id,
        &request.username,
        &request.from_lang,
        &request.to_lang,
        request.symbol_count,
    ) {
        Ok(user) => Ok(Json(RecordOperationResponse { user })),
        Err(err @ LedgerError::UnregisteredServer(_)) => {
            Err(conflict("unregistered_server", &err.to_string()))
        }
    }
}

pub async fn user_stats(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<u64>,
) -> Result<String, (StatusCode, Json<ErrorResponse>)> {
    state
        .ledger
        .user_stats(user_id)
        .ok_or_else(|| not_found("user_not_found", "user not tracked"))
}

pub async fn server_users(
    State(state): State<Arc<ApiState>>,
    Path(server_id): Path<u64>,
) -> ApiResult<ServerUsersResponse> {
    match state.ledger.server_users(server_id) {
        Some(users) => Ok(Json(ServerUsersResponse { users })),
        None => Err(not_found("server_not_found", "server not tracked")),
    }
}

pub async fn ban_user(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<BanRequest>,
) -> ApiResult<BanResponse> {
    let entry = state.ledger.ban_user(request.user_id);
    info!(user_id = request.user_id, until = %entry.ban_end, "ban requested");
    Ok(Json(BanResponse { entry }))
}

pub async fn unban_user(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<u64>,
) -> ApiResult<AckResponse> {
    if state.ledger.unban_user(user_id) {
        Ok(Json(AckResponse { success: true }))
    } else {
        Err(not_found("ban_not_found", "user is not blacklisted"))
    }
}

pub async fn ledger_summary(
    State(state): State<Arc<ApiState>>,
) -> ApiResult<crate::ledger::LedgerSummary> {
    Ok(Json(state.ledger.summary()))
}

pub async fn health_check() -> ApiResult<serde_json::Value> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": "usage-ledger"
    })))
}

fn bad_request(code: &str, message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
            details: None,
        }),
    )
}

fn not_found(code: &str, message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
            details: None,
        }),
    )
}

fn conflict(code: &str, message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::CONFLICT,
        Json(ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
            details: None,
        }),
    )
}
