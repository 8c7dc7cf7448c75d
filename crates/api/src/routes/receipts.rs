//! Receipt intake.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use herald_common::error::AppError;
use herald_common::types::Receipt;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/receipts", post(submit_receipt))
}

/// POST /api/receipts: Hand a delivery receipt to the push handlers.
///
/// Never waits for delivery. Answers 503 when no handler took the receipt,
/// either because none is ready or because every queue was full.
async fn submit_receipt(
    State(state): State<AppState>,
    Json(receipt): Json<Receipt>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    if !state.hub.is_ready() {
        return Err(AppError::Unavailable("push is disabled".to_string()));
    }

    let accepted = state.hub.push(&receipt);
    if accepted == 0 {
        return Err(AppError::Unavailable(
            "push queues are full, receipt dropped".to_string(),
        ));
    }

    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": accepted }))))
}
