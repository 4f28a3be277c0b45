use axum::{extract::State, Json};
use std::sync::Arc;

use crate::metrics::PendingSnapshot;
use crate::AppState;

// ─── GET /api/metrics/pending ────────────────────────────────────
/// Registers accumulated since the last flush, without draining them.
/// Useful for curl / debugging.

pub async fn get_pending(State(state): State<Arc<AppState>>) -> Json<PendingSnapshot> {
    Json(state.metrics.pending())
}
