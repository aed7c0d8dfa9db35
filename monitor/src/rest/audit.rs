use super::{ApiResult, AppState};
use crate::model::{AuditEntry, AuditQuery};
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};

pub(super) async fn list_audit(
    State(state): State<AppState>,
    query: Result<Query<AuditQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    let Query(query) = query?;
    Ok(Json(state.engine.store().list_audit(&query).await?))
}
