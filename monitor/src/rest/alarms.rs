use super::{ApiResult, AppState};
use crate::errors::Error;
use crate::model::{Actor, AlarmFilter, AlarmId, AlarmView};
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct AcknowledgeResponse {
    status: &'static str,
    alarm: AlarmView,
}

pub(super) async fn list_alarms(
    State(state): State<AppState>,
    filter: Result<Query<AlarmFilter>, QueryRejection>,
) -> ApiResult<Json<Vec<AlarmView>>> {
    let Query(filter) = filter?;
    let alarms = state.engine.store().list_alarms(&filter).await?;
    Ok(Json(state.engine.alarm_views(alarms).await?))
}

pub(super) async fn get_alarm(
    State(state): State<AppState>,
    Path(id): Path<AlarmId>,
) -> ApiResult<Json<AlarmView>> {
    let alarm = state
        .engine
        .store()
        .get_alarm(id)
        .await?
        .ok_or_else(|| Error::not_found("Alarm", id))?;
    let view = state
        .engine
        .alarm_views(vec![alarm])
        .await?
        .pop()
        .ok_or_else(|| Error::not_found("Alarm", id))?;
    Ok(Json(view))
}

pub(super) async fn acknowledge_alarm(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<AlarmId>,
) -> ApiResult<Json<AcknowledgeResponse>> {
    let alarm = state.engine.acknowledge(&actor, id).await?;
    let view = state
        .engine
        .alarm_views(vec![alarm])
        .await?
        .pop()
        .ok_or_else(|| Error::not_found("Alarm", id))?;
    Ok(Json(AcknowledgeResponse {
        status: "acknowledged",
        alarm: view,
    }))
}
