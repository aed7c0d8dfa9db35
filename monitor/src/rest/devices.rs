use super::{ApiResult, AppState};
use crate::errors::Error;
use crate::model::{
    Actor, AlarmView, Device, DeviceId, DeviceUpdate, NewDevice, ReadingQuery, ReadingsResponse,
};
use crate::summary::ReadingSummary;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    limit: Option<i64>,
    offset: Option<i64>,
}

/// `device_ids` is a comma separated list; leaving it out selects every device.
#[derive(Debug, Deserialize)]
pub struct SummariesQuery {
    device_ids: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl SummariesQuery {
    fn device_ids(&self) -> Result<Option<Vec<DeviceId>>, Error> {
        let Some(raw) = &self.device_ids else {
            return Ok(None);
        };
        raw.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| {
                id.parse::<DeviceId>()
                    .map_err(|_| Error::Validation(format!("Invalid device id '{}'", id)))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

#[derive(Debug, Serialize)]
pub struct DeviceUpdatedResponse {
    device: Device,
    alarms: Vec<AlarmView>,
}

pub(super) async fn list_devices(State(state): State<AppState>) -> ApiResult<Json<Vec<Device>>> {
    Ok(Json(state.engine.store().list_devices().await?))
}

pub(super) async fn create_device(
    State(state): State<AppState>,
    actor: Actor,
    payload: Result<Json<NewDevice>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Device>)> {
    let Json(device) = payload?;
    let device = state.engine.create_device(&actor, device).await?;
    Ok((StatusCode::CREATED, Json(device)))
}

pub(super) async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<DeviceId>,
) -> ApiResult<Json<Device>> {
    let device = state
        .engine
        .store()
        .get_device(id)
        .await?
        .ok_or_else(|| Error::not_found("Device", id))?;
    Ok(Json(device))
}

pub(super) async fn update_device(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<DeviceId>,
    payload: Result<Json<DeviceUpdate>, JsonRejection>,
) -> ApiResult<Json<DeviceUpdatedResponse>> {
    let Json(update) = payload?;
    let updated = state.engine.update_device(&actor, id, update).await?;
    let alarms = updated
        .alarms
        .into_iter()
        .map(|alarm| AlarmView::new(alarm, updated.device.code.clone()))
        .collect();
    Ok(Json(DeviceUpdatedResponse {
        device: updated.device,
        alarms,
    }))
}

pub(super) async fn delete_device(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<DeviceId>,
) -> ApiResult<StatusCode> {
    state.engine.delete_device(&actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn device_readings(
    State(state): State<AppState>,
    Path(id): Path<DeviceId>,
    range: Result<Query<RangeQuery>, QueryRejection>,
) -> ApiResult<Json<ReadingsResponse>> {
    let Query(range) = range?;
    let store = state.engine.store();
    if store.get_device(id).await?.is_none() {
        return Err(Error::not_found("Device", id).into());
    }

    let query = ReadingQuery {
        device_id: Some(id),
        start: range.start,
        end: range.end,
        limit: range.limit,
        offset: range.offset,
    };
    let data = store.list_readings(&query).await?;

    Ok(Json(ReadingsResponse {
        total: data.len(),
        data,
        limit: query.limit(),
        offset: query.offset(),
    }))
}

pub(super) async fn device_summary(
    State(state): State<AppState>,
    Path(id): Path<DeviceId>,
    range: Result<Query<RangeQuery>, QueryRejection>,
) -> ApiResult<Json<ReadingSummary>> {
    let Query(range) = range?;
    let summary = state.engine.summary(id, range.start, range.end).await?;
    Ok(Json(summary))
}

pub(super) async fn summaries(
    State(state): State<AppState>,
    query: Result<Query<SummariesQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ReadingSummary>>> {
    let Query(query) = query?;
    let device_ids = query.device_ids()?;
    let summaries = state
        .engine
        .summaries(device_ids.as_deref(), query.start, query.end)
        .await?;
    Ok(Json(summaries))
}
