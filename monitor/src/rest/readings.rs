use super::{ApiResult, AppState};
use crate::errors::Error;
use crate::model::{AlarmView, NewReading, Reading, ReadingId, ReadingQuery, ReadingsResponse};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    reading: Reading,
    alarms: Vec<AlarmView>,
}

pub(super) async fn ingest_reading(
    State(state): State<AppState>,
    payload: Result<Json<NewReading>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    let Json(reading) = payload?;
    let ingested = state.engine.ingest(reading).await?;
    let alarms = state.engine.alarm_views(ingested.alarms).await?;
    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            reading: ingested.reading,
            alarms,
        }),
    ))
}

pub(super) async fn list_readings(
    State(state): State<AppState>,
    query: Result<Query<ReadingQuery>, QueryRejection>,
) -> ApiResult<Json<ReadingsResponse>> {
    let Query(query) = query?;
    let data = state.engine.store().list_readings(&query).await?;

    Ok(Json(ReadingsResponse {
        total: data.len(),
        data,
        limit: query.limit(),
        offset: query.offset(),
    }))
}

pub(super) async fn get_reading(
    State(state): State<AppState>,
    Path(id): Path<ReadingId>,
) -> ApiResult<Json<Reading>> {
    let reading = state
        .engine
        .store()
        .get_reading(id)
        .await?
        .ok_or_else(|| Error::not_found("Reading", id))?;
    Ok(Json(reading))
}
