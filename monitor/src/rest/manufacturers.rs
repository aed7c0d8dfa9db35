use super::{ApiResult, AppState};
use crate::errors::Error;
use crate::model::{Actor, Manufacturer, ManufacturerId, NewManufacturer};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};

pub(super) async fn list_manufacturers(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<Manufacturer>>> {
    Ok(Json(state.engine.store().list_manufacturers().await?))
}

pub(super) async fn create_manufacturer(
    State(state): State<AppState>,
    actor: Actor,
    payload: Result<Json<NewManufacturer>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Manufacturer>)> {
    let Json(manufacturer) = payload?;
    let manufacturer = state.engine.create_manufacturer(&actor, manufacturer).await?;
    Ok((StatusCode::CREATED, Json(manufacturer)))
}

pub(super) async fn get_manufacturer(
    State(state): State<AppState>,
    Path(id): Path<ManufacturerId>,
) -> ApiResult<Json<Manufacturer>> {
    let manufacturer = state
        .engine
        .store()
        .get_manufacturer(id)
        .await?
        .ok_or_else(|| Error::not_found("Manufacturer", id))?;
    Ok(Json(manufacturer))
}

pub(super) async fn update_manufacturer(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<ManufacturerId>,
    payload: Result<Json<NewManufacturer>, JsonRejection>,
) -> ApiResult<Json<Manufacturer>> {
    let Json(manufacturer) = payload?;
    let manufacturer = state
        .engine
        .update_manufacturer(&actor, id, manufacturer)
        .await?;
    Ok(Json(manufacturer))
}

pub(super) async fn delete_manufacturer(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<ManufacturerId>,
) -> ApiResult<StatusCode> {
    state.engine.delete_manufacturer(&actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
