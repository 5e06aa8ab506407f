use crate::controller::ApiResponse;
use crate::{AppState, Error};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use entity_api::message::{self as MessageApi, MAX_RECENT};
use log::*;
use serde::Deserialize;
use utoipa::IntoParams;

#[derive(Debug, Deserialize, IntoParams)]
pub(crate) struct IndexParams {
    /// How many messages to return, at most 200. Defaults to the maximum.
    limit: Option<u64>,
}

/// GET the most recently persisted messages, newest first
#[utoipa::path(
    get,
    path = "/messages",
    params(IndexParams),
    responses(
        (status = 200, description = "Successfully retrieved recent messages", body = [entity_api::messages::Model]),
        (status = 500, description = "Internal Server Error")
    )
)]
pub async fn index(
    State(app_state): State<AppState>,
    Query(params): Query<IndexParams>,
) -> Result<impl IntoResponse, Error> {
    debug!("GET recent messages with params: {params:?}");

    let limit = params.limit.unwrap_or(MAX_RECENT);
    let messages = MessageApi::find_recent(app_state.db_conn_ref(), limit).await?;

    debug!("Found {} message(s)", messages.len());

    Ok(Json(ApiResponse::new(StatusCode::OK.into(), messages)))
}
