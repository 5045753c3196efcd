use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use libsonda::prelude::*;
use tracing::instrument;

use crate::api::{AppState, dto::SearchParams, errors::AppError};

#[instrument(skip_all, fields(query = %params.q))]
pub(super) async fn search<F: Fetcher + 'static>(State(state): State<AppState<F>>, Query(params): Query<SearchParams>) -> impl IntoResponse {
  Json(state.sonda.search(&params.q).await)
}

#[instrument(skip_all, fields(id = %id))]
pub(super) async fn detail<F: Fetcher + 'static>(State(state): State<AppState<F>>, Path(id): Path<String>) -> Result<impl IntoResponse, AppError> {
  Ok(Json(state.sonda.detail(&id).await?))
}

#[instrument(skip_all, fields(id = %id))]
pub(super) async fn attributes<F: Fetcher + 'static>(State(state): State<AppState<F>>, Path(id): Path<String>) -> Result<impl IntoResponse, AppError> {
  Ok(Json(state.sonda.resolve_attributes(&id).await?))
}

pub(super) async fn healthz() -> StatusCode {
  StatusCode::OK
}

pub(super) async fn prometheus<F: Fetcher + 'static>(State(state): State<AppState<F>>) -> Result<impl IntoResponse, AppError> {
  match &state.prometheus {
    Some(handle) => Ok(handle.render()),
    None => Err(AppError::ResourceNotFound),
  }
}

pub(super) async fn not_found() -> impl IntoResponse {
  AppError::ResourceNotFound
}
