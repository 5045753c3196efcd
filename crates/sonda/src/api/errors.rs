use std::error::Error;

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use libsonda::prelude::*;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
#[allow(dead_code)]
pub enum AppError {
  #[error("bad request")]
  BadRequest(String),
  #[error("missing resource")]
  ResourceNotFound,
  #[error("server error, please check your logs for more information")]
  ServerError,

  #[error("invalid configuration: {0}")]
  ConfigError(String),

  #[error(transparent)]
  OtherError(#[from] anyhow::Error),
}

impl From<SondaError> for AppError {
  fn from(value: SondaError) -> Self {
    match value {
      SondaError::ConfigError(err) => AppError::ConfigError(err),
      SondaError::InvalidId(id) => AppError::BadRequest(format!("malformed instrument id: {id}")),
      SondaError::UnknownProvider(_) | SondaError::UnknownHandler(_) => AppError::ResourceNotFound,
      SondaError::OtherError(err) => AppError::OtherError(err),
    }
  }
}

impl AppError {
  fn status(&self) -> StatusCode {
    match self {
      AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
      AppError::ResourceNotFound => StatusCode::NOT_FOUND,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  fn message(&self) -> String {
    match self {
      AppError::BadRequest(details) => details.clone(),
      other => other.to_string(),
    }
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    error!(error = self.source(), "{}", self.to_string());

    (self.status(), Json(json!({ "message": self.message() }))).into_response()
  }
}
