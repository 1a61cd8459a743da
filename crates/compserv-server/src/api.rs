//! JSON write surface.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/results` | Body: a full `ComplianceResult`; `201` with the stored row |
//!
//! Store failures map onto statuses: validation `400`, foreign key `409`,
//! missing row `404`, anything else `500`.

use axum::{
  Json, Router,
  extract::{State, rejection::JsonRejection},
  http::StatusCode,
  response::{IntoResponse, Response},
  routing::post,
};
use compserv_core::{
  entity::ComplianceResult, recorder::ResultRecorder, store::ComplianceStore,
};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("{0}")]
  BadRequest(String),

  #[error("{0}")]
  NotFound(String),

  #[error("{0}")]
  Conflict(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::Conflict(_) => StatusCode::CONFLICT,
      ApiError::Store(e) => {
        warn!(error = %e, "store failure");
        StatusCode::INTERNAL_SERVER_ERROR
      }
    };
    (status, Json(json!({ "error": self.to_string() }))).into_response()
  }
}

impl From<compserv_store_sqlite::Error> for ApiError {
  fn from(e: compserv_store_sqlite::Error) -> Self {
    use compserv_store_sqlite::Error;
    match e {
      Error::Validation(_) | Error::Core(compserv_core::Error::Validation(_)) => {
        ApiError::BadRequest(e.to_string())
      }
      Error::ForeignKeyViolation { .. } => ApiError::Conflict(e.to_string()),
      Error::NotFound { .. } => ApiError::NotFound(e.to_string()),
      other => ApiError::Store(Box::new(other)),
    }
  }
}

impl From<JsonRejection> for ApiError {
  fn from(rejection: JsonRejection) -> Self { ApiError::BadRequest(rejection.body_text()) }
}

/// Build the API router around `recorder`.
pub fn router<S>(recorder: ResultRecorder<S>) -> Router
where
  S: ComplianceStore + 'static,
  S::Error: Into<ApiError>,
{
  Router::new()
    .route("/results", post(record::<S>))
    .with_state(recorder)
}

/// `POST /results`
pub async fn record<S>(
  State(recorder): State<ResultRecorder<S>>,
  body: Result<Json<ComplianceResult>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ComplianceStore + 'static,
  S::Error: Into<ApiError>,
{
  let Json(result) = body?;
  let stored = recorder.record(result).await.map_err(Into::into)?;
  Ok((StatusCode::CREATED, Json(stored)))
}
