use axum::{
    extract::{rejection::JsonRejection, FromRequest},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::store::StoreError;

pub type AppResult<T> = Result<T, AppError>;

/// A single rejected input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or invalid session, a role outside the allowed set, or a
    /// failed credential check.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// A multi-step operation stopped after some of its writes landed.
    #[error("{message}: step `{failed}` failed")]
    PartiallyApplied {
        message: String,
        completed: Vec<&'static str>,
        failed: &'static str,
        cause: anyhow::Error,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn unauthorized() -> Self {
        Self::Unauthorized("Unauthorized".into())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    success: bool,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a [FieldError]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_steps: Option<&'a [&'static str]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_step: Option<&'static str>,
}

impl<'a> ErrorBody<'a> {
    fn message(message: &'a str) -> Self {
        Self {
            success: false,
            message,
            errors: None,
            completed_steps: None,
            failed_step: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, Json(ErrorBody::message(msg))).into_response()
            }
            AppError::NotFound(entity) => {
                let msg = format!("{entity} not found");
                (StatusCode::NOT_FOUND, Json(ErrorBody::message(&msg))).into_response()
            }
            AppError::Validation(errors) => {
                let body = ErrorBody {
                    errors: Some(errors.as_slice()),
                    ..ErrorBody::message("Validation failed")
                };
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(ErrorBody::message(msg))).into_response()
            }
            AppError::Conflict(msg) => {
                (StatusCode::CONFLICT, Json(ErrorBody::message(msg))).into_response()
            }
            AppError::PartiallyApplied {
                message,
                completed,
                failed,
                cause,
            } => {
                error!(error = ?cause, failed_step = *failed, completed = ?completed, "{}", message);
                let body = ErrorBody {
                    completed_steps: Some(completed.as_slice()),
                    failed_step: Some(failed),
                    ..ErrorBody::message(message)
                };
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
            AppError::Internal(e) => {
                error!(error = ?e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorBody::message("Internal server error")),
                )
                    .into_response()
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(entity) => AppError::NotFound(entity),
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            other => AppError::Internal(other.into()),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        warn!(error = %rejection.body_text(), "rejected json body");
        AppError::BadRequest(rejection.body_text())
    }
}

/// `Json` extractor whose rejections render through [`AppError`].
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);
