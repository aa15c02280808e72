//! HTTP rendering of domain errors
//!
//! Every handler returns `Result<_, Error>`; this conversion turns the error
//! into the documented JSON envelope with the status code from
//! [`ToHttpStatus`].

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::{ApiError, Error, ToHttpStatus};

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "Request failed");
        } else {
            tracing::debug!(error = %self, code = self.error_code(), "Request rejected");
        }

        let body: ApiError = self.into();
        (status, Json(body)).into_response()
    }
}
