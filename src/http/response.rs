use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use super::validate::Rejection;
use crate::errors::ErrorKind;
use crate::pipeline::PipelineResponse;

pub fn status_for(response: &PipelineResponse) -> StatusCode {
    match response.error_kind {
        None if response.success => StatusCode::OK,
        Some(ErrorKind::InvalidRequest) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for PipelineResponse {
    fn into_response(self) -> Response {
        (status_for(&self), Json(self)).into_response()
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = match &self {
            Rejection::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Rejection::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({"success": false, "error": self.reason()}))).into_response()
    }
}
