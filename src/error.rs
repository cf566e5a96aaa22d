// Copyright 2025 Memophor Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::adapter::AdapterError;

/// One rejected input parameter.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub param: String,
    pub msg: String,
    pub location: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl FieldError {
    pub fn query(param: &str, msg: &str, value: Option<&str>) -> Self {
        Self {
            param: param.to_string(),
            msg: msg.to_string(),
            location: "query",
            value: value.map(str::to_string),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("{0}")]
    NotFound(String),
    #[error("operation not supported: {0}")]
    Unsupported(String),
    #[error("External API error")]
    UpstreamUnreachable(String),
    #[error("Invalid data from API")]
    UpstreamMalformed { preview: String },
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    preview: Option<String>,
}

#[derive(Serialize)]
struct ValidationBody<'a> {
    errors: &'a [FieldError],
}

impl AppError {
    pub fn not_found<T: Into<String>>(message: T) -> Self {
        Self::NotFound(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Unsupported(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::UpstreamUnreachable(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::UpstreamMalformed { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<AdapterError> for AppError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Unsupported(func) => AppError::Unsupported(func),
            AdapterError::Unreachable(source) => AppError::UpstreamUnreachable(source.to_string()),
            AdapterError::Malformed { preview }
            | AdapterError::ShapeMismatch { preview }
            | AdapterError::Rejected { preview, .. } => AppError::UpstreamMalformed { preview },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            AppError::Validation(errors) => {
                return (status, Json(ValidationBody { errors })).into_response();
            }
            AppError::UpstreamUnreachable(detail) => {
                tracing::warn!(%detail, "upstream unreachable");
            }
            AppError::Internal(err) => {
                tracing::error!(error = ?err, "internal error");
            }
            _ => {}
        }

        let preview = match &self {
            AppError::UpstreamMalformed { preview } => Some(preview.clone()),
            _ => None,
        };

        let body = ErrorBody {
            error: self.to_string(),
            preview,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        let field = FieldError::query("region", "Invalid region", None);
        let validation = AppError::Validation(vec![field]);
        assert_eq!(validation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Unsupported("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::not_found("Not found").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::UpstreamUnreachable("refused".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::UpstreamMalformed { preview: String::new() }.status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
