use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;

use super::types::ErrorResponse;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// API错误类型
///
/// 客户端只会看到固定的错误信息，具体原因写入日志
pub struct AppError {
    status: StatusCode,
    message: &'static str,
    source: Option<anyhow::Error>,
}

impl AppError {
    pub fn internal(message: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message, source: Some(source.into()) }
    }

    pub fn bad_request(message: &'static str) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message, source: None }
    }

    pub fn unauthorized() -> Self {
        Self { status: StatusCode::UNAUTHORIZED, message: "Unauthorized", source: None }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(source) = &self.source {
            error!("{}: {source:#}", self.message);
        }
        (self.status, Json(ErrorResponse { error: self.message.to_string() })).into_response()
    }
}

/// 为错误附加返回给客户端的信息
pub trait ResultExt<T> {
    fn or_fail(self, message: &'static str) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn or_fail(self, message: &'static str) -> Result<T> {
        self.map_err(|e| AppError::internal(message, e))
    }
}
