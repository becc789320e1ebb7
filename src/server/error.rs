use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::CatalogError;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// 鉴权 token 不匹配
#[derive(thiserror::Error, Debug)]
#[error("鉴权失败")]
pub struct Unauthorized;

/// API错误类型
pub struct AppError(pub anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        if self.0.is::<Unauthorized>() {
            return StatusCode::UNAUTHORIZED;
        }
        match self.0.downcast_ref::<CatalogError>() {
            Some(CatalogError::IndexUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
            Some(CatalogError::MalformedQuery(_)) => StatusCode::BAD_REQUEST,
            Some(CatalogError::NotFound(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let status = |e: CatalogError| AppError::from(e).status();
        assert_eq!(status(CatalogError::IndexUnavailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status(CatalogError::MalformedQuery("!".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(CatalogError::NotFound(1)), StatusCode::NOT_FOUND);
        assert_eq!(
            status(CatalogError::DescriptorUnavailable("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(AppError::from(Unauthorized).status(), StatusCode::UNAUTHORIZED);
    }
}
