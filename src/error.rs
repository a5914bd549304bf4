//! 统一的 HTTP 错误类型：各组件错误到状态码的唯一映射点。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use crate::content_type::ContentTypeError;
use crate::listing::ListingError;
use crate::storage::StorageError;
use crate::upload::UploadError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidPath => ApiError::BadRequest(error.to_string()),
            StorageError::NotRegular(_) | StorageError::Io(_) => {
                error!(error = %error, "filesystem error");
                ApiError::Internal(error.to_string())
            }
        }
    }
}

impl From<ListingError> for ApiError {
    fn from(error: ListingError) -> Self {
        error!(error = %error, "listing template failed");
        ApiError::Internal(error.to_string())
    }
}

impl From<ContentTypeError> for ApiError {
    fn from(error: ContentTypeError) -> Self {
        error!(error = %error, "content type detection failed");
        ApiError::Internal(error.to_string())
    }
}

impl From<UploadError> for ApiError {
    fn from(error: UploadError) -> Self {
        match error {
            UploadError::BadRequest(_) => {
                warn!(error = %error, "upload rejected");
                ApiError::BadRequest(error.to_string())
            }
            UploadError::ClientDisconnected(_) => {
                warn!(error = %error, "upload interrupted by client");
                ApiError::BadRequest(error.to_string())
            }
            UploadError::NotFound(msg) => ApiError::NotFound(msg),
            UploadError::Io(_) => {
                error!(error = %error, "upload failed");
                ApiError::Internal(error.to_string())
            }
        }
    }
}
