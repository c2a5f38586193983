//! API错误响应

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use bfit_core::BfitError;
use serde_json::json;
use tracing::error;

/// HTTP层错误包装
///
/// 作业查询接口对未知作业id返回500而非404，既有客户端依赖
/// 这一行为区分"记录不存在"与"队列侧作业丢失"。
pub struct ApiError(pub BfitError);

impl From<BfitError> for ApiError {
    fn from(err: BfitError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            BfitError::Validation(msg) | BfitError::UnsupportedModality(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            BfitError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            BfitError::Permission(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            other => {
                error!("Internal error: {}", other);
                (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        };

        let body = Json(json!({
            "error": true,
            "message": message,
            "status": status.as_u16()
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (BfitError::Validation("v".to_string()), StatusCode::BAD_REQUEST),
            (BfitError::NotFound("n".to_string()), StatusCode::NOT_FOUND),
            (BfitError::Permission("p".to_string()), StatusCode::FORBIDDEN),
            (
                BfitError::NoSuchJob("j".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                BfitError::Database("d".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }
}
