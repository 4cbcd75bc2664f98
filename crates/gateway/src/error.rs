use {
    axum::{
        http::StatusCode,
        response::{IntoResponse, Json, Response},
    },
    thiserror::Error,
};

use torbo_providers::ProviderError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not authenticated")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("not found")]
    NotFound,

    #[error("server is at capacity")]
    Overloaded,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": msg }),
            ),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "error": "not authenticated" }),
            ),
            Self::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                serde_json::json!({ "error": msg }),
            ),
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": "not found" }),
            ),
            Self::Overloaded => (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({ "error": "server is at capacity, try again shortly" }),
            ),
            Self::Provider(err) => (
                StatusCode::BAD_GATEWAY,
                serde_json::json!({
                    "error": err.to_string(),
                    "provider": err.provider(),
                    "retryable": err.retryable(),
                }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, axum::http::StatusCode};

    #[test]
    fn provider_errors_map_to_502() {
        let err = ApiError::Provider(ProviderError::Status {
            provider: "openai",
            status: 500,
            body: "boom".into(),
        });
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn forbidden_maps_to_403() {
        let resp = ApiError::Forbidden("access denied".into()).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
