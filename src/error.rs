use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use derive_more::Display;
use serde::Serialize;
use utoipa::ToSchema;

/// Failures that end a request with a non-2xx status.
///
/// Conflicts such as "already processed" are not errors here; handlers answer
/// those with `ApiMessage::failure` and a 200.
#[derive(Debug, Display)]
pub enum AppError {
    #[display(fmt = "{}", _0)]
    Unauthorized(String),
    #[display(fmt = "{}", _0)]
    Forbidden(String),
    #[display(fmt = "{}", _0)]
    Validation(String),
    #[display(fmt = "Database error: {}", _0)]
    Store(sqlx::Error),
    #[display(fmt = "{}", _0)]
    Internal(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::Forbidden(msg.into())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = %err, "Store failure");
        AppError::Store(err)
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ApiMessage::failure(self.to_string()))
    }
}

/// Uniform `{success, message}` body used by every mutation and error.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiMessage {
    #[schema(example = true)]
    pub success: bool,
    #[schema(example = "Leave approved")]
    pub message: String,
    /// Set when a side effect (spreadsheet sync) failed but the change was kept
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl ApiMessage {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            warning: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            warning: None,
        }
    }

    pub fn with_warning(mut self, warning: Option<String>) -> Self {
        self.warning = warning;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn error_body_is_uniform_json() {
        let resp = AppError::validation("since is malformed").error_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(resp.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "since is malformed");
        assert!(json.get("warning").is_none());
    }

    #[test]
    fn store_errors_map_to_500() {
        let err = AppError::from(sqlx::Error::PoolTimedOut);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().starts_with("Database error"));
    }
}
