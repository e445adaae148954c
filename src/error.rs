use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};

use crate::password::PasswordError;
use crate::quote::QuoteError;
use crate::repo::RepoError;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<Vec<String>>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    /// One entry per violated rule.
    #[error("invalid data: {}", .0.join(", "))]
    Validation(Vec<String>),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Reference(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("insufficient permissions")]
    Forbidden,
    #[error("{0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Reference(_) => "invalid_reference",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden => "forbidden",
            ApiError::Unavailable(_) => "service_unavailable",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

/// Internal detail is only echoed back when `APP_ENV=development`.
fn exposes_internal_detail() -> bool {
    std::env::var("APP_ENV").map(|v| v.eq_ignore_ascii_case("development")).unwrap_or(false)
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            RepoError::Conflict(msg) => ApiError::Conflict(msg),
            RepoError::Reference(msg) => ApiError::Reference(msg),
            RepoError::Unavailable(msg) => ApiError::Unavailable(msg),
            RepoError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<QuoteError> for ApiError {
    fn from(e: QuoteError) -> Self {
        match e {
            QuoteError::Invalid(rules) => ApiError::Validation(rules),
            QuoteError::Repo(r) => r.into(),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::Validation(crate::models::validation_messages(&errors))
    }
}

impl From<PasswordError> for ApiError {
    fn from(e: PasswordError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) | ApiError::Reference(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (message, details) = match self {
            ApiError::Validation(rules) => (self.to_string(), Some(rules.clone())),
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "internal error");
                if exposes_internal_detail() {
                    (self.to_string(), None)
                } else {
                    ("internal server error".to_string(), None)
                }
            }
            ApiError::Unavailable(detail) => {
                tracing::warn!(error = %detail, "storage unavailable");
                ("storage temporarily unavailable".to_string(), None)
            }
            _ => (self.to_string(), None),
        };
        HttpResponse::build(self.status_code()).json(ApiErrorBody {
            error: self.kind().to_string(),
            message,
            details,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError::Validation(vec![]).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Reference("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Conflict("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(ApiError::Unauthorized("x".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::Unavailable("x".into()).status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn repo_errors_keep_their_kind() {
        assert!(matches!(ApiError::from(RepoError::NotFound("quote")), ApiError::NotFound(m) if m == "quote not found"));
        assert!(matches!(ApiError::from(RepoError::Conflict("dup".into())), ApiError::Conflict(_)));
        assert!(matches!(ApiError::from(RepoError::Reference("fk".into())), ApiError::Reference(_)));
    }

    #[actix_web::test]
    async fn validation_body_lists_rules() {
        let resp = ApiError::Validation(vec!["a".into(), "b".into()]).error_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ApiErrorBody = serde_json::from_slice(&to_bytes(resp.into_body()).await.unwrap()).unwrap();
        assert_eq!(body.error, "validation_error");
        assert_eq!(body.details.unwrap(), vec!["a", "b"]);
    }

    #[actix_web::test]
    async fn internal_detail_hidden_by_default() {
        std::env::remove_var("APP_ENV");
        let resp = ApiError::Internal("password=hunter2".into()).error_response();
        let body: ApiErrorBody = serde_json::from_slice(&to_bytes(resp.into_body()).await.unwrap()).unwrap();
        assert_eq!(body.message, "internal server error");
    }
}
