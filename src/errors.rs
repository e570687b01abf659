use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use std::env::VarError;
use tera::Context;
use thiserror::Error;

use crate::TEMPLATES;

/// Failures of a single call against the remote budget API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced an HTTP response.
    #[error("{0}")]
    Transport(String),

    /// The API answered with a non-success status.
    #[error("{message}")]
    Status {
        status: u16,
        body: String,
        message: String,
    },

    #[error("Unexpected response from the budget service: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }
}

/// Client-side validation failure. Never reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", .messages.join(" "))]
pub struct ValidationError {
    pub messages: Vec<String>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
        }
    }

    pub fn from_messages(messages: Vec<String>) -> Result<(), Self> {
        if messages.is_empty() {
            Ok(())
        } else {
            Err(Self { messages })
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Template error: {0}")]
    TemplateError(#[from] tera::Error),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Redirecting to {0}")]
    Redirect(String),

    #[error("Not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    EnvVarError(#[from] VarError),
}

impl AppError {
    pub fn redirect(path: impl Into<String>) -> Self {
        AppError::Redirect(path.into())
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Redirect(_) => StatusCode::SEE_OTHER,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Api(ApiError::Status { status, .. }) => match *status {
                401 => StatusCode::UNAUTHORIZED,
                403 => StatusCode::FORBIDDEN,
                404 => StatusCode::NOT_FOUND,
                400 | 409 | 422 => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::BAD_GATEWAY,
            },
            AppError::Api(_) => StatusCode::BAD_GATEWAY,
            AppError::DatabaseError(_)
            | AppError::MigrationError(_)
            | AppError::TemplateError(_)
            | AppError::SessionError(_)
            | AppError::SerializationError(_)
            | AppError::ConfigError(_)
            | AppError::IoError(_)
            | AppError::EnvVarError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let AppError::Redirect(location) = self {
            return HttpResponse::SeeOther()
                .append_header(("Location", location.as_str()))
                .finish();
        }

        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{}", self);
        } else {
            log::warn!("{}", self);
        }

        let mut context = Context::new();
        context.insert("title", "Something went wrong");
        context.insert("user", &Option::<()>::None);
        context.insert("version", env!("CARGO_PKG_VERSION"));
        context.insert("error", &Option::<String>::None);
        context.insert("errors", &Vec::<String>::new());
        context.insert("notice", &Option::<String>::None);
        context.insert("status", &status.as_u16());
        context.insert("message", &self.to_string());

        match TEMPLATES.render("error.html", &context) {
            Ok(rendered) => HttpResponse::build(status)
                .content_type("text/html; charset=utf-8")
                .body(rendered),
            Err(e) => {
                log::error!("Failed to render error page: {}", e);
                HttpResponse::build(status).body(self.to_string())
            }
        }
    }
}

impl From<AppError> for std::io::Error {
    fn from(err: AppError) -> Self {
        std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_becomes_see_other_with_location() {
        let resp = AppError::redirect("/login").error_response();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers().get("Location").unwrap(), "/login");
    }

    #[test]
    fn remote_status_maps_to_portal_status() {
        let err = AppError::Api(ApiError::Status {
            status: 404,
            body: String::new(),
            message: "Request not found".into(),
        });
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err = AppError::Api(ApiError::Transport("connection refused".into()));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn validation_messages_join() {
        let err = ValidationError::from_messages(vec!["A.".into(), "B.".into()]).unwrap_err();
        assert_eq!(err.to_string(), "A. B.");
        assert!(ValidationError::from_messages(vec![]).is_ok());
    }
}
