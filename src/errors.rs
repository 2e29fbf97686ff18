use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::manager::{
    chat_manager, login_manager, property_manager, session_manager, DbError, FieldError,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No valid session cookie
    #[error("Not authenticated")]
    Unauthenticated,

    /// Authenticated but not allowed
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("{resource} with ID {id} not found")]
    NotFound { resource: &'static str, id: String },

    /// Input failed field validation
    #[error("Validation failed")]
    Validation { errors: Vec<FieldError> },

    #[error("{message}")]
    BadRequest { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn forbidden(message: impl Into<String>) -> Self {
        Error::Forbidden {
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest {
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show a client
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated => "Authentication required".to_string(),
            Error::Forbidden { message } => message.clone(),
            Error::NotFound { .. } | Error::BadRequest { .. } => self.to_string(),
            Error::Validation { .. } => "The submitted data is invalid".to_string(),
            Error::Conflict { message } => message.clone(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { .. } => "Resource already exists".to_string(),
                DbError::ForeignKeyViolation { .. } => {
                    "Invalid reference to related resource".to_string()
                }
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Database(DbError::Other(_)) | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) | Error::Conflict { .. } => {
                tracing::warn!("Constraint error: {}", self);
            }
            Error::Unauthenticated | Error::Forbidden { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::NotFound { .. } | Error::Validation { .. } | Error::BadRequest { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = match &self {
            Error::Validation { errors } => json!({
                "message": self.user_message(),
                "errors": errors,
            }),
            _ => json!({ "message": self.user_message() }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<login_manager::Error> for Error {
    fn from(err: login_manager::Error) -> Self {
        use login_manager::Error as E;
        let field = |field: &'static str, message: &str| FieldError {
            field,
            message: message.to_owned(),
        };
        match err {
            E::WrongCredentials => Error::Unauthenticated,
            E::EmailTaken => Error::Validation {
                errors: vec![field("email", "Email is already registered")],
            },
            E::PasswordMismatch => Error::Validation {
                errors: vec![field("confirm_password", "Passwords do not match")],
            },
            E::EmailTakenAndPasswordMismatch => Error::Validation {
                errors: vec![
                    field("email", "Email is already registered"),
                    field("confirm_password", "Passwords do not match"),
                ],
            },
            E::Invalid(errors) => Error::Validation { errors },
            E::Hashing(message) => Error::Other(anyhow::anyhow!(message)),
            E::DatabaseError(e) => Error::Database(e),
        }
    }
}

impl From<session_manager::Error> for Error {
    fn from(err: session_manager::Error) -> Self {
        match err {
            session_manager::Error::DoesNotExist => Error::Unauthenticated,
            session_manager::Error::DatabaseError(e) => Error::Database(e),
        }
    }
}

impl From<property_manager::Error> for Error {
    fn from(err: property_manager::Error) -> Self {
        use property_manager::Error as E;
        match err {
            E::NotFound(id) => Error::NotFound {
                resource: "Property",
                id: id.to_string(),
            },
            E::Forbidden => Error::forbidden("Only the owner or an admin can manage this listing"),
            E::Invalid(errors) => Error::Validation { errors },
            E::Transition(t) => Error::Conflict {
                message: t.to_string(),
            },
            E::DatabaseError(e) => Error::Database(e),
        }
    }
}

impl From<chat_manager::Error> for Error {
    fn from(err: chat_manager::Error) -> Self {
        use chat_manager::Error as E;
        match err {
            E::NotFound(id) => Error::NotFound {
                resource: "Chat room",
                id: id.to_string(),
            },
            E::NotParticipant => Error::forbidden("Not a participant of this chat room"),
            E::OwnListing | E::ListingNotApproved => Error::bad_request(err.to_string()),
            E::Invalid(errors) => Error::Validation { errors },
            E::DatabaseError(e) => Error::Database(e),
        }
    }
}
