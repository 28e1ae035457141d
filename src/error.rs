use actix_web::{
    http::{header, StatusCode},
    HttpResponse, ResponseError,
};
use log::error;
use thiserror::Error;

/// Everything a handler can fail with. Recoverable variants render a page or
/// redirect; storage-level variants surface as a 500 with no partial commit.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("that username is already taken")]
    DuplicateLogin,

    #[error("wrong username or password")]
    InvalidCredentials,

    #[error("not found")]
    NotFound,

    #[error("you do not own this")]
    Forbidden,

    #[error("login required")]
    Unauthenticated,

    #[error("unsupported or corrupt media file")]
    UnsupportedMedia,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("password hashing failed")]
    Hash,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::UnsupportedMedia => StatusCode::BAD_REQUEST,
            AppError::DuplicateLogin => StatusCode::CONFLICT,
            AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Unauthenticated => StatusCode::FOUND,
            AppError::Database(_) | AppError::Io(_) | AppError::Hash => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            // A missing or expired session is not an error page, it is a
            // trip back to the login form.
            AppError::Unauthenticated => HttpResponse::Found()
                .append_header((header::LOCATION, "/login"))
                .finish(),
            AppError::Database(e) => {
                error!("database error: {e:?}");
                internal_error_page()
            }
            AppError::Io(e) => {
                error!("io error: {e:?}");
                internal_error_page()
            }
            AppError::Hash => {
                error!("password hashing failed");
                internal_error_page()
            }
            other => HttpResponse::build(other.status_code())
                .content_type("text/html; charset=utf-8")
                .body(crate::pages::error_page(&other.to_string()).into_string()),
        }
    }
}

fn internal_error_page() -> HttpResponse {
    HttpResponse::InternalServerError()
        .content_type("text/html; charset=utf-8")
        .body(crate::pages::error_page("internal server error").into_string())
}

/// Maps a SQLite UNIQUE violation to the given error, anything else stays a
/// database error.
pub fn on_unique_violation(e: sqlx::Error, unique: AppError) -> AppError {
    if let sqlx::Error::Database(db) = &e {
        if let Some(code) = db.code() {
            // 2067 = SQLITE_CONSTRAINT_UNIQUE, 1555 = primary key flavor
            if code.contains("2067") || code.contains("1555") {
                return unique;
            }
        }
    }
    AppError::Database(e)
}
