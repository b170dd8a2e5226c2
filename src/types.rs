use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::SqliteConnection;
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder};
use rocket::serde::json::{json, Json};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Error as IoError;
use tracing::{debug, error};

use crate::auth::AuthError;
use crate::utils::try_respond;

pub trait Validate
where
    Self: Sized,
{
    type Error;
    fn validate(self, connection: &mut SqliteConnection) -> Result<Self, Self::Error>;
}

/// Domain error. Every variant except the storage ones carries messages keyed
/// by the field they concern.
#[derive(Debug)]
pub enum ApiError {
    /// Missing, malformed or expired credentials.
    Unauthenticated(ValidationError),
    /// Valid credentials that belong to someone else.
    Unauthorized(ValidationError),
    Forbidden(ValidationError),
    NotFound(ValidationError),
    Validation(ValidationError),
    Diesel(DieselError),
    /// No pooled connection became free in time.
    Unavailable,
    Internal,
}

impl ApiError {
    pub fn unauthenticated<K: Into<String>, V: Into<String>>(key: K, val: V) -> Self {
        ApiError::Unauthenticated(ValidationError::from(key, val))
    }

    pub fn forbidden<K: Into<String>, V: Into<String>>(key: K, val: V) -> Self {
        ApiError::Forbidden(ValidationError::from(key, val))
    }

    pub fn not_found<K: Into<String>, V: Into<String>>(key: K, val: V) -> Self {
        ApiError::NotFound(ValidationError::from(key, val))
    }

    pub fn validation<K: Into<String>, V: Into<String>>(key: K, val: V) -> Self {
        ApiError::Validation(ValidationError::from(key, val))
    }

    /// Turns a diesel `NotFound` into a `NotFound` on `key`, leaving other
    /// store errors untouched.
    pub fn missing<K: Into<String>, V: Into<String>>(err: DieselError, key: K, val: V) -> Self {
        match err {
            DieselError::NotFound => ApiError::not_found(key, val),
            other => ApiError::Diesel(other),
        }
    }

    /// Turns a unique constraint violation into a validation error on `key`.
    pub fn conflict<K: Into<String>, V: Into<String>>(err: DieselError, key: K, val: V) -> Self {
        match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                ApiError::validation(key, val)
            }
            other => ApiError::Diesel(other),
        }
    }

    pub fn status(&self) -> Status {
        match self {
            ApiError::Unauthenticated(_) | ApiError::Unauthorized(_) => Status::Unauthorized,
            ApiError::Forbidden(_) => Status::Forbidden,
            ApiError::NotFound(_) => Status::NotFound,
            ApiError::Validation(_) => Status::UnprocessableEntity,
            ApiError::Diesel(DieselError::NotFound) => Status::NotFound,
            ApiError::Unavailable => Status::ServiceUnavailable,
            ApiError::Diesel(_) | ApiError::Internal => Status::InternalServerError,
        }
    }

    pub fn errors(self) -> ValidationError {
        match self {
            ApiError::Unauthenticated(e)
            | ApiError::Unauthorized(e)
            | ApiError::Forbidden(e)
            | ApiError::NotFound(e)
            | ApiError::Validation(e) => e,
            ApiError::Diesel(DieselError::NotFound) => ValidationError::from("entity", "not found"),
            ApiError::Unavailable => ValidationError::from("server", "busy, try again"),
            ApiError::Diesel(_) | ApiError::Internal => {
                ValidationError::from("server", "internal error")
            }
        }
    }
}

impl From<DieselError> for ApiError {
    fn from(err: DieselError) -> ApiError {
        ApiError::Diesel(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> ApiError {
        ApiError::Validation(err)
    }
}

impl From<IoError> for ApiError {
    fn from(_: IoError) -> ApiError {
        ApiError::Internal
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> ApiError {
        match err {
            AuthError::Unauthenticated(reason) => ApiError::unauthenticated("token", reason),
            AuthError::Unauthorized(reason) => {
                ApiError::Unauthorized(ValidationError::from("token", reason))
            }
        }
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize, Default, PartialEq)]
pub struct ValidationError(HashMap<String, Vec<String>>);

impl ValidationError {
    pub fn add_error<K: Into<String>, V: Into<String>>(&mut self, key: K, val: V) {
        let entry = self.0.entry(key.into()).or_default();
        entry.push(val.into());
    }

    pub fn from<K: Into<String>, V: Into<String>>(key: K, val: V) -> Self {
        let mut error = ValidationError::default();
        error.add_error(key, val);
        error
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn merge(&mut self, other: ValidationError) {
        for (key, errors) in other.0.into_iter() {
            let entry = self.0.entry(key).or_default();
            entry.extend(errors);
        }
    }

    pub fn empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(Vec::as_slice)
    }

    /// `Ok(value)` when nothing was recorded.
    pub fn or<T>(self, value: T) -> Result<T, ValidationError> {
        if self.empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        if status.class().is_server_error() {
            error!(error = ?self, uri = %req.uri(), "request failed");
        } else {
            debug!(error = ?self, uri = %req.uri(), "request rejected");
        }
        let body = json!({ "errors": self.errors() });
        try_respond(req, body, status)
    }
}
