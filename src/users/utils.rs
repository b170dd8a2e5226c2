use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::select;
use lazy_static::lazy_static;
use regex::Regex;

use crate::types::{ApiError, ValidationError};

lazy_static! {
    static ref EMAIL_RE: Regex = {
        let pattern = r"\A[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\z";
        Regex::new(pattern).unwrap()
    };
}

pub fn validate_email_re(email: &str) -> Result<(), ValidationError> {
    if !EMAIL_RE.is_match(email) {
        Err(ValidationError::from(
            "email",
            format!("Invalid email: {}", email),
        ))
    } else {
        Ok(())
    }
}

pub fn validate_username_re(username: &str) -> Result<(), ValidationError> {
    if username.trim().chars().count() < 3 {
        Err(ValidationError::from(
            "username",
            format!("username too short: {}", username),
        ))
    } else {
        Ok(())
    }
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.len() < 5 {
        Err(ValidationError::from("password", "Password too short"))
    } else {
        Ok(())
    }
}

/// Checks the format and that no other account uses the address. `except`
/// is the id of the account being edited, if any.
pub fn validate_email(
    email_to_validate: &str,
    except: Option<i32>,
    connection: &mut SqliteConnection,
) -> Result<(), ApiError> {
    use crate::db::schema::users::dsl::*;
    let mut errors = ValidationError::default();
    if let Err(e) = validate_email_re(email_to_validate) {
        errors.merge(e);
    }

    let taken = users
        .filter(email.eq(email_to_validate))
        .filter(id.ne(except.unwrap_or(0)));
    if select(exists(taken)).get_result::<bool>(connection)? {
        errors.add_error("email", "Email already exists");
    }
    errors.or(()).map_err(ApiError::from)
}

pub fn validate_username(
    username_to_validate: &str,
    except: Option<i32>,
    connection: &mut SqliteConnection,
) -> Result<(), ApiError> {
    use crate::db::schema::users::dsl::*;
    let mut errors = ValidationError::default();
    if let Err(e) = validate_username_re(username_to_validate) {
        errors.merge(e);
    }

    let taken = users
        .filter(username.eq(username_to_validate))
        .filter(id.ne(except.unwrap_or(0)));
    if select(exists(taken)).get_result::<bool>(connection)? {
        errors.add_error("username", "Username already exists");
    }
    errors.or(()).map_err(ApiError::from)
}

/// Runs a check and folds its validation messages into `errors`; any other
/// failure is returned.
pub fn collect(errors: &mut ValidationError, check: Result<(), ApiError>) -> Result<(), ApiError> {
    match check {
        Ok(()) => Ok(()),
        Err(ApiError::Validation(e)) => {
            errors.merge(e);
            Ok(())
        }
        Err(other) => Err(other),
    }
}
