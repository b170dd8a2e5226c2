use crypto::pbkdf2::{pbkdf2_check, pbkdf2_simple};
use diesel::prelude::*;
use serde::Serialize;
use std::io::Result as IoResult;

use crate::db::schema::users;
use crate::profile::Profile;
use crate::types::ApiError;

const PBKDF2_ROUNDS: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, AsChangeset)]
#[diesel(table_name = users, treat_none_as_null = true)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub bio: String,
    pub image: Option<String>,
    pub password: String,
}

impl User {
    pub fn make_password(password: &str) -> IoResult<String> {
        pbkdf2_simple(password, PBKDF2_ROUNDS)
    }

    pub fn new_password(&mut self, password: &str) -> IoResult<()> {
        self.password = pbkdf2_simple(password, PBKDF2_ROUNDS)?;
        Ok(())
    }

    pub fn verify_password(&self, password_to_verify: &str) -> Result<bool, ApiError> {
        let check = pbkdf2_check(password_to_verify, &self.password);
        check.map_err(|_| ApiError::Internal)
    }

    pub fn load_by_email(email_: &str, connection: &mut SqliteConnection) -> QueryResult<User> {
        use crate::db::schema::users::dsl::*;
        users
            .filter(email.eq(email_))
            .select(User::as_select())
            .get_result(connection)
    }

    pub fn load_by_name(name: &str, connection: &mut SqliteConnection) -> QueryResult<User> {
        use crate::db::schema::users::dsl::*;
        users
            .filter(username.eq(name))
            .select(User::as_select())
            .get_result(connection)
    }

    pub fn load_by_id(user_id: i32, connection: &mut SqliteConnection) -> QueryResult<User> {
        users::table
            .find(user_id)
            .select(User::as_select())
            .get_result(connection)
    }

    pub fn profile(&self, following: bool) -> Profile {
        Profile {
            username: self.username.clone(),
            bio: self.bio.clone(),
            image: self.image.clone(),
            following,
        }
    }

    pub fn view(&self, token: String) -> UserView {
        UserView {
            username: self.username.clone(),
            email: self.email.clone(),
            bio: self.bio.clone(),
            image: self.image.clone(),
            token,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// The authenticated user as returned to its owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserView {
    pub username: String,
    pub email: String,
    pub bio: String,
    pub image: Option<String>,
    pub token: String,
}
