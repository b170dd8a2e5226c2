use diesel::insert_into;
use diesel::prelude::*;
use diesel::update as diesel_update;
use rocket::serde::json::Json;
use rocket::{Route, State};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{BearerToken, TokenService};
use crate::db::schema::users;
use crate::db::Db;
use crate::guard::OwnershipGuard;
use crate::types::{ApiError, ApiResult, Validate, ValidationError};

pub mod models;
mod utils;

use self::models::{NewUser, User, UserView};
use self::utils::*;

#[derive(Debug, Deserialize)]
pub struct RegistrationDetails {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct Registration {
    pub user: RegistrationDetails,
}

impl Validate for RegistrationDetails {
    type Error = ApiError;
    fn validate(self, connection: &mut SqliteConnection) -> Result<Self, Self::Error> {
        let mut errors = ValidationError::default();

        collect(&mut errors, validate_email(&self.email, None, connection))?;
        collect(&mut errors, validate_username(&self.username, None, connection))?;
        if let Err(e) = validate_password(&self.password) {
            errors.merge(e);
        }

        Ok(errors.or(self)?)
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginDetails {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct Login {
    pub user: LoginDetails,
}

/// Profile edits. Absent fields are left alone.
#[derive(Debug, Default, Deserialize)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub image: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub user: UserChanges,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: UserView,
}

pub fn register_user(
    connection: &mut SqliteConnection,
    tokens: &TokenService,
    details: RegistrationDetails,
) -> Result<UserView, ApiError> {
    let details = details.validate(connection)?;
    let new_user = NewUser {
        username: details.username,
        email: details.email,
        password: User::make_password(&details.password)?,
    };

    let user = insert_into(users::table)
        .values(&new_user)
        .returning(User::as_returning())
        .get_result(connection)
        .map_err(|e| ApiError::conflict(e, "user", "username or email already exists"))?;
    info!(username = %user.username, "user registered");
    Ok(user.view(tokens.issue(&user.email)))
}

pub fn login_user(
    connection: &mut SqliteConnection,
    tokens: &TokenService,
    details: &LoginDetails,
) -> Result<UserView, ApiError> {
    let rejected = || ApiError::unauthenticated("email or password", "is invalid");
    let user = User::load_by_email(&details.email, connection).map_err(|e| match e {
        diesel::result::Error::NotFound => rejected(),
        other => other.into(),
    })?;
    if !user.verify_password(&details.password)? {
        return Err(rejected());
    }
    Ok(user.view(tokens.issue(&user.email)))
}

pub fn update_user(
    connection: &mut SqliteConnection,
    tokens: &TokenService,
    mut user: User,
    changes: UserChanges,
) -> Result<UserView, ApiError> {
    let mut errors = ValidationError::default();

    if let Some(new_email) = changes.email {
        collect(&mut errors, validate_email(&new_email, Some(user.id), connection))?;
        user.email = new_email;
    }

    if let Some(new_username) = changes.username {
        collect(&mut errors, validate_username(&new_username, Some(user.id), connection))?;
        user.username = new_username;
    }

    if let Some(new_password) = changes.password {
        match validate_password(&new_password) {
            Err(e) => errors.merge(e),
            Ok(_) => user.new_password(&new_password)?,
        }
    }

    if let Some(bio) = changes.bio {
        user.bio = bio;
    }

    if let Some(image) = changes.image {
        user.image = Some(image).filter(|image| !image.is_empty());
    }

    if !errors.empty() {
        return Err(errors.into());
    }

    diesel_update(&user)
        .set(&user)
        .execute(connection)
        .map_err(|e| ApiError::conflict(e, "user", "username or email already exists"))?;
    info!(username = %user.username, "user updated");
    Ok(user.view(tokens.issue(&user.email)))
}

#[post("/users", format = "json", data = "<registration>")]
pub async fn register(
    db: Db,
    tokens: &State<TokenService>,
    registration: Json<Registration>,
) -> ApiResult<UserResponse> {
    let tokens = tokens.inner().clone();
    let details = registration.into_inner().user;
    let user = db
        .run(move |conn| register_user(conn, &tokens, details))
        .await?;
    Ok(Json(UserResponse { user }))
}

#[post("/users/login", format = "json", data = "<login>")]
pub async fn login(
    db: Db,
    tokens: &State<TokenService>,
    login: Json<Login>,
) -> ApiResult<UserResponse> {
    let tokens = tokens.inner().clone();
    let details = login.into_inner().user;
    let user = db
        .run(move |conn| login_user(conn, &tokens, &details))
        .await?;
    Ok(Json(UserResponse { user }))
}

#[get("/user")]
pub async fn current(
    db: Db,
    tokens: &State<TokenService>,
    token: Result<BearerToken, ApiError>,
) -> ApiResult<UserResponse> {
    let token = token?;
    let tokens = tokens.inner().clone();
    let user = db
        .run(move |conn| {
            let user = OwnershipGuard::new(&tokens).resolve_caller(conn, &token.0)?;
            Ok(user.view(token.0))
        })
        .await?;
    Ok(Json(UserResponse { user }))
}

#[put("/user", format = "json", data = "<update>")]
pub async fn update(
    db: Db,
    tokens: &State<TokenService>,
    token: Result<BearerToken, ApiError>,
    update: Json<Update>,
) -> ApiResult<UserResponse> {
    let tokens = tokens.inner().clone();
    let changes = update.into_inner().user;
    let user = db
        .run(move |conn| {
            let user = OwnershipGuard::new(&tokens).require(conn, token)?;
            update_user(conn, &tokens, user, changes)
        })
        .await?;
    Ok(Json(UserResponse { user }))
}

pub fn routes() -> Vec<Route> {
    routes![register, login, current, update]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils;

    fn details(username: &str, email: &str, password: &str) -> RegistrationDetails {
        RegistrationDetails {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn registered_user_can_log_in() {
        let mut conn = test_utils::connection();
        let tokens = TokenService::new(b"secret");

        let registered =
            register_user(&mut conn, &tokens, details("jake", "jake@jake.jake", "jakejake")).unwrap();
        assert_eq!(registered.username, "jake");
        assert_eq!(tokens.validate(&registered.token).unwrap().email, "jake@jake.jake");

        let login = LoginDetails {
            email: "jake@jake.jake".to_string(),
            password: "jakejake".to_string(),
        };
        let logged_in = login_user(&mut conn, &tokens, &login).unwrap();
        assert_eq!(logged_in.email, "jake@jake.jake");
    }

    #[test]
    fn wrong_password_is_unauthenticated() {
        let mut conn = test_utils::connection();
        let tokens = TokenService::new(b"secret");
        register_user(&mut conn, &tokens, details("jake", "jake@jake.jake", "jakejake")).unwrap();

        let login = LoginDetails {
            email: "jake@jake.jake".to_string(),
            password: "nope-nope".to_string(),
        };
        match login_user(&mut conn, &tokens, &login) {
            Err(ApiError::Unauthenticated(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn registration_reports_every_invalid_field() {
        let mut conn = test_utils::connection();
        let tokens = TokenService::new(b"secret");
        register_user(&mut conn, &tokens, details("jake", "jake@jake.jake", "jakejake")).unwrap();

        match register_user(&mut conn, &tokens, details("jake", "jake@jake.jake", "123")) {
            Err(ApiError::Validation(errors)) => {
                assert!(errors.get("email").is_some());
                assert!(errors.get("username").is_some());
                assert!(errors.get("password").is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn update_rehashes_password_and_reissues_token() {
        let mut conn = test_utils::connection();
        let tokens = TokenService::new(b"secret");
        register_user(&mut conn, &tokens, details("jake", "jake@jake.jake", "jakejake")).unwrap();
        let user = User::load_by_name("jake", &mut conn).unwrap();

        let changes = UserChanges {
            email: Some("jacob@jake.jake".to_string()),
            password: Some("newpassword".to_string()),
            bio: Some("I work at statefarm".to_string()),
            ..Default::default()
        };
        let view = update_user(&mut conn, &tokens, user, changes).unwrap();
        assert_eq!(view.bio, "I work at statefarm");
        assert_eq!(tokens.validate(&view.token).unwrap().email, "jacob@jake.jake");

        let login = LoginDetails {
            email: "jacob@jake.jake".to_string(),
            password: "newpassword".to_string(),
        };
        assert!(login_user(&mut conn, &tokens, &login).is_ok());
    }

    #[test]
    fn update_rejects_taken_username() {
        let mut conn = test_utils::connection();
        let tokens = TokenService::new(b"secret");
        register_user(&mut conn, &tokens, details("jake", "jake@jake.jake", "jakejake")).unwrap();
        register_user(&mut conn, &tokens, details("anna", "anna@anna.anna", "annaanna")).unwrap();
        let anna = User::load_by_name("anna", &mut conn).unwrap();

        let changes = UserChanges {
            username: Some("jake".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            update_user(&mut conn, &tokens, anna, changes),
            Err(ApiError::Validation(_))
        ));
        assert!(User::load_by_name("anna", &mut conn).is_ok());
    }
}
