use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::{delete, insert_into, select};
use rocket::serde::json::Json;
use rocket::{Route, State};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};

use crate::auth::{BearerToken, TokenService};
use crate::db::Db;
use crate::guard::OwnershipGuard;
use crate::types::{ApiError, ApiResult};
use crate::users::models::User;

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    profile: Profile,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub username: String,
    pub bio: String,
    pub image: Option<String>,
    pub following: bool,
}

/// Whether `follower_id` follows `author_id`.
pub fn is_following(
    connection: &mut SqliteConnection,
    follower_id: i32,
    author_id: i32,
) -> QueryResult<bool> {
    use crate::db::schema::follows::dsl::*;
    select(exists(
        follows
            .filter(followed_by_id.eq(follower_id))
            .filter(following_id.eq(author_id)),
    ))
    .get_result(connection)
}

/// The subset of `author_ids` that `follower_id` follows.
pub fn followed_among(
    connection: &mut SqliteConnection,
    follower_id: i32,
    author_ids: &[i32],
) -> QueryResult<HashSet<i32>> {
    use crate::db::schema::follows::dsl::*;
    if author_ids.is_empty() {
        return Ok(HashSet::new());
    }
    let followed = follows
        .filter(followed_by_id.eq(follower_id))
        .filter(following_id.eq_any(author_ids))
        .select(following_id)
        .load::<i32>(connection)?;
    Ok(followed.into_iter().collect())
}

/// Like `followed_among`, but an anonymous viewer or a failed lookup
/// follows nobody.
pub fn followed_by_viewer(
    connection: &mut SqliteConnection,
    viewer: Option<&User>,
    author_ids: &[i32],
) -> HashSet<i32> {
    match viewer {
        Some(viewer) => followed_among(connection, viewer.id, author_ids).unwrap_or_else(|e| {
            warn!(error = %e, "could not load follows, assuming none");
            HashSet::new()
        }),
        None => HashSet::new(),
    }
}

/// `user`'s profile as seen by `viewer`.
pub fn profile_of(connection: &mut SqliteConnection, user: &User, viewer: Option<&User>) -> Profile {
    let following = match viewer {
        Some(viewer) => is_following(connection, viewer.id, user.id).unwrap_or_else(|e| {
            warn!(error = %e, "could not load follow state, assuming none");
            false
        }),
        None => false,
    };
    user.profile(following)
}

fn load_target(name: &str, connection: &mut SqliteConnection) -> Result<User, ApiError> {
    User::load_by_name(name, connection).map_err(|e| {
        ApiError::missing(
            e,
            "username",
            format!("could not find user with this username: {}", name),
        )
    })
}

pub fn get_profile(
    connection: &mut SqliteConnection,
    name: &str,
    viewer: Option<&User>,
) -> Result<Profile, ApiError> {
    let user = load_target(name, connection)?;
    Ok(profile_of(connection, &user, viewer))
}

pub fn follow_user(
    connection: &mut SqliteConnection,
    current: &User,
    name: &str,
) -> Result<Profile, ApiError> {
    use crate::db::schema::follows::dsl::*;
    let follow = load_target(name, connection)?;
    insert_into(follows)
        .values((following_id.eq(follow.id), followed_by_id.eq(current.id)))
        .on_conflict((following_id, followed_by_id))
        .do_nothing()
        .execute(connection)?;
    info!(follower = %current.username, followed = %follow.username, "followed");
    Ok(follow.profile(true))
}

pub fn unfollow_user(
    connection: &mut SqliteConnection,
    current: &User,
    name: &str,
) -> Result<Profile, ApiError> {
    use crate::db::schema::follows::dsl::*;
    let follow = load_target(name, connection)?;
    delete(
        follows
            .filter(following_id.eq(follow.id))
            .filter(followed_by_id.eq(current.id)),
    )
    .execute(connection)?;
    Ok(follow.profile(false))
}

#[get("/profiles/<name>")]
pub async fn profile(
    db: Db,
    tokens: &State<TokenService>,
    token: Option<BearerToken>,
    name: String,
) -> ApiResult<ProfileResponse> {
    let tokens = tokens.inner().clone();
    let profile = db
        .run(move |conn| {
            let viewer = OwnershipGuard::new(&tokens).resolve_viewer(conn, token.as_ref());
            get_profile(conn, &name, viewer.as_ref())
        })
        .await?;
    Ok(Json(ProfileResponse { profile }))
}

#[post("/profiles/<name>/follow")]
pub async fn follow(
    db: Db,
    tokens: &State<TokenService>,
    token: Result<BearerToken, ApiError>,
    name: String,
) -> ApiResult<ProfileResponse> {
    let tokens = tokens.inner().clone();
    let profile = db
        .run(move |conn| {
            let current = OwnershipGuard::new(&tokens).require(conn, token)?;
            follow_user(conn, &current, &name)
        })
        .await?;
    Ok(Json(ProfileResponse { profile }))
}

#[delete("/profiles/<name>/follow")]
pub async fn unfollow(
    db: Db,
    tokens: &State<TokenService>,
    token: Result<BearerToken, ApiError>,
    name: String,
) -> ApiResult<ProfileResponse> {
    let tokens = tokens.inner().clone();
    let profile = db
        .run(move |conn| {
            let current = OwnershipGuard::new(&tokens).require(conn, token)?;
            unfollow_user(conn, &current, &name)
        })
        .await?;
    Ok(Json(ProfileResponse { profile }))
}

pub fn routes() -> Vec<Route> {
    routes![profile, follow, unfollow]
}
