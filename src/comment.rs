use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel::{delete as diesel_delete, insert_into};
use rocket::serde::json::{json, Json, Value};
use rocket::{Route, State};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::article::models::Article;
use crate::auth::{BearerToken, TokenService};
use crate::db::schema::{comments, users};
use crate::db::Db;
use crate::guard::OwnershipGuard;
use crate::profile::{followed_by_viewer, Profile};
use crate::types::{ApiError, ApiResult};
use crate::users::models::User;
use crate::utils::serialize_date;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Associations)]
#[diesel(belongs_to(Article))]
#[diesel(table_name = comments)]
pub struct Comment {
    pub id: i32,
    pub author_id: i32,
    pub article_id: i32,
    pub body: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = comments)]
pub struct NewComment {
    pub author_id: i32,
    pub article_id: i32,
    pub body: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentResponse {
    pub id: i32,
    #[serde(serialize_with = "serialize_date")]
    pub created_at: NaiveDateTime,
    #[serde(serialize_with = "serialize_date")]
    pub updated_at: NaiveDateTime,
    pub body: String,
    pub author: Profile,
}

impl CommentResponse {
    fn new(comment: Comment, author: Profile) -> CommentResponse {
        CommentResponse {
            id: comment.id,
            created_at: comment.created_at,
            updated_at: comment.updated_at,
            body: comment.body,
            author,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CommentBody {
    pub body: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CommentContainer<T> {
    pub comment: T,
}

#[derive(Debug, Serialize)]
pub struct CommentsContainer<T> {
    pub comments: T,
}

pub fn add_comment(
    connection: &mut SqliteConnection,
    slug: &str,
    caller: &User,
    body: String,
) -> Result<CommentResponse, ApiError> {
    if body.trim().is_empty() {
        return Err(ApiError::validation("body", "can't be blank"));
    }
    let article = Article::load_by_slug(slug, connection)?;
    let now = Utc::now().naive_utc();
    let new_comment = NewComment {
        author_id: caller.id,
        article_id: article.id,
        body,
        created_at: now,
        updated_at: now,
    };

    let comment = insert_into(comments::table)
        .values(&new_comment)
        .returning(Comment::as_returning())
        .get_result(connection)?;
    info!(slug = %slug, id = comment.id, author = %caller.username, "comment added");
    Ok(CommentResponse::new(comment, caller.profile(false)))
}

/// Comments of an article, oldest first.
pub fn list_comments(
    connection: &mut SqliteConnection,
    slug: &str,
    viewer: Option<&User>,
) -> Result<Vec<CommentResponse>, ApiError> {
    let article = Article::load_by_slug(slug, connection)?;
    let data = Comment::belonging_to(&article)
        .inner_join(users::table)
        .order((comments::created_at.asc(), comments::id.asc()))
        .select((Comment::as_select(), User::as_select()))
        .load::<(Comment, User)>(connection)?;

    let authors = data.iter().map(|(_, author)| author.id).collect::<Vec<_>>();
    let follows = followed_by_viewer(connection, viewer, &authors);
    Ok(data
        .into_iter()
        .map(|(comment, author)| {
            let following = follows.contains(&author.id);
            CommentResponse::new(comment, author.profile(following))
        })
        .collect())
}

/// Removing a comment that is already gone succeeds. A comment that exists
/// under another article is reported as missing.
pub fn delete_comment(
    connection: &mut SqliteConnection,
    slug: &str,
    id: i32,
    caller: &User,
) -> Result<(), ApiError> {
    let article = Article::load_by_slug(slug, connection)?;
    let comment = match comments::table
        .find(id)
        .select(Comment::as_select())
        .first(connection)
    {
        Ok(comment) => comment,
        Err(DieselError::NotFound) => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if comment.article_id != article.id {
        return Err(ApiError::not_found(
            "comment",
            format!("no comment {} on article {}", id, slug),
        ));
    }
    OwnershipGuard::authorize_comment_deletion(&comment, caller)?;
    diesel_delete(&comment).execute(connection)?;
    info!(slug = %slug, id, "comment deleted");
    Ok(())
}

#[post("/articles/<slug>/comments", format = "json", data = "<details>")]
pub async fn add(
    db: Db,
    tokens: &State<TokenService>,
    token: Result<BearerToken, ApiError>,
    slug: String,
    details: Json<CommentContainer<CommentBody>>,
) -> ApiResult<CommentContainer<CommentResponse>> {
    let tokens = tokens.inner().clone();
    let body = details.into_inner().comment.body;
    let comment = db
        .run(move |conn| {
            let caller = OwnershipGuard::new(&tokens).require(conn, token)?;
            add_comment(conn, &slug, &caller, body)
        })
        .await?;
    Ok(Json(CommentContainer { comment }))
}

#[get("/articles/<slug>/comments")]
pub async fn list(
    db: Db,
    tokens: &State<TokenService>,
    token: Option<BearerToken>,
    slug: String,
) -> ApiResult<CommentsContainer<Vec<CommentResponse>>> {
    let tokens = tokens.inner().clone();
    let comments = db
        .run(move |conn| {
            let viewer = OwnershipGuard::new(&tokens).resolve_viewer(conn, token.as_ref());
            list_comments(conn, &slug, viewer.as_ref())
        })
        .await?;
    Ok(Json(CommentsContainer { comments }))
}

#[delete("/articles/<slug>/comments/<id>")]
pub async fn delete(
    db: Db,
    tokens: &State<TokenService>,
    token: Result<BearerToken, ApiError>,
    slug: String,
    id: i32,
) -> ApiResult<Value> {
    let tokens = tokens.inner().clone();
    db.run(move |conn| {
        let caller = OwnershipGuard::new(&tokens).require(conn, token)?;
        delete_comment(conn, &slug, id, &caller)
    })
    .await?;
    Ok(Json(json!({})))
}

pub fn routes() -> Vec<Route> {
    routes![add, list, delete]
}
