use rocket::serde::json::{json, Json, Value};
use rocket::{Route, State};
use serde::{Deserialize, Serialize};

use crate::auth::{BearerToken, TokenService};
use crate::db::Db;
use crate::guard::OwnershipGuard;
use crate::types::{ApiError, ApiResult};

pub mod aggregate;
pub mod models;
pub mod query;
pub mod service;

use self::aggregate::ArticleResponse;
use self::query::{ListFilter, Page};
use self::service::{ArticleChanges, ArticleDetails, ArticleList};

#[derive(Debug, Deserialize)]
pub struct CreateArticle {
    pub article: ArticleDetails,
}

#[derive(Debug, Deserialize)]
pub struct UpdateArticle {
    pub article: ArticleChanges,
}

#[derive(Debug, Serialize)]
pub struct ArticleContainer {
    pub article: ArticleResponse,
}

#[derive(Debug, Serialize)]
pub struct TagList {
    pub tags: Vec<String>,
}

#[get("/articles?<tag>&<author>&<favorited>&<limit>&<offset>")]
#[allow(clippy::too_many_arguments)]
pub async fn list(
    db: Db,
    tokens: &State<TokenService>,
    token: Option<BearerToken>,
    tag: Option<String>,
    author: Option<String>,
    favorited: Option<String>,
    limit: Option<&str>,
    offset: Option<&str>,
) -> ApiResult<ArticleList> {
    let tokens = tokens.inner().clone();
    let filter = ListFilter::new(tag, author, favorited);
    let page = Page::parse(limit, offset);
    let list = db
        .run(move |conn| {
            let viewer = OwnershipGuard::new(&tokens).resolve_viewer(conn, token.as_ref());
            service::list_articles(conn, &filter, page, viewer.as_ref())
        })
        .await?;
    Ok(Json(list))
}

#[get("/articles/feed?<limit>&<offset>")]
pub async fn feed(
    db: Db,
    tokens: &State<TokenService>,
    token: Result<BearerToken, ApiError>,
    limit: Option<&str>,
    offset: Option<&str>,
) -> ApiResult<ArticleList> {
    let tokens = tokens.inner().clone();
    let page = Page::parse(limit, offset);
    let list = db
        .run(move |conn| {
            let caller = OwnershipGuard::new(&tokens).require(conn, token)?;
            service::feed_articles(conn, page, &caller)
        })
        .await?;
    Ok(Json(list))
}

#[get("/articles/<slug>")]
pub async fn get(
    db: Db,
    tokens: &State<TokenService>,
    token: Option<BearerToken>,
    slug: String,
) -> ApiResult<ArticleContainer> {
    let tokens = tokens.inner().clone();
    let article = db
        .run(move |conn| {
            let viewer = OwnershipGuard::new(&tokens).resolve_viewer(conn, token.as_ref());
            service::get_article(conn, &slug, viewer.as_ref())
        })
        .await?;
    Ok(Json(ArticleContainer { article }))
}

#[post("/articles", format = "json", data = "<create>")]
pub async fn create(
    db: Db,
    tokens: &State<TokenService>,
    token: Result<BearerToken, ApiError>,
    create: Json<CreateArticle>,
) -> ApiResult<ArticleContainer> {
    let tokens = tokens.inner().clone();
    let details = create.into_inner().article;
    let article = db
        .run(move |conn| {
            let caller = OwnershipGuard::new(&tokens).require(conn, token)?;
            service::create_article(conn, &caller, details)
        })
        .await?;
    Ok(Json(ArticleContainer { article }))
}

#[put("/articles/<slug>", format = "json", data = "<update>")]
pub async fn update(
    db: Db,
    tokens: &State<TokenService>,
    token: Result<BearerToken, ApiError>,
    slug: String,
    update: Json<UpdateArticle>,
) -> ApiResult<ArticleContainer> {
    let tokens = tokens.inner().clone();
    let changes = update.into_inner().article;
    let article = db
        .run(move |conn| {
            let caller = OwnershipGuard::new(&tokens).require(conn, token)?;
            service::update_article(conn, &slug, &caller, changes)
        })
        .await?;
    Ok(Json(ArticleContainer { article }))
}

#[delete("/articles/<slug>")]
pub async fn delete(
    db: Db,
    tokens: &State<TokenService>,
    token: Result<BearerToken, ApiError>,
    slug: String,
) -> ApiResult<Value> {
    let tokens = tokens.inner().clone();
    db.run(move |conn| {
        let caller = OwnershipGuard::new(&tokens).require(conn, token)?;
        service::delete_article(conn, &slug, &caller)
    })
    .await?;
    Ok(Json(json!({})))
}

#[post("/articles/<slug>/favorite")]
pub async fn favorite(
    db: Db,
    tokens: &State<TokenService>,
    token: Result<BearerToken, ApiError>,
    slug: String,
) -> ApiResult<ArticleContainer> {
    let tokens = tokens.inner().clone();
    let article = db
        .run(move |conn| {
            let caller = OwnershipGuard::new(&tokens).require(conn, token)?;
            service::favorite_article(conn, &slug, &caller)
        })
        .await?;
    Ok(Json(ArticleContainer { article }))
}

#[delete("/articles/<slug>/favorite")]
pub async fn unfavorite(
    db: Db,
    tokens: &State<TokenService>,
    token: Result<BearerToken, ApiError>,
    slug: String,
) -> ApiResult<ArticleContainer> {
    let tokens = tokens.inner().clone();
    let article = db
        .run(move |conn| {
            let caller = OwnershipGuard::new(&tokens).require(conn, token)?;
            service::unfavorite_article(conn, &slug, &caller)
        })
        .await?;
    Ok(Json(ArticleContainer { article }))
}

#[get("/tags")]
pub async fn tags(db: Db) -> ApiResult<TagList> {
    let tags = db.run(query::all_tags).await?;
    Ok(Json(TagList { tags }))
}

pub fn routes() -> Vec<Route> {
    routes![list, feed, get, create, update, delete, favorite, unfavorite, tags]
}
