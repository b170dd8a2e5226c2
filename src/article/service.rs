use chrono::Utc;
use diesel::prelude::*;
use diesel::{delete, insert_into, update};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::aggregate::{author_ids, group_rows, to_article_response, ArticleResponse};
use super::models::{insert_tags, replace_tags, slug_from_title, Article, ArticleChangeset, NewArticle};
use super::query::{self, ListFilter, Page};
use crate::db::schema::{articles, comments, favorites, tags};
use crate::guard::OwnershipGuard;
use crate::profile::{followed_by_viewer, profile_of};
use crate::types::{ApiError, Validate, ValidationError};
use crate::users::models::User;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleList {
    pub articles: Vec<ArticleResponse>,
    pub articles_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct ArticleDetails {
    pub title: String,
    pub description: String,
    pub body: String,
    #[serde(default, rename = "tagList")]
    pub tag_list: Vec<String>,
}

impl Validate for ArticleDetails {
    type Error = ValidationError;
    fn validate(self, _connection: &mut SqliteConnection) -> Result<Self, ValidationError> {
        let mut errors = ValidationError::default();
        if self.title.trim().is_empty() {
            errors.add_error("title", "can't be blank");
        }
        if self.description.trim().is_empty() {
            errors.add_error("description", "can't be blank");
        }
        if self.body.trim().is_empty() {
            errors.add_error("body", "can't be blank");
        }
        errors.or(self)
    }
}

/// Article edits. Absent fields are left alone; a present tag list replaces
/// the current tags.
#[derive(Debug, Default, Deserialize)]
pub struct ArticleChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub body: Option<String>,
    #[serde(rename = "tagList")]
    pub tag_list: Option<Vec<String>>,
}

impl ArticleChanges {
    fn check(&self) -> Result<(), ValidationError> {
        let mut errors = ValidationError::default();
        let fields = [
            ("title", &self.title),
            ("description", &self.description),
            ("body", &self.body),
        ];
        for (field, value) in fields {
            if matches!(value, Some(v) if v.trim().is_empty()) {
                errors.add_error(field, "can't be blank");
            }
        }
        errors.or(())
    }
}

fn slug_taken(e: diesel::result::Error) -> ApiError {
    ApiError::conflict(e, "title", "an article with this title already exists")
}

/// The full response for one article as seen by `viewer`. Follow and
/// favorite state fall back to `false` if they cannot be loaded.
pub fn load_response(
    connection: &mut SqliteConnection,
    article: Article,
    viewer: Option<&User>,
) -> Result<ArticleResponse, ApiError> {
    let tags = article.tags(connection)?;
    let favorites_count = article.favorites_count(connection)?;
    let favorited = match viewer {
        Some(viewer) => article.is_favorited_by(viewer.id, connection).unwrap_or_else(|e| {
            warn!(error = %e, "could not load favorite state, assuming none");
            false
        }),
        None => false,
    };
    let author = User::load_by_id(article.author_id, connection)?;
    let author = profile_of(connection, &author, viewer);
    Ok(to_article_response(article, tags, author, favorited, favorites_count))
}

pub fn list_articles(
    connection: &mut SqliteConnection,
    filter: &ListFilter,
    page: Page,
    viewer: Option<&User>,
) -> Result<ArticleList, ApiError> {
    let (rows, articles_count) =
        query::list_articles(connection, filter, page, viewer.map(|v| v.id))?;
    let followed = followed_by_viewer(connection, viewer, &author_ids(&rows));
    Ok(ArticleList {
        articles: group_rows(rows, viewer.map(|v| v.id), &followed),
        articles_count,
    })
}

pub fn feed_articles(
    connection: &mut SqliteConnection,
    page: Page,
    caller: &User,
) -> Result<ArticleList, ApiError> {
    let (rows, articles_count) = query::feed_articles(connection, caller.id, page)?;
    let followed = followed_by_viewer(connection, Some(caller), &author_ids(&rows));
    Ok(ArticleList {
        articles: group_rows(rows, Some(caller.id), &followed),
        articles_count,
    })
}

pub fn get_article(
    connection: &mut SqliteConnection,
    slug: &str,
    viewer: Option<&User>,
) -> Result<ArticleResponse, ApiError> {
    let article = Article::load_by_slug(slug, connection)?;
    load_response(connection, article, viewer)
}

pub fn create_article(
    connection: &mut SqliteConnection,
    caller: &User,
    details: ArticleDetails,
) -> Result<ArticleResponse, ApiError> {
    let details = details.validate(connection)?;
    let now = Utc::now().naive_utc();
    let new_article = NewArticle {
        slug: slug_from_title(&details.title),
        title: details.title,
        description: details.description,
        body: details.body,
        author_id: caller.id,
        created_at: now,
        updated_at: now,
    };

    let article = connection.transaction::<_, ApiError, _>(|conn| {
        let article = insert_into(articles::table)
            .values(&new_article)
            .returning(Article::as_returning())
            .get_result(conn)
            .map_err(slug_taken)?;
        insert_tags(conn, article.id, &details.tag_list)?;
        Ok(article)
    })?;
    info!(slug = %article.slug, author = %caller.username, "article created");

    let tags = article.tags(connection)?;
    Ok(to_article_response(article, tags, caller.profile(false), false, 0))
}

pub fn update_article(
    connection: &mut SqliteConnection,
    slug: &str,
    caller: &User,
    changes: ArticleChanges,
) -> Result<ArticleResponse, ApiError> {
    let article = Article::load_by_slug(slug, connection)?;
    OwnershipGuard::authorize_article_mutation(&article, caller)?;
    changes.check()?;

    let changeset = ArticleChangeset {
        slug: changes.title.as_deref().map(slug_from_title),
        title: changes.title,
        description: changes.description,
        body: changes.body,
        updated_at: Utc::now().naive_utc(),
    };
    let tag_list = changes.tag_list;

    let article = connection.transaction::<_, ApiError, _>(|conn| {
        let updated = update(articles::table.find(article.id))
            .set(&changeset)
            .returning(Article::as_returning())
            .get_result(conn)
            .map_err(slug_taken)?;
        if let Some(names) = &tag_list {
            replace_tags(conn, article.id, names)?;
        }
        Ok(updated)
    })?;
    info!(old = %slug, slug = %article.slug, "article updated");

    load_response(connection, article, Some(caller))
}

pub fn delete_article(
    connection: &mut SqliteConnection,
    slug: &str,
    caller: &User,
) -> Result<(), ApiError> {
    let article = Article::load_by_slug(slug, connection)?;
    OwnershipGuard::authorize_article_mutation(&article, caller)?;

    connection.transaction::<_, ApiError, _>(|conn| {
        delete(favorites::table.filter(favorites::article_id.eq(article.id))).execute(conn)?;
        delete(tags::table.filter(tags::article_id.eq(article.id))).execute(conn)?;
        delete(comments::table.filter(comments::article_id.eq(article.id))).execute(conn)?;
        delete(articles::table.find(article.id)).execute(conn)?;
        Ok(())
    })?;
    info!(slug = %slug, "article deleted");
    Ok(())
}

pub fn favorite_article(
    connection: &mut SqliteConnection,
    slug: &str,
    caller: &User,
) -> Result<ArticleResponse, ApiError> {
    let article = Article::load_by_slug(slug, connection)?;
    insert_into(favorites::table)
        .values((
            favorites::article_id.eq(article.id),
            favorites::user_id.eq(caller.id),
        ))
        .on_conflict((favorites::article_id, favorites::user_id))
        .do_nothing()
        .execute(connection)?;
    load_response(connection, article, Some(caller))
}

pub fn unfavorite_article(
    connection: &mut SqliteConnection,
    slug: &str,
    caller: &User,
) -> Result<ArticleResponse, ApiError> {
    let article = Article::load_by_slug(slug, connection)?;
    delete(
        favorites::table
            .filter(favorites::article_id.eq(article.id))
            .filter(favorites::user_id.eq(caller.id)),
    )
    .execute(connection)?;
    load_response(connection, article, Some(caller))
}
