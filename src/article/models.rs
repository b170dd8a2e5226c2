use chrono::NaiveDateTime;
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::select;
use std::collections::HashSet;

use crate::db::schema::{articles, favorites, tags};
use crate::types::ApiError;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable)]
#[diesel(table_name = articles)]
pub struct Article {
    pub id: i32,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub body: String,
    pub author_id: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Article {
    pub fn load_by_slug(slug_: &str, connection: &mut SqliteConnection) -> Result<Article, ApiError> {
        use crate::db::schema::articles::dsl::*;
        articles
            .filter(slug.eq(slug_))
            .select(Article::as_select())
            .get_result(connection)
            .map_err(|e| ApiError::missing(e, "slug", format!("no article with slug {}", slug_)))
    }

    /// Tag names in the order they were attached.
    pub fn tags(&self, connection: &mut SqliteConnection) -> QueryResult<Vec<String>> {
        tags::table
            .filter(tags::article_id.eq(self.id))
            .order(tags::id.asc())
            .select(tags::name)
            .load(connection)
    }

    pub fn favorites_count(&self, connection: &mut SqliteConnection) -> QueryResult<i64> {
        favorites::table
            .filter(favorites::article_id.eq(self.id))
            .count()
            .get_result(connection)
    }

    pub fn is_favorited_by(&self, user_id: i32, connection: &mut SqliteConnection) -> QueryResult<bool> {
        select(exists(
            favorites::table
                .filter(favorites::article_id.eq(self.id))
                .filter(favorites::user_id.eq(user_id)),
        ))
        .get_result(connection)
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = articles)]
pub struct NewArticle {
    pub slug: String,
    pub title: String,
    pub description: String,
    pub body: String,
    pub author_id: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tags)]
pub struct NewTag<'a> {
    pub article_id: i32,
    pub name: &'a str,
}

/// Column updates for an article. `None` leaves the column alone.
#[derive(Debug, AsChangeset)]
#[diesel(table_name = articles)]
pub struct ArticleChangeset {
    pub slug: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub body: Option<String>,
    pub updated_at: NaiveDateTime,
}

/// Lowercased title, spaces turned into hyphens, then URL-escaped.
pub fn slug_from_title(title: &str) -> String {
    let hyphenated = title.split(' ').collect::<Vec<_>>().join("-").to_lowercase();
    urlencoding::encode(&hyphenated).into_owned()
}

/// Replaces the tag set of `article_id` with `names`. Blank and repeated
/// names are dropped; order is kept.
pub fn replace_tags(
    connection: &mut SqliteConnection,
    article_id: i32,
    names: &[String],
) -> QueryResult<()> {
    diesel::delete(tags::table.filter(tags::article_id.eq(article_id))).execute(connection)?;
    insert_tags(connection, article_id, names)
}

pub fn insert_tags(
    connection: &mut SqliteConnection,
    article_id: i32,
    names: &[String],
) -> QueryResult<()> {
    let mut seen = HashSet::new();
    let rows = names
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty() && seen.insert(*name))
        .map(|name| NewTag { article_id, name })
        .collect::<Vec<_>>();
    if rows.is_empty() {
        return Ok(());
    }
    diesel::insert_into(tags::table)
        .values(&rows)
        .execute(connection)?;
    Ok(())
}
