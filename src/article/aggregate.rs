//! Folding joined listing rows back into articles.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use super::models::Article;
use super::query::ArticleRow;
use crate::profile::Profile;
use crate::utils::serialize_date;

/// An article as returned by every article endpoint, single or listed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleResponse {
    pub slug: String,
    pub title: String,
    pub description: String,
    pub body: String,
    pub tag_list: Vec<String>,
    #[serde(serialize_with = "serialize_date")]
    pub created_at: NaiveDateTime,
    #[serde(serialize_with = "serialize_date")]
    pub updated_at: NaiveDateTime,
    pub favorited: bool,
    pub favorites_count: i64,
    pub author: Profile,
}

pub fn to_article_response(
    article: Article,
    tags: Vec<String>,
    author: Profile,
    favorited: bool,
    favorites_count: i64,
) -> ArticleResponse {
    ArticleResponse {
        slug: article.slug,
        title: article.title,
        description: article.description,
        body: article.body,
        tag_list: tags,
        created_at: article.created_at,
        updated_at: article.updated_at,
        favorited,
        favorites_count,
        author,
    }
}

struct Group {
    article: ArticleResponse,
    tags: HashSet<String>,
}

impl Group {
    fn start(row: &ArticleRow, followed: &HashSet<i32>) -> Group {
        Group {
            article: ArticleResponse {
                slug: row.slug.clone(),
                title: row.title.clone(),
                description: row.description.clone(),
                body: row.body.clone(),
                tag_list: Vec::new(),
                created_at: row.created_at,
                updated_at: row.updated_at,
                favorited: false,
                favorites_count: row.favorites_count,
                author: Profile {
                    username: row.author_username.clone(),
                    bio: row.author_bio.clone(),
                    image: row.author_image.clone(),
                    following: followed.contains(&row.author_id),
                },
            },
            tags: HashSet::new(),
        }
    }

    fn absorb(&mut self, row: ArticleRow, caller_id: Option<i32>) {
        if let Some(tag) = row.tag_name.filter(|t| !t.is_empty()) {
            if self.tags.insert(tag.clone()) {
                self.article.tag_list.push(tag);
            }
        }
        // only the caller's own favorite is joined, zero is never a user
        if matches!(row.favorited_by, Some(id) if id != 0 && Some(id) == caller_id) {
            self.article.favorited = true;
        }
    }
}

/// Collapses rows into articles in the order their ids first appear.
/// `followed` holds the author ids the caller follows.
pub fn group_rows(
    rows: Vec<ArticleRow>,
    caller_id: Option<i32>,
    followed: &HashSet<i32>,
) -> Vec<ArticleResponse> {
    let mut groups: Vec<Group> = Vec::new();
    let mut positions: HashMap<i32, usize> = HashMap::new();

    for row in rows {
        let position = *positions.entry(row.id).or_insert_with(|| {
            groups.push(Group::start(&row, followed));
            groups.len() - 1
        });
        groups[position].absorb(row, caller_id);
    }

    groups.into_iter().map(|group| group.article).collect()
}

/// Distinct author ids, for looking up follow state in one query.
pub fn author_ids(rows: &[ArticleRow]) -> Vec<i32> {
    let mut seen = HashSet::new();
    rows.iter()
        .map(|row| row.author_id)
        .filter(|id| seen.insert(*id))
        .collect()
}
