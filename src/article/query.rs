//! Article listings and the personal feed.
//!
//! Both queries pick the page of article ids first, with every filter
//! applied, and only then join tags, authors and the caller's own favorite
//! onto that page. Tags multiply the rows per article, so paginating after
//! the join would cut pages in the middle of an article. Favorite totals
//! come from a grouped subquery and never add rows. The article total is
//! counted separately over the same filters.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{BigInt, Integer, Nullable, Text, Timestamp};
use lazy_static::lazy_static;

use crate::db::schema::{tags, users};
use crate::types::ApiError;

pub const DEFAULT_LIMIT: i64 = 20;

/// Optional listing filters; all given filters must hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListFilter {
    pub tag: Option<String>,
    /// Username of the author.
    pub author: Option<String>,
    /// Username of a user who favorited the article.
    pub favorited: Option<String>,
}

impl ListFilter {
    /// Blank values mean "no filter".
    pub fn new(tag: Option<String>, author: Option<String>, favorited: Option<String>) -> ListFilter {
        let present = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        ListFilter {
            tag: present(tag),
            author: present(author),
            favorited: present(favorited),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Default for Page {
    fn default() -> Page {
        Page {
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl Page {
    /// Missing, zero or negative limits fall back to the default; offsets to 0.
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Page {
        Page {
            limit: limit.filter(|&l| l > 0).unwrap_or(DEFAULT_LIMIT),
            offset: offset.filter(|&o| o > 0).unwrap_or(0),
        }
    }

    /// Query string values; anything unparsable counts as missing.
    pub fn parse(limit: Option<&str>, offset: Option<&str>) -> Page {
        Page::new(
            limit.and_then(|l| l.trim().parse().ok()),
            offset.and_then(|o| o.trim().parse().ok()),
        )
    }
}

/// One (article, tag, favorite) combination of the joined listing.
#[derive(Debug, Clone, PartialEq, QueryableByName)]
pub struct ArticleRow {
    #[diesel(sql_type = Integer)]
    pub id: i32,
    #[diesel(sql_type = Text)]
    pub slug: String,
    #[diesel(sql_type = Text)]
    pub title: String,
    #[diesel(sql_type = Text)]
    pub description: String,
    #[diesel(sql_type = Text)]
    pub body: String,
    #[diesel(sql_type = Timestamp)]
    pub created_at: NaiveDateTime,
    #[diesel(sql_type = Timestamp)]
    pub updated_at: NaiveDateTime,
    #[diesel(sql_type = Integer)]
    pub author_id: i32,
    #[diesel(sql_type = Text)]
    pub author_username: String,
    #[diesel(sql_type = Text)]
    pub author_bio: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub author_image: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub tag_name: Option<String>,
    #[diesel(sql_type = BigInt)]
    pub favorites_count: i64,
    /// The caller's id when the caller favorited the article.
    #[diesel(sql_type = Nullable<Integer>)]
    pub favorited_by: Option<i32>,
}

#[derive(QueryableByName)]
struct Count {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

// ?1 tag, ?2 author id, ?3 favoriting user id; NULL disables the filter.
static LIST_FILTER: &str = "(?1 IS NULL OR EXISTS (SELECT 1 FROM tags ft WHERE ft.article_id = a.id AND ft.name = ?1))
   AND (?2 IS NULL OR a.author_id = ?2)
   AND (?3 IS NULL OR EXISTS (SELECT 1 FROM favorites ff WHERE ff.article_id = a.id AND ff.user_id = ?3))";

// ?1 caller id: the caller's own articles and those of everyone they follow.
static FEED_FILTER: &str = "(a.author_id = ?1
    OR a.author_id IN (SELECT fl.following_id FROM follows fl WHERE fl.followed_by_id = ?1))";

lazy_static! {
    // ?4 caller id or NULL
    static ref LIST_ROWS: String = paged_rows(LIST_FILTER, 4, 5, 6);
    static ref LIST_COUNT: String = count_of(LIST_FILTER);
    static ref FEED_ROWS: String = paged_rows(FEED_FILTER, 1, 2, 3);
    static ref FEED_COUNT: String = count_of(FEED_FILTER);
}

fn paged_rows(filter: &str, caller_param: u8, limit_param: u8, offset_param: u8) -> String {
    format!(
        "WITH page AS (
            SELECT a.id AS id, a.created_at AS created_at
              FROM articles a
             WHERE {filter}
             ORDER BY a.created_at DESC, a.id DESC
             LIMIT ?{limit} OFFSET ?{offset}
         )
         SELECT a.id AS id,
                a.slug AS slug,
                a.title AS title,
                a.description AS description,
                a.body AS body,
                a.created_at AS created_at,
                a.updated_at AS updated_at,
                u.id AS author_id,
                u.username AS author_username,
                u.bio AS author_bio,
                u.image AS author_image,
                t.name AS tag_name,
                COALESCE(fc.favorites_count, 0) AS favorites_count,
                f.user_id AS favorited_by
           FROM page p
           JOIN articles a ON a.id = p.id
           JOIN users u ON u.id = a.author_id
           LEFT JOIN (
                SELECT article_id, COUNT(*) AS favorites_count
                  FROM favorites
                 WHERE article_id IN (SELECT id FROM page)
                 GROUP BY article_id
           ) fc ON fc.article_id = a.id
           LEFT JOIN favorites f ON f.article_id = a.id AND f.user_id = ?{caller}
           LEFT JOIN tags t ON t.article_id = a.id
          ORDER BY p.created_at DESC, p.id DESC, t.id",
        filter = filter,
        caller = caller_param,
        limit = limit_param,
        offset = offset_param,
    )
}

fn count_of(filter: &str) -> String {
    format!("SELECT COUNT(*) AS count FROM articles a WHERE {}", filter)
}

fn user_id_for(
    connection: &mut SqliteConnection,
    username: &str,
    field: &str,
) -> Result<i32, ApiError> {
    users::table
        .filter(users::username.eq(username))
        .select(users::id)
        .first::<i32>(connection)
        .map_err(|e| ApiError::missing(e, field, format!("user with username {} not found", username)))
}

/// Filtered listing. Returns the denormalized rows of the requested page and
/// the number of matching articles. Rows mark the favorites of `caller_id`
/// only.
pub fn list_articles(
    connection: &mut SqliteConnection,
    filter: &ListFilter,
    page: Page,
    caller_id: Option<i32>,
) -> Result<(Vec<ArticleRow>, i64), ApiError> {
    let author_id = match &filter.author {
        Some(name) => Some(user_id_for(connection, name, "author")?),
        None => None,
    };
    let favorited_by = match &filter.favorited {
        Some(name) => Some(user_id_for(connection, name, "favorited")?),
        None => None,
    };

    let rows = sql_query(LIST_ROWS.as_str())
        .bind::<Nullable<Text>, _>(filter.tag.as_deref())
        .bind::<Nullable<Integer>, _>(author_id)
        .bind::<Nullable<Integer>, _>(favorited_by)
        .bind::<Nullable<Integer>, _>(caller_id)
        .bind::<BigInt, _>(page.limit)
        .bind::<BigInt, _>(page.offset)
        .load::<ArticleRow>(connection)?;

    let total = sql_query(LIST_COUNT.as_str())
        .bind::<Nullable<Text>, _>(filter.tag.as_deref())
        .bind::<Nullable<Integer>, _>(author_id)
        .bind::<Nullable<Integer>, _>(favorited_by)
        .get_result::<Count>(connection)?;

    Ok((rows, total.count))
}

/// Newest first: articles of everyone `caller_id` follows, plus their own.
pub fn feed_articles(
    connection: &mut SqliteConnection,
    caller_id: i32,
    page: Page,
) -> Result<(Vec<ArticleRow>, i64), ApiError> {
    let rows = sql_query(FEED_ROWS.as_str())
        .bind::<Integer, _>(caller_id)
        .bind::<BigInt, _>(page.limit)
        .bind::<BigInt, _>(page.offset)
        .load::<ArticleRow>(connection)?;

    let total = sql_query(FEED_COUNT.as_str())
        .bind::<Integer, _>(caller_id)
        .get_result::<Count>(connection)?;

    Ok((rows, total.count))
}

/// Every distinct tag name in use, alphabetically.
pub fn all_tags(connection: &mut SqliteConnection) -> Result<Vec<String>, ApiError> {
    let names = tags::table
        .select(tags::name)
        .distinct()
        .order(tags::name.asc())
        .load::<String>(connection)?;
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::service::favorite_article;
    use crate::db::test_utils::{self, create_article, create_user};
    use crate::profile::follow_user;

    fn distinct_ids(rows: &[ArticleRow]) -> Vec<i32> {
        let mut ids: Vec<i32> = Vec::new();
        for row in rows {
            if ids.last() != Some(&row.id) {
                ids.push(row.id);
            }
        }
        ids
    }

    #[test]
    fn pagination_defaults() {
        assert_eq!(Page::new(None, None), Page { limit: 20, offset: 0 });
        assert_eq!(Page::new(Some(0), Some(-3)), Page { limit: 20, offset: 0 });
        assert_eq!(Page::parse(Some("5"), Some("10")), Page { limit: 5, offset: 10 });
        assert_eq!(Page::parse(Some("five"), Some("")), Page::default());
    }

    #[test]
    fn unfiltered_listing_returns_everything() {
        let mut conn = test_utils::connection();
        let jake = create_user(&mut conn, "jake");
        for i in 0..5 {
            create_article(&mut conn, &jake, &format!("article {}", i), &["a", "b"]);
        }

        let (rows, total) = list_articles(&mut conn, &ListFilter::default(), Page::default(), None).unwrap();
        assert_eq!(distinct_ids(&rows).len(), 5);
        assert_eq!(total, 5);
        // two tags per article
        assert_eq!(rows.len(), 10);
    }

    #[test]
    fn tag_filter_matches_membership() {
        let mut conn = test_utils::connection();
        let jake = create_user(&mut conn, "jake");
        let first = create_article(&mut conn, &jake, "first", &["t0", "t1"]);
        let second = create_article(&mut conn, &jake, "second", &["t1"]);
        create_article(&mut conn, &jake, "third", &["t2"]);

        let filter = ListFilter {
            tag: Some("t1".to_string()),
            ..Default::default()
        };
        let (rows, total) = list_articles(&mut conn, &filter, Page::default(), None).unwrap();
        assert_eq!(distinct_ids(&rows), vec![second.id, first.id]);
        assert_eq!(total, 2);
        // the other tags of a matching article are still joined
        let first_tags: Vec<_> = rows
            .iter()
            .filter(|r| r.id == first.id)
            .filter_map(|r| r.tag_name.clone())
            .collect();
        assert_eq!(first_tags, vec!["t0", "t1"]);
    }

    #[test]
    fn author_and_favorited_filters() {
        let mut conn = test_utils::connection();
        let jake = create_user(&mut conn, "jake");
        let anna = create_user(&mut conn, "anna");
        let by_jake = create_article(&mut conn, &jake, "by jake", &[]);
        let by_anna = create_article(&mut conn, &anna, "by anna", &[]);
        favorite_article(&mut conn, &by_jake.slug, &anna).unwrap();

        let filter = ListFilter {
            author: Some("anna".to_string()),
            ..Default::default()
        };
        let (rows, total) = list_articles(&mut conn, &filter, Page::default(), None).unwrap();
        assert_eq!(distinct_ids(&rows), vec![by_anna.id]);
        assert_eq!(total, 1);

        let filter = ListFilter {
            favorited: Some("anna".to_string()),
            ..Default::default()
        };
        let (rows, total) = list_articles(&mut conn, &filter, Page::default(), None).unwrap();
        assert_eq!(distinct_ids(&rows), vec![by_jake.id]);
        assert_eq!(total, 1);

        let filter = ListFilter {
            author: Some("anna".to_string()),
            favorited: Some("anna".to_string()),
            ..Default::default()
        };
        let (rows, total) = list_articles(&mut conn, &filter, Page::default(), None).unwrap();
        assert!(rows.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn unknown_usernames_are_not_found() {
        let mut conn = test_utils::connection();
        let filter = ListFilter {
            author: Some("ghost".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            list_articles(&mut conn, &filter, Page::default(), None),
            Err(ApiError::NotFound(_))
        ));

        let filter = ListFilter {
            favorited: Some("ghost".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            list_articles(&mut conn, &filter, Page::default(), None),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn pages_cover_articles_not_joined_rows() {
        let mut conn = test_utils::connection();
        let jake = create_user(&mut conn, "jake");
        let anna = create_user(&mut conn, "anna");
        for title in ["one", "two", "three"] {
            let article = create_article(&mut conn, &jake, title, &["x", "y", "z"]);
            favorite_article(&mut conn, &article.slug, &jake).unwrap();
            favorite_article(&mut conn, &article.slug, &anna).unwrap();
        }

        let none = ListFilter::default();
        let (first, total_first) = list_articles(&mut conn, &none, Page::new(Some(1), Some(0)), None).unwrap();
        let (second, total_second) =
            list_articles(&mut conn, &none, Page::new(Some(1), Some(1)), None).unwrap();
        let (both, total_both) = list_articles(&mut conn, &none, Page::new(Some(2), Some(0)), None).unwrap();

        let mut paged = distinct_ids(&first);
        paged.extend(distinct_ids(&second));
        assert_eq!(paged.len(), 2);
        assert_eq!(paged, distinct_ids(&both));
        // one row per tag, favorites add none
        assert_eq!(first.len(), 3);
        assert_eq!((total_first, total_second, total_both), (3, 3, 3));
    }

    #[test]
    fn favoriters_do_not_multiply_rows() {
        let mut conn = test_utils::connection();
        let jake = create_user(&mut conn, "jake");
        let tagged = create_article(&mut conn, &jake, "tagged", &["a", "b", "c"]);
        let untagged = create_article(&mut conn, &jake, "untagged", &[]);
        for i in 0..12 {
            let fan = create_user(&mut conn, &format!("fan{}", i));
            favorite_article(&mut conn, &tagged.slug, &fan).unwrap();
            favorite_article(&mut conn, &untagged.slug, &fan).unwrap();
        }
        favorite_article(&mut conn, &tagged.slug, &jake).unwrap();

        let (rows, _) =
            list_articles(&mut conn, &ListFilter::default(), Page::default(), Some(jake.id)).unwrap();
        let tagged_rows: Vec<_> = rows.iter().filter(|r| r.id == tagged.id).collect();
        let untagged_rows: Vec<_> = rows.iter().filter(|r| r.id == untagged.id).collect();
        assert_eq!(tagged_rows.len(), 3);
        assert_eq!(untagged_rows.len(), 1);
        assert!(tagged_rows
            .iter()
            .all(|r| r.favorites_count == 13 && r.favorited_by == Some(jake.id)));
        assert!(untagged_rows
            .iter()
            .all(|r| r.favorites_count == 12 && r.favorited_by.is_none()));

        // anonymous callers see counts but no marker
        let (rows, _) = list_articles(&mut conn, &ListFilter::default(), Page::default(), None).unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.favorited_by.is_none()));
    }

    #[test]
    fn blank_filters_are_ignored() {
        let filter = ListFilter::new(Some(String::new()), Some("  ".to_string()), Some("jake".to_string()));
        assert_eq!(
            filter,
            ListFilter {
                tag: None,
                author: None,
                favorited: Some("jake".to_string()),
            }
        );

        let mut conn = test_utils::connection();
        let jake = create_user(&mut conn, "jake");
        create_article(&mut conn, &jake, "tagged", &["a"]);
        let filter = ListFilter::new(Some(String::new()), None, None);
        let (_, total) = list_articles(&mut conn, &filter, Page::default(), None).unwrap();
        assert_eq!(total, 1);
    }

    #[test]
    fn feed_has_followed_authors_and_own_articles() {
        let mut conn = test_utils::connection();
        let jake = create_user(&mut conn, "jake");
        let anna = create_user(&mut conn, "anna");
        let bob = create_user(&mut conn, "bob");
        follow_user(&mut conn, &jake, "anna").unwrap();

        let a1 = create_article(&mut conn, &anna, "anna one", &[]);
        let own = create_article(&mut conn, &jake, "jake one", &[]);
        create_article(&mut conn, &bob, "bob one", &[]);
        let a2 = create_article(&mut conn, &anna, "anna two", &["t"]);

        let (rows, total) = feed_articles(&mut conn, jake.id, Page::default()).unwrap();
        assert_eq!(distinct_ids(&rows), vec![a2.id, own.id, a1.id]);
        assert_eq!(total, 3);

        let (rows, total) = feed_articles(&mut conn, jake.id, Page::new(Some(2), Some(2))).unwrap();
        assert_eq!(distinct_ids(&rows), vec![a1.id]);
        assert_eq!(total, 3);
    }

    #[test]
    fn tags_are_distinct_and_sorted() {
        let mut conn = test_utils::connection();
        let jake = create_user(&mut conn, "jake");
        create_article(&mut conn, &jake, "one", &["rust", "diesel"]);
        create_article(&mut conn, &jake, "two", &["rust", "rocket"]);

        assert_eq!(all_tags(&mut conn).unwrap(), vec!["diesel", "rocket", "rust"]);
    }
}
