use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection};
use diesel::result::Error as DieselError;
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use error_chain::error_chain;
use rocket::http::Status;
use rocket::request::{self, FromRequest, Outcome, Request};
use rocket::tokio::task;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::types::ApiError;

pub mod schema;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BACKOFF: Duration = Duration::from_secs(2);
const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(5);

// An alias to the type for a pool of Diesel SQLite connections.
pub type Pool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

error_chain! {
    foreign_links {
        Var(::std::env::VarError);
        R2D2(r2d2::Error);
        Diesel(DieselError);
    }
}

/// Applied to every connection when the pool opens it.
#[derive(Debug)]
struct ConnectionOptions {
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {};",
            self.busy_timeout.as_millis()
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Handle on the managed pool. Connections are checked out on the blocking
/// thread pool by `run`, never on an async worker.
#[derive(Clone)]
pub struct Db(Pool);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Db {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, ()> {
        match request.rocket().state::<Pool>() {
            Some(pool) => Outcome::Success(Db(pool.clone())),
            None => Outcome::Error((Status::InternalServerError, ())),
        }
    }
}

impl Db {
    /// Runs `f` on a pooled connection inside `spawn_blocking`, so store
    /// I/O, lock waits and password hashing stay off the async workers.
    pub async fn run<F, R>(&self, f: F) -> std::result::Result<R, ApiError>
    where
        F: FnOnce(&mut SqliteConnection) -> std::result::Result<R, ApiError> + Send + 'static,
        R: Send + 'static,
    {
        let pool = self.0.clone();
        task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| {
                warn!(error = %e, "no database connection available");
                ApiError::Unavailable
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            error!(error = %e, "database task failed");
            ApiError::Internal
        })?
    }
}

/// Builds the pool, retrying while the store is unreachable, then brings the
/// schema up to date.
pub fn init_pool(config: &Config) -> Result<Pool> {
    let mut attempt = 1;
    let pool = loop {
        match build_pool(config) {
            Ok(pool) => break pool,
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                warn!(attempt, error = %e, "could not connect to database, retrying");
                attempt += 1;
                thread::sleep(CONNECT_BACKOFF);
            }
            Err(e) => return Err(e).chain_err(|| "could not connect to database"),
        }
    };

    let mut conn = pool.get()?;
    run_migrations(&mut conn)?;
    info!(url = %config.database_url, "database ready");
    Ok(pool)
}

fn build_pool(config: &Config) -> Result<Pool> {
    let manager = ConnectionManager::<SqliteConnection>::new(config.database_url.as_str());
    let pool = r2d2::Pool::builder()
        .max_size(config.pool_size)
        .connection_timeout(CHECKOUT_TIMEOUT)
        .connection_customizer(Box::new(ConnectionOptions {
            busy_timeout: Duration::from_secs(5),
        }))
        .build(manager)?;
    Ok(pool)
}

pub fn run_migrations(conn: &mut SqliteConnection) -> Result<()> {
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| Error::from(format!("could not run migrations: {}", e)))?;
    Ok(())
}

#[cfg(test)]
pub mod test_utils {
    use super::*;
    use crate::article::models::Article;
    use crate::article::service::{self, ArticleDetails};
    use crate::users::models::{NewUser, User};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DATABASES: AtomicUsize = AtomicUsize::new(0);

    /// A fresh, migrated in-memory database.
    pub fn connection() -> SqliteConnection {
        let mut conn = SqliteConnection::establish(":memory:").expect("in-memory database");
        conn.batch_execute("PRAGMA foreign_keys = ON;")
            .expect("enable foreign keys");
        run_migrations(&mut conn).expect("migrations");
        conn
    }

    pub fn create_user(conn: &mut SqliteConnection, username: &str) -> User {
        let new_user = NewUser {
            username: username.to_string(),
            email: format!("{}@{}.{}", username, username, username),
            password: User::make_password("password").expect("hash password"),
        };
        diesel::insert_into(schema::users::table)
            .values(&new_user)
            .returning(User::as_returning())
            .get_result(conn)
            .expect("insert user")
    }

    pub fn create_article(conn: &mut SqliteConnection, author: &User, title: &str, tags: &[&str]) -> Article {
        let details = ArticleDetails {
            title: title.to_string(),
            description: format!("About {}", title),
            body: format!("All there is to know about {}", title),
            tag_list: tags.iter().map(|t| t.to_string()).collect(),
        };
        let created = service::create_article(conn, author, details).expect("create article");
        Article::load_by_slug(&created.slug, conn).expect("load article")
    }

    /// Configuration pointing at a fresh database file, for tests that need a pool.
    pub fn config() -> Config {
        let path = std::env::temp_dir().join(format!(
            "conduit-test-{}-{}.db",
            std::process::id(),
            DATABASES.fetch_add(1, Ordering::SeqCst)
        ));
        let _ = std::fs::remove_file(&path);
        Config {
            database_url: path.to_string_lossy().into_owned(),
            signature: "test signature".to_string(),
            pool_size: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::users;

    #[rocket::async_test]
    async fn run_uses_a_pooled_connection() {
        let db = Db(init_pool(&test_utils::config()).unwrap());

        let users = db
            .run(|conn| Ok(users::table.count().get_result::<i64>(conn)?))
            .await
            .unwrap();
        assert_eq!(users, 0);

        let failed = db
            .run(|_| Err::<(), _>(ApiError::not_found("user", "gone")))
            .await;
        assert!(matches!(failed, Err(ApiError::NotFound(_))));
    }
}
