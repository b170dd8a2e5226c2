use dotenv::dotenv;
use std::env;
use std::fmt;
use tracing::warn;

pub const DEFAULT_SIGNATURE: &str = "Change this with SIGNATURE env variable";
const DEFAULT_DATABASE_URL: &str = "conduit.db";
const DEFAULT_POOL_SIZE: u32 = 8;

/// Process configuration, read once at startup.
///
/// Listening address and port are left to Rocket's own `ROCKET_*` settings.
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    /// Secret used to sign bearer tokens.
    pub signature: String,
    pub pool_size: u32,
}

impl Config {
    pub fn from_env() -> Config {
        dotenv().ok();

        let signature = match env::var("SIGNATURE") {
            Ok(s) if !s.is_empty() => s,
            _ => {
                warn!("SIGNATURE is not set, tokens are signed with the default secret");
                DEFAULT_SIGNATURE.to_string()
            }
        };

        let pool_size = env::var("DATABASE_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_POOL_SIZE);

        Config {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            signature,
            pool_size,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url)
            .field("signature", &"<redacted>")
            .field("pool_size", &self.pool_size)
            .finish()
    }
}
