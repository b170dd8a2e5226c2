//! Who is calling, and may they touch this resource.

use diesel::result::Error as DieselError;
use diesel::SqliteConnection;
use tracing::debug;

use crate::article::models::Article;
use crate::auth::{BearerToken, TokenService};
use crate::comment::Comment;
use crate::types::ApiError;
use crate::users::models::User;

pub struct OwnershipGuard<'a> {
    tokens: &'a TokenService,
}

impl<'a> OwnershipGuard<'a> {
    pub fn new(tokens: &'a TokenService) -> OwnershipGuard<'a> {
        OwnershipGuard { tokens }
    }

    /// Validates the token and loads the account it names. An unknown account
    /// is reported as an authentication failure.
    pub fn resolve_caller(
        &self,
        connection: &mut SqliteConnection,
        token: &str,
    ) -> Result<User, ApiError> {
        let identity = self.tokens.validate(token)?;
        User::load_by_email(&identity.email, connection).map_err(|e| match e {
            DieselError::NotFound => ApiError::unauthenticated("token", "user not found"),
            other => other.into(),
        })
    }

    /// `resolve_caller` for routes that require a token.
    pub fn require(
        &self,
        connection: &mut SqliteConnection,
        token: Result<BearerToken, ApiError>,
    ) -> Result<User, ApiError> {
        let token = token?;
        self.resolve_caller(connection, &token.0)
    }

    /// Read paths: no token, a bad token or an unknown account all mean an
    /// anonymous viewer.
    pub fn resolve_viewer(
        &self,
        connection: &mut SqliteConnection,
        token: Option<&BearerToken>,
    ) -> Option<User> {
        let token = token?;
        match self.resolve_caller(connection, &token.0) {
            Ok(user) => Some(user),
            Err(e) => {
                debug!(error = ?e, "treating caller as anonymous");
                None
            }
        }
    }

    pub fn authorize_article_mutation(article: &Article, caller: &User) -> Result<(), ApiError> {
        if article.author_id != caller.id {
            return Err(ApiError::forbidden(
                "article",
                "cannot modify articles of other users",
            ));
        }
        Ok(())
    }

    pub fn authorize_comment_deletion(comment: &Comment, caller: &User) -> Result<(), ApiError> {
        if comment.author_id != caller.id {
            return Err(ApiError::forbidden(
                "comment",
                "cannot delete comments of other users",
            ));
        }
        Ok(())
    }
}
