//! Bearer tokens: issuing, validating and pulling them out of requests.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jwt::header::HeaderType;
use jwt::{AlgorithmType, Header, SignWithKey, Token, Verified, VerifyWithKey};
use rocket::http::Status;
use rocket::request::{self, FromRequest, Outcome, Request};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use tracing::debug;

use crate::types::ApiError;

pub const TOKEN_LIFETIME_HOURS: i64 = 100;

/// Payload carried by every token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// Who a valid token speaks for.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub email: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthError {
    Unauthenticated(String),
    Unauthorized(String),
}

/// Signs and checks HS256 tokens with a secret fixed at construction.
#[derive(Clone)]
pub struct TokenService {
    key: Hmac<Sha256>,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenService").finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: &[u8]) -> TokenService {
        // HMAC takes keys of any length.
        let key = Hmac::new_from_slice(secret).unwrap_or_else(|e| panic!("invalid HMAC key: {}", e));
        TokenService { key }
    }

    pub fn issue(&self, email: &str) -> String {
        self.issue_at(email, Utc::now())
    }

    /// Panics if signing fails, which only happens when the service is misconfigured.
    pub fn issue_at(&self, email: &str, now: DateTime<Utc>) -> String {
        let claims = Claims {
            email: email.to_owned(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(TOKEN_LIFETIME_HOURS)).timestamp(),
        };
        let header = Header {
            algorithm: AlgorithmType::Hs256,
            type_: Some(HeaderType::JsonWebToken),
            ..Default::default()
        };
        match Token::new(header, claims).sign_with_key(&self.key) {
            Ok(token) => token.as_str().to_owned(),
            Err(e) => panic!("could not get token string from token: {}", e),
        }
    }

    pub fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        self.validate_at(token, Utc::now())
    }

    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Identity, AuthError> {
        let unverified = Token::<Header, Claims, _>::parse_unverified(token)
            .map_err(|e| unauthenticated(format!("could not parse token: {}", e)))?;

        // The header is attacker controlled: refuse anything but HMAC before
        // the signature is looked at.
        match unverified.header().algorithm {
            AlgorithmType::Hs256 | AlgorithmType::Hs384 | AlgorithmType::Hs512 => {}
            other => {
                return Err(unauthenticated(format!(
                    "unexpected signing method: {:?}",
                    other
                )))
            }
        }

        let verified: Token<Header, Claims, Verified> = unverified
            .verify_with_key(&self.key)
            .map_err(|e| unauthenticated(format!("could not verify token: {}", e)))?;

        let claims = verified.claims();
        if claims.exp <= now.timestamp() {
            return Err(unauthenticated("token is expired".to_string()));
        }
        if claims.email.is_empty() {
            return Err(unauthenticated("token carries no email".to_string()));
        }

        Ok(Identity {
            email: claims.email.clone(),
        })
    }

    pub fn validate_for_email(&self, token: &str, expected_email: &str) -> Result<Identity, AuthError> {
        let identity = self.validate(token)?;
        if identity.email != expected_email {
            return Err(AuthError::Unauthorized(
                "token does not belong to this user".to_string(),
            ));
        }
        Ok(identity)
    }
}

fn unauthenticated(reason: String) -> AuthError {
    debug!(%reason, "token rejected");
    AuthError::Unauthenticated(reason)
}

/// Pulls the token out of an `Authorization` header value. Both the `Bearer`
/// and `Token` schemes are accepted.
pub fn extract_token(header: &str) -> Result<&str, AuthError> {
    match header.trim().split_once(' ') {
        Some(("Bearer", token)) | Some(("Token", token)) if !token.trim().is_empty() => {
            Ok(token.trim())
        }
        _ => Err(AuthError::Unauthenticated(
            "authorization header should contain Bearer or Token token".to_string(),
        )),
    }
}

/// The raw token presented with a request, not yet validated.
#[derive(Debug, Clone, PartialEq)]
pub struct BearerToken(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for BearerToken {
    type Error = ApiError;

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        match request.headers().get_one("Authorization") {
            Some(header) => match extract_token(header) {
                Ok(token) => Outcome::Success(BearerToken(token.to_owned())),
                Err(e) => Outcome::Error((Status::Unauthorized, e.into())),
            },
            None => Outcome::Error((
                Status::Unauthorized,
                ApiError::unauthenticated("token", "could not get authorization header"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jwt::{SigningAlgorithm, ToBase64};

    const SECRET: &[u8] = b"a test secret";

    fn forge(algorithm: AlgorithmType, claims: &Claims) -> String {
        let header = Header {
            algorithm,
            ..Default::default()
        };
        let key: Hmac<Sha256> = Hmac::new_from_slice(SECRET).unwrap();
        let header = header.to_base64().unwrap();
        let claims = claims.to_base64().unwrap();
        let signature = key.sign(&header, &claims).unwrap();
        format!("{}.{}.{}", header, claims, signature)
    }

    fn claims_for(email: &str) -> Claims {
        let now = Utc::now();
        Claims {
            email: email.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        }
    }

    #[test]
    fn issued_token_validates_to_same_email() {
        let tokens = TokenService::new(SECRET);
        let token = tokens.issue("jake@jake.jake");

        assert_eq!(
            tokens.validate(&token),
            Ok(Identity {
                email: "jake@jake.jake".to_string()
            })
        );
        assert!(tokens.validate_for_email(&token, "jake@jake.jake").is_ok());
    }

    #[test]
    fn token_for_other_email_is_unauthorized() {
        let tokens = TokenService::new(SECRET);
        let token = tokens.issue("jake@jake.jake");

        match tokens.validate_for_email(&token, "someone@else.org") {
            Err(AuthError::Unauthorized(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = TokenService::new(b"another secret").issue("jake@jake.jake");
        match TokenService::new(SECRET).validate(&token) {
            Err(AuthError::Unauthenticated(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokens = TokenService::new(SECRET);
        let issued = Utc::now() - Duration::hours(TOKEN_LIFETIME_HOURS + 1);
        let token = tokens.issue_at("jake@jake.jake", issued);

        assert!(tokens.validate(&token).is_err());
        assert!(tokens
            .validate_at(&token, issued + Duration::hours(TOKEN_LIFETIME_HOURS - 1))
            .is_ok());
    }

    #[test]
    fn random_string_is_not_a_token() {
        let tokens = TokenService::new(SECRET);
        assert!(tokens
            .validate_for_email("alkjndasoljsewoldsglgndfsg", "sdasd")
            .is_err());
        assert!(tokens.validate("").is_err());
    }

    #[test]
    fn forged_hs256_token_is_accepted() {
        let tokens = TokenService::new(SECRET);
        let token = forge(AlgorithmType::Hs256, &claims_for("jake@jake.jake"));
        assert!(tokens.validate(&token).is_ok());
    }

    #[test]
    fn non_hmac_algorithms_are_rejected_despite_valid_signature() {
        let tokens = TokenService::new(SECRET);
        for algorithm in [
            AlgorithmType::Rs256,
            AlgorithmType::Es256,
            AlgorithmType::Ps512,
            AlgorithmType::None,
        ] {
            let token = forge(algorithm, &claims_for("jake@jake.jake"));
            match tokens.validate(&token) {
                Err(AuthError::Unauthenticated(reason)) => {
                    assert!(reason.contains("unexpected signing method"), "{}", reason)
                }
                other => panic!("{:?} accepted: {:?}", algorithm, other),
            }
        }
    }

    #[test]
    fn hmac_algorithm_must_match_the_key() {
        let tokens = TokenService::new(SECRET);
        let token = forge(AlgorithmType::Hs512, &claims_for("jake@jake.jake"));
        assert!(tokens.validate(&token).is_err());
    }

    #[test]
    fn both_header_schemes_are_accepted() {
        assert_eq!(extract_token("Bearer abc.def.ghi"), Ok("abc.def.ghi"));
        assert_eq!(extract_token("Token abc.def.ghi"), Ok("abc.def.ghi"));
        assert!(extract_token("Basic dXNlcjpwYXNz").is_err());
        assert!(extract_token("Bearer").is_err());
        assert!(extract_token("Bearer ").is_err());
        assert!(extract_token("").is_err());
    }
}
