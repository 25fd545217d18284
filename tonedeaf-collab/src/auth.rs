use std::sync::Arc;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::PrimaryKey;

/// Why a connection attempt was turned away
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing cookie")]
    MissingCookie,
    #[error("Missing session token")]
    MissingToken,
    #[error("Invalid or expired session")]
    InvalidToken,
}

/// Turns a session token into the user it was issued to
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<PrimaryKey, AuthError>;
}

/// The claims of a session token issued by the REST layer
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub id: PrimaryKey,
    pub exp: usize,
}

/// Verifies HS256 session tokens signed with a shared secret
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl CredentialVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<PrimaryKey, AuthError> {
        decode::<SessionClaims>(token, &self.key, &self.validation)
            .map(|data| data.claims.id)
            .map_err(|_| AuthError::InvalidToken)
    }
}

/// The connection gate: resolves the handshake cookie to a user id
#[derive(Clone)]
pub struct Auth {
    verifier: Arc<dyn CredentialVerifier>,
    cookie_name: String,
}

impl Auth {
    pub const DEFAULT_COOKIE_NAME: &'static str = "token";

    pub fn new(verifier: Arc<dyn CredentialVerifier>, cookie_name: impl Into<String>) -> Self {
        Self {
            verifier,
            cookie_name: cookie_name.into(),
        }
    }

    /// Authenticates the raw value of a `Cookie` header, if one was sent
    pub fn authenticate(&self, cookie_header: Option<&str>) -> Result<PrimaryKey, AuthError> {
        let header = cookie_header.ok_or(AuthError::MissingCookie)?;

        let token = find_cookie(header, &self.cookie_name)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingToken)?;

        self.verifier.verify(token)
    }
}

fn find_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"'))
}
