use axum::http::{HeaderMap, header};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;

use parley_types::api::Claims;
use parley_types::models::UserId;

/// A verified identity, produced only by a successfully validated token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer credential")]
    Missing,
    #[error("invalid credential: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

/// Validate a JWT (signature and expiry) and extract the identity it carries.
pub fn verify_token(secret: &str, token: &str) -> Result<Identity, AuthError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(Identity {
        user_id: token_data.claims.sub,
        username: token_data.claims.username,
    })
}

/// Sign an identity token. Credential checks happen upstream; this only mints
/// the opaque token the core trusts.
pub fn issue_token(
    secret: &str,
    user_id: UserId,
    username: &str,
    ttl: chrono::Duration,
) -> Result<String, AuthError> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}
