//! Login Tokens
//!
//! Optional JWT login. When a key or secret is configured, clients log in
//! with a token from an external provider and the server takes the username
//! from its claims. The server never issues tokens.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token validation settings.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Required "iss" claim, if any.
    pub issuer: Option<String>,
    /// Required "aud" claim, if any.
    pub audience: Option<String>,
    /// RS256 public key (PEM).
    pub public_key_pem: Option<String>,
    /// HS256 shared secret.
    pub secret: Option<String>,
    /// Accept expired tokens. Testing only.
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Read settings from `AUTH_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_SECRET").ok(),
            skip_expiry: std::env::var("AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Are token logins required?
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Claims read from a login token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject, the provider's user ID.
    pub sub: String,
    /// Display name, preferred over `sub` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    /// Expiry (Unix seconds).
    #[serde(default)]
    pub exp: u64,
    /// Issued at (Unix seconds).
    #[serde(default)]
    pub iat: u64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// In-game username for these claims.
    pub fn username(&self) -> &str {
        self.preferred_username
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.sub)
    }
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No key or secret configured.
    #[error("authentication not configured")]
    NotConfigured,
    /// Not a JWT.
    #[error("invalid token format")]
    InvalidFormat,
    /// Signature check failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token expired.
    #[error("token expired")]
    Expired,
    /// Wrong issuer.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Wrong audience.
    #[error("invalid audience")]
    InvalidAudience,
    /// A required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Any other decoding failure.
    #[error("decode error: {0}")]
    DecodeError(String),
}

/// Validate a token and return its claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    let (key, algorithm) = match (&config.public_key_pem, &config.secret) {
        (Some(pem), _) => {
            let key = DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|e| AuthError::DecodeError(format!("invalid public key: {}", e)))?;
            (key, Algorithm::RS256)
        }
        (None, Some(secret)) => (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256),
        (None, None) => return Err(AuthError::NotConfigured),
    };

    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims = HashSet::new();
    if let Some(ref issuer) = config.issuer {
        validation.set_issuer(&[issuer]);
    }
    match config.audience {
        Some(ref audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }
    if config.skip_expiry {
        validation.validate_exp = false;
    }

    let data: TokenData<TokenClaims> = decode(token, &key, &validation).map_err(map_jwt_error)?;
    let claims = data.claims;

    if claims.sub.is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }

    // jsonwebtoken allows some leeway; a login past `exp` is refused outright.
    if !config.skip_expiry && claims.exp > 0 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if now > claims.exp {
            return Err(AuthError::Expired);
        }
    }

    Ok(claims)
}

/// Turn a login reply into a username: the token's username when tokens
/// are configured, otherwise the trimmed reply itself.
pub fn resolve_username(reply: &str, config: &AuthConfig) -> Result<String, AuthError> {
    let reply = reply.trim();
    if config.is_configured() {
        return validate_token(reply, config).map(|claims| claims.username().to_string());
    }
    Ok(reply.to_string())
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
