//! Player Identity
//!
//! Resolves a connection to a stable [`PlayerId`] by validating JWTs from the
//! external session provider. The server does NOT issue tokens - only
//! validates them.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::game::state::PlayerId;
use crate::network::protocol::AuthRequest;

/// Identity configuration.
#[derive(Clone, Debug, Default)]
pub struct IdentityConfig {
    /// Expected issuer claim ("iss"). If None, any issuer accepted.
    pub issuer: Option<String>,
    /// Expected audience claim ("aud"). If None, any audience accepted.
    pub audience: Option<String>,
    /// RS256 public key in PEM format.
    pub public_key_pem: Option<String>,
    /// HS256 secret.
    pub secret: Option<String>,
    /// Skip expiry validation (testing only).
    pub skip_expiry: bool,
    /// Accept a raw UUID player id without a token (local development).
    pub allow_insecure_ids: bool,
}

impl IdentityConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_SECRET").ok(),
            skip_expiry: env_flag("AUTH_SKIP_EXPIRY"),
            allow_insecure_ids: env_flag("AUTH_ALLOW_INSECURE_IDS"),
        }
    }

    /// Check if token validation is configured.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

/// Claims expected from the session provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject - the user id at the provider.
    pub sub: String,
    /// Expiry timestamp (Unix seconds).
    #[serde(default)]
    pub exp: u64,
    /// Issued at timestamp.
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
    /// Player id for the subject.
    ///
    /// A subject that already is a UUID is used as is; anything else is
    /// hashed into one so the same subject always maps to the same player.
    pub fn player_id(&self) -> PlayerId {
        if let Some(id) = PlayerId::from_uuid_str(&self.sub) {
            return id;
        }

        let mut hasher = Sha256::new();
        hasher.update(b"stop-arena-player:");
        hasher.update(self.sub.as_bytes());
        let hash = hasher.finalize();

        let mut id = [0u8; 16];
        id.copy_from_slice(&hash[..16]);
        PlayerId::new(id)
    }
}

/// Identity errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No token validation configured and insecure ids not allowed.
    #[error("authentication not configured")]
    NotConfigured,
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Token signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Issuer claim doesn't match expected value.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Audience claim doesn't match expected value.
    #[error("invalid audience")]
    InvalidAudience,
    /// Required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Raw player id is not a UUID.
    #[error("invalid player id")]
    InvalidPlayerId,
    /// JWT decoding error.
    #[error("decode error: {0}")]
    DecodeError(String),
}

/// Validate a JWT and extract its claims.
pub fn validate_token(token: &str, config: &IdentityConfig) -> Result<TokenClaims, IdentityError> {
    let (key, algorithm) = decoding_key(config)?;
    let claims = decode::<TokenClaims>(token, &key, &rules(config, algorithm))
        .map_err(map_jwt_error)?
        .claims;

    if claims.sub.is_empty() {
        return Err(IdentityError::MissingClaim("sub".into()));
    }
    // exp is optional for the decoder; enforce it here when present
    if !config.skip_expiry && claims.exp > 0 && unix_now() > claims.exp {
        return Err(IdentityError::Expired);
    }
    Ok(claims)
}

/// RS256 when a public key is configured, else HS256 with the shared secret.
fn decoding_key(config: &IdentityConfig) -> Result<(DecodingKey, Algorithm), IdentityError> {
    match (&config.public_key_pem, &config.secret) {
        (Some(pem), _) => DecodingKey::from_rsa_pem(pem.as_bytes())
            .map(|key| (key, Algorithm::RS256))
            .map_err(|e| IdentityError::DecodeError(format!("invalid public key: {}", e))),
        (None, Some(secret)) => Ok((DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)),
        (None, None) => Err(IdentityError::NotConfigured),
    }
}

fn rules(config: &IdentityConfig, algorithm: Algorithm) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims.clear();
    validation.validate_exp = !config.skip_expiry;
    match &config.audience {
        Some(aud) => validation.set_audience(&[aud]),
        None => validation.validate_aud = false,
    }
    if let Some(iss) = &config.issuer {
        validation.set_issuer(&[iss]);
    }
    validation
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Resolve the player behind an auth request.
///
/// A token is validated when one is given and validation is configured.
/// Otherwise a raw UUID player id is accepted only in insecure mode.
pub fn resolve_identity(
    request: &AuthRequest,
    config: &IdentityConfig,
) -> Result<PlayerId, IdentityError> {
    if !request.token.is_empty() && config.is_configured() {
        return Ok(validate_token(&request.token, config)?.player_id());
    }

    if config.allow_insecure_ids {
        return request
            .player_id
            .as_deref()
            .and_then(PlayerId::from_uuid_str)
            .ok_or(IdentityError::InvalidPlayerId);
    }

    Err(IdentityError::NotConfigured)
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> IdentityError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => IdentityError::Expired,
        ErrorKind::InvalidSignature => IdentityError::InvalidSignature,
        ErrorKind::InvalidIssuer => IdentityError::InvalidIssuer,
        ErrorKind::InvalidAudience => IdentityError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => IdentityError::InvalidFormat,
        _ => IdentityError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
