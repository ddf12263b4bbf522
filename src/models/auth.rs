//! Authentication request/response DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::IssuedToken;

/// Fresh challenge nonce
#[derive(Debug, Serialize, Deserialize)]
pub struct NonceResponse {
    pub nonce: String,
}

/// Signed challenge submitted for verification
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    /// Full sign-in message text, exactly as signed
    pub message: String,
    /// Hex-encoded 65-byte signature, `0x` prefix optional
    pub signature: String,
}

/// Issued session token
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub token_type: String,
    pub address: String,
    pub expires_at: DateTime<Utc>,
}

impl From<IssuedToken> for TokenResponse {
    fn from(issued: IssuedToken) -> Self {
        Self {
            token: issued.token,
            token_type: "Bearer".to_string(),
            address: issued.claims.address,
            expires_at: issued.claims.expires_at,
        }
    }
}

/// Current session, as returned by `GET /auth/me`
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub address: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
