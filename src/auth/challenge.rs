//! Signed challenge verification
//!
//! The nonce is consumed before the signature is checked: a presented nonce is
//! spent even when its signature turns out to be invalid, so one challenge
//! cannot be retried with different signatures.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use super::crypto::{decode_signature, SignatureVerifier};
use super::message::{MessageError, SignInMessage};
use super::nonce::{ConsumeOutcome, NonceStore};
use crate::store::StoreError;

/// Why a challenge was rejected
#[derive(Error, Debug)]
pub enum ChallengeError {
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] MessageError),

    #[error("malformed signature")]
    MalformedSignature,

    #[error("nonce not found")]
    NonceNotFound,

    #[error("nonce already used")]
    NonceAlreadyUsed,

    #[error("nonce expired")]
    NonceExpired,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("message expired")]
    MessageExpired,

    #[error("message not yet valid")]
    MessageNotYetValid,

    #[error("domain mismatch")]
    DomainMismatch,

    #[error("authentication store unavailable")]
    StoreUnavailable(#[source] StoreError),
}

impl ChallengeError {
    /// Stable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            ChallengeError::MalformedMessage(_) => "MALFORMED_MESSAGE",
            ChallengeError::MalformedSignature => "MALFORMED_SIGNATURE",
            ChallengeError::NonceNotFound => "NONCE_NOT_FOUND",
            ChallengeError::NonceAlreadyUsed => "NONCE_ALREADY_USED",
            ChallengeError::NonceExpired => "NONCE_EXPIRED",
            ChallengeError::InvalidSignature => "INVALID_SIGNATURE",
            ChallengeError::MessageExpired => "MESSAGE_EXPIRED",
            ChallengeError::MessageNotYetValid => "MESSAGE_NOT_YET_VALID",
            ChallengeError::DomainMismatch => "DOMAIN_MISMATCH",
            ChallengeError::StoreUnavailable(_) => "AUTH_UNAVAILABLE",
        }
    }

    /// Malformed input, as opposed to a failed authentication attempt
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ChallengeError::MalformedMessage(_) | ChallengeError::MalformedSignature
        )
    }
}

impl From<StoreError> for ChallengeError {
    fn from(e: StoreError) -> Self {
        ChallengeError::StoreUnavailable(e)
    }
}

/// `{valid, address?, error?}` summary of a verification attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Result<String, ChallengeError>> for VerificationResult {
    fn from(result: &Result<String, ChallengeError>) -> Self {
        match result {
            Ok(address) => VerificationResult {
                valid: true,
                address: Some(address.clone()),
                error: None,
            },
            Err(e) => VerificationResult {
                valid: false,
                address: None,
                // Only the top-level reason crosses the boundary
                error: Some(match e {
                    ChallengeError::MalformedMessage(_) => "malformed message".to_string(),
                    other => other.to_string(),
                }),
            },
        }
    }
}

pub struct ChallengeVerifier {
    nonces: Arc<NonceStore>,
    signatures: Arc<dyn SignatureVerifier>,
    expected_domain: Option<String>,
}

impl ChallengeVerifier {
    pub fn new(
        nonces: Arc<NonceStore>,
        signatures: Arc<dyn SignatureVerifier>,
        expected_domain: Option<String>,
    ) -> Self {
        Self {
            nonces,
            signatures,
            expected_domain,
        }
    }

    /// Verify a signed challenge, returning the address as written in the message
    pub async fn verify(&self, message: &str, signature_hex: &str) -> Result<String, ChallengeError> {
        let parsed: SignInMessage = message.parse()?;
        let signature =
            decode_signature(signature_hex).map_err(|_| ChallengeError::MalformedSignature)?;

        match self.nonces.consume(&parsed.nonce).await? {
            ConsumeOutcome::Consumed => {}
            ConsumeOutcome::NotFound => return Err(ChallengeError::NonceNotFound),
            ConsumeOutcome::AlreadyUsed => return Err(ChallengeError::NonceAlreadyUsed),
            ConsumeOutcome::Expired => return Err(ChallengeError::NonceExpired),
        }

        if !self
            .signatures
            .verify(&parsed.address, message, &signature)
        {
            return Err(ChallengeError::InvalidSignature);
        }

        let now = Utc::now();
        if parsed.is_expired_at(now) {
            return Err(ChallengeError::MessageExpired);
        }
        if parsed.is_premature_at(now) {
            return Err(ChallengeError::MessageNotYetValid);
        }

        if let Some(domain) = &self.expected_domain {
            if !parsed.domain.eq_ignore_ascii_case(domain) {
                return Err(ChallengeError::DomainMismatch);
            }
        }

        Ok(parsed.address)
    }

    /// [`verify`](Self::verify) flattened into the wire summary
    pub async fn verify_result(&self, message: &str, signature_hex: &str) -> VerificationResult {
        VerificationResult::from(&self.verify(message, signature_hex).await)
    }
}
