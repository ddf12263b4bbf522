//! Wallet sign-in for VaultDash
//!
//! - Single-use nonces with an expiry window
//! - Signed challenge verification (EIP-4361 messages, EIP-191 signatures)
//! - Stateless session tokens with revocation on logout

mod challenge;
mod crypto;
mod jwt;
mod message;
mod nonce;
mod revocation;
mod service;
mod sweeper;

pub use challenge::{ChallengeError, ChallengeVerifier, VerificationResult};
pub use crypto::{
    address_of, decode_signature, personal_message_hash, recover_address, CryptoError,
    EthereumVerifier, SignatureVerifier,
};
pub use jwt::{Claims, IssuedToken, SessionClaims, SessionError, SessionService};
pub use message::{MessageError, SignInMessage};
pub use nonce::{ConsumeOutcome, NonceRecord, NonceSettings, NonceStats, NonceStore};
pub use revocation::RevocationStore;
pub use service::{AuthError, AuthService, GateError};
pub use sweeper::NonceSweeper;
