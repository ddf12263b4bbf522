//! Shared fixtures for integration tests

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use k256::ecdsa::SigningKey;

use vaultdash_auth::auth::{address_of, personal_message_hash, SignInMessage};
use vaultdash_auth::config::Config;

/// Deterministic wallet
pub fn wallet(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).expect("valid scalar")
}

pub fn address(key: &SigningKey) -> String {
    address_of(key.verifying_key())
}

/// Hex signature as returned by a wallet's personal_sign
pub fn personal_sign(key: &SigningKey, message: &str) -> String {
    let digest = personal_message_hash(message);
    let (sig, recovery_id) = key
        .sign_prehash_recoverable(&digest)
        .expect("signing succeeds");
    let mut bytes = sig.to_bytes().to_vec();
    bytes.push(recovery_id.to_byte() + 27);
    format!("0x{}", hex::encode(bytes))
}

/// Sign-in message for `address` over `nonce`
pub fn sign_in_message(address: &str, nonce: &str) -> SignInMessage {
    SignInMessage {
        domain: "dashboard.vaultdash.test".to_string(),
        address: address.to_string(),
        statement: Some("Sign in to VaultDash".to_string()),
        uri: "https://dashboard.vaultdash.test/login".to_string(),
        version: "1".to_string(),
        chain_id: 1,
        nonce: nonce.to_string(),
        issued_at: Utc::now(),
        expiration_time: None,
        not_before: None,
        request_id: None,
        resources: Vec::new(),
    }
}

pub fn with_expiry(mut message: SignInMessage, expires: DateTime<Utc>) -> SignInMessage {
    message.expiration_time = Some(expires);
    message
}

/// Development config with a fixed secret
pub fn test_config() -> Config {
    Config {
        session_secret: "integration-test-secret-0123456789abcdef".to_string(),
        siwe_domain: Some("dashboard.vaultdash.test".to_string()),
        ..Config::default()
    }
}
