// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ed25519 verification of inbound trigger requests.
//!
//! The signed message is the timestamp header followed by the raw request
//! body. Malformed input of any kind is a verification failure, never an
//! error.

use std::time::Duration;

use chrono::Utc;
use ed25519_dalek::{PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH, Signature, Verifier, VerifyingKey};
use thiserror::Error;
use tracing::debug;

/// The configured public key could not be loaded.
#[derive(Debug, Error)]
pub enum VerifierKeyError {
    /// Not valid hex.
    #[error("public key is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Wrong number of bytes.
    #[error("public key must be {expected} bytes, got {0}", expected = PUBLIC_KEY_LENGTH)]
    InvalidLength(usize),

    /// Bytes do not encode a curve point.
    #[error("public key is not a valid ed25519 point")]
    InvalidPoint,
}

/// Verifies trigger signatures against a fixed public key.
#[derive(Debug, Clone)]
pub struct TriggerVerifier {
    key: VerifyingKey,
    max_skew: Option<Duration>,
}

impl TriggerVerifier {
    /// Create a verifier for a key.
    pub fn new(key: VerifyingKey) -> Self {
        Self {
            key,
            max_skew: None,
        }
    }

    /// Load a hex-encoded 32-byte public key.
    pub fn from_hex(public_key_hex: &str) -> Result<Self, VerifierKeyError> {
        let bytes = hex::decode(public_key_hex.trim())?;
        let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| VerifierKeyError::InvalidLength(bytes.len()))?;
        let key = VerifyingKey::from_bytes(&bytes).map_err(|_| VerifierKeyError::InvalidPoint)?;
        Ok(Self::new(key))
    }

    /// Also reject requests whose timestamp is further than `max_skew` from now.
    pub fn with_max_skew(mut self, max_skew: Duration) -> Self {
        self.max_skew = Some(max_skew);
        self
    }

    /// Verify `signature_hex` over `timestamp ++ body`.
    pub fn verify(&self, timestamp: &str, body: &[u8], signature_hex: &str) -> bool {
        self.verify_at(timestamp, body, signature_hex, Utc::now().timestamp())
    }

    /// [`verify`](Self::verify) with an explicit current time (unix seconds).
    pub fn verify_at(&self, timestamp: &str, body: &[u8], signature_hex: &str, now: i64) -> bool {
        let Some(signature) = decode_signature(signature_hex) else {
            debug!("Trigger signature is not valid hex of the right length");
            return false;
        };

        if let Some(max_skew) = self.max_skew {
            let Ok(sent_at) = timestamp.trim().parse::<i64>() else {
                debug!("Trigger timestamp is not a number");
                return false;
            };
            if now.abs_diff(sent_at) > max_skew.as_secs() {
                debug!(sent_at, now, "Trigger timestamp outside replay window");
                return false;
            }
        }

        let mut message = Vec::with_capacity(timestamp.len() + body.len());
        message.extend_from_slice(timestamp.as_bytes());
        message.extend_from_slice(body);

        self.key.verify(&message, &signature).is_ok()
    }
}

fn decode_signature(signature_hex: &str) -> Option<Signature> {
    let bytes = hex::decode(signature_hex.trim()).ok()?;
    let bytes: [u8; SIGNATURE_LENGTH] = bytes.as_slice().try_into().ok()?;
    Some(Signature::from_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn sign(key: &SigningKey, timestamp: &str, body: &[u8]) -> String {
        let mut message = timestamp.as_bytes().to_vec();
        message.extend_from_slice(body);
        hex::encode(key.sign(&message).to_bytes())
    }

    fn verifier() -> TriggerVerifier {
        TriggerVerifier::from_hex(&hex::encode(signing_key().verifying_key().to_bytes())).unwrap()
    }

    #[test]
    fn test_valid_signature() {
        let body = br#"{"type":1}"#;
        let signature = sign(&signing_key(), "1700000000", body);
        assert!(verifier().verify("1700000000", body, &signature));
    }

    #[test]
    fn test_tampered_inputs_rejected() {
        let body = br#"{"type":2}"#;
        let signature = sign(&signing_key(), "1700000000", body);
        let verifier = verifier();

        assert!(!verifier.verify("1700000001", body, &signature));
        assert!(!verifier.verify("1700000000", br#"{"type":3}"#, &signature));

        let other_key = SigningKey::from_bytes(&[9u8; 32]);
        let forged = sign(&other_key, "1700000000", body);
        assert!(!verifier.verify("1700000000", body, &forged));
    }

    #[test]
    fn test_malformed_signature_is_false() {
        let verifier = verifier();
        assert!(!verifier.verify("1700000000", b"{}", ""));
        assert!(!verifier.verify("1700000000", b"{}", "zz"));
        assert!(!verifier.verify("1700000000", b"{}", &"ab".repeat(63)));
    }

    #[test]
    fn test_replay_window() {
        let body = b"{}";
        let signature = sign(&signing_key(), "1000", body);
        let verifier = verifier().with_max_skew(Duration::from_secs(300));

        assert!(verifier.verify_at("1000", body, &signature, 1200));
        assert!(!verifier.verify_at("1000", body, &signature, 1400));

        let signature = sign(&signing_key(), "soon", body);
        assert!(!verifier.verify_at("soon", body, &signature, 1000));
        // Without a window the timestamp is opaque
        assert!(self::verifier().verify_at("soon", body, &signature, 1000));
    }

    #[test]
    fn test_from_hex_errors() {
        assert!(matches!(
            TriggerVerifier::from_hex("not-hex"),
            Err(VerifierKeyError::InvalidHex(_))
        ));
        assert!(matches!(
            TriggerVerifier::from_hex("abcd"),
            Err(VerifierKeyError::InvalidLength(2))
        ));
    }
}
