//! Signed retraction messages.
//!
//! When an operator deletes a peer, this node asks the peer to drop its
//! mirror record. The request is signed with the local key over
//! `retract|<sender>|<recipient>|<issued_at>`, so it names exactly one
//! receiving node, and is only honored within a short window.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use trellis_types::normalize_mac;

use crate::error::FederationError;
use crate::keys::parse_public_key;

/// Maximum age, in seconds, of a retraction the receiver will honor.
pub const RETRACTION_MAX_AGE_SECS: i64 = 300;

/// Bytes covered by the retraction signature.
pub fn retraction_payload(sender: &str, recipient: &str, issued_at: i64) -> String {
    format!(
        "retract|{}|{}|{issued_at}",
        normalize_mac(sender),
        normalize_mac(recipient)
    )
}

/// Signs a retraction from `sender` to `recipient` issued at `issued_at`
/// (unix seconds).
pub fn sign_retraction(key: &SigningKey, sender: &str, recipient: &str, issued_at: i64) -> String {
    let signature = key.sign(retraction_payload(sender, recipient, issued_at).as_bytes());
    hex::encode(signature.to_bytes())
}

/// Verifies a retraction signature against the sender's stored hex public key.
///
/// `recipient` is the verifying node's own mac; `now` is its clock in unix
/// seconds.
pub fn verify_retraction(
    public_key_hex: &str,
    sender: &str,
    recipient: &str,
    issued_at: i64,
    signature_hex: &str,
    now: i64,
) -> Result<(), FederationError> {
    if (now - issued_at).abs() > RETRACTION_MAX_AGE_SECS {
        return Err(FederationError::InvalidSignature(
            "retraction expired".to_string(),
        ));
    }

    let public_key = parse_public_key(public_key_hex)
        .map_err(|e| FederationError::InvalidSignature(e.to_string()))?;
    let signature_bytes = hex::decode(signature_hex)
        .map_err(|_| FederationError::InvalidSignature("signature is not hex".to_string()))?;
    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|_| FederationError::InvalidSignature("malformed signature".to_string()))?;

    public_key
        .verify(
            retraction_payload(sender, recipient, issued_at).as_bytes(),
            &signature,
        )
        .map_err(|_| FederationError::InvalidSignature("signature mismatch".to_string()))
}
