//! External payment provider seam.
//!
//! The provider is a black box: the core only asks it for a checkout
//! reference and lets it vouch for inbound webhook bodies.

use crate::error::BillingError;
use crate::types::Payment;

const WEBHOOK_KEY_CONTEXT: &str = "plotledger payment webhook v1";

pub trait PaymentProvider: Send + Sync {
    /// Name recorded on payments and webhook events.
    fn name(&self) -> &str;

    /// Where the payer is sent to complete the payment.
    fn checkout_url(&self, payment: &Payment) -> String;

    /// Check the signature header that accompanied a webhook body.
    fn verify_signature(&self, body: &[u8], signature: Option<&str>) -> Result<(), BillingError>;
}

/// Keyed BLAKE3 MAC of a webhook body, hex encoded.
pub fn sign_webhook_body(secret: &str, body: &[u8]) -> String {
    let key = blake3::derive_key(WEBHOOK_KEY_CONTEXT, secret.as_bytes());
    blake3::keyed_hash(&key, body).to_hex().to_string()
}

/// Verify a hex signature produced by [`sign_webhook_body`].
pub fn verify_webhook_body(
    secret: &str,
    body: &[u8],
    signature: Option<&str>,
) -> Result<(), BillingError> {
    let raw = signature
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| BillingError::Unauthorized("missing webhook signature".to_string()))?;
    let presented = blake3::Hash::from_hex(raw)
        .map_err(|_| BillingError::Unauthorized("malformed webhook signature".to_string()))?;

    let key = blake3::derive_key(WEBHOOK_KEY_CONTEXT, secret.as_bytes());
    // blake3::Hash equality is constant-time.
    if blake3::keyed_hash(&key, body) == presented {
        Ok(())
    } else {
        Err(BillingError::Unauthorized(
            "webhook signature mismatch".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_roundtrip() {
        let body = br#"{"eventId":"evt_1","status":"SUCCESS"}"#;
        let signature = sign_webhook_body("s3cret", body);
        assert!(verify_webhook_body("s3cret", body, Some(&signature)).is_ok());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let signature = sign_webhook_body("s3cret", b"{\"status\":\"FAILED\"}");
        let err = verify_webhook_body("s3cret", b"{\"status\":\"SUCCESS\"}", Some(&signature))
            .unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");
    }

    #[test]
    fn missing_or_garbage_signature_is_rejected() {
        assert!(verify_webhook_body("s3cret", b"{}", None).is_err());
        assert!(verify_webhook_body("s3cret", b"{}", Some("not-hex")).is_err());
    }
}
