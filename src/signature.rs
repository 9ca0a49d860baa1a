//! Signature Verifier (C1, spec.md §4.1). Fail-closed: any error in deriving
//! or comparing the signature rejects the delivery.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

use crate::errors::IngressError;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// Verifies a GitHub-style signature header against `body` using `secret`.
/// Accepts both `X-Hub-Signature-256: sha256=<hex>` (HMAC-SHA256) and the
/// legacy `X-Hub-Signature: sha1=<hex>` (HMAC-SHA1, spec.md §4.1) — a
/// delivery carrying only the legacy header must still verify, not be
/// rejected as missing. Constant-time: `Mac::verify_slice` compares without
/// early-exit on mismatch.
pub fn verify_signature(
    secret: &str,
    header_value: Option<&str>,
    body: &[u8],
) -> Result<(), IngressError> {
    let header_value = header_value.ok_or(IngressError::MissingSignature)?;

    if let Some(hex_digest) = header_value.strip_prefix("sha256=") {
        let expected = hex::decode(hex_digest).map_err(|_| IngressError::SignatureMismatch)?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(body);
        return mac.verify_slice(&expected).map_err(|_| IngressError::SignatureMismatch);
    }

    if let Some(hex_digest) = header_value.strip_prefix("sha1=") {
        let expected = hex::decode(hex_digest).map_err(|_| IngressError::SignatureMismatch)?;
        let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(body);
        return mac.verify_slice(&expected).map_err(|_| IngressError::SignatureMismatch);
    }

    Err(IngressError::MissingSignature)
}
