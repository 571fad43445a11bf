//! Verification of webhook requests sent by Flagsmith.
//!
//! Flagsmith signs webhook request bodies with HMAC-SHA256 using the secret configured for the
//! webhook and sends the hex-encoded signature in the `X-Flagsmith-Signature` header.
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Name of the request header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "X-Flagsmith-Signature";

/// Compute the hex-encoded signature of a webhook request body.
pub fn generate_signature(request_body: impl AsRef<[u8]>, shared_secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(shared_secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(request_body.as_ref());
    hex::encode(mac.finalize().into_bytes())
}

/// Check that `received_signature` was produced for `request_body` with `shared_secret`.
///
/// The comparison runs in constant time.
pub fn verify_signature(
    request_body: impl AsRef<[u8]>,
    received_signature: &str,
    shared_secret: &str,
) -> bool {
    let Ok(received) = hex::decode(received_signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(shared_secret.as_bytes()) else {
        return false;
    };
    mac.update(request_body.as_ref());
    mac.verify_slice(&received).is_ok()
}
