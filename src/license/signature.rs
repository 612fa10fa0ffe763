//! Per-license signature generation and verification.
//!
//! A signature is the authenticated encryption of `domain|slug|key|id`
//! under the license record's own `crypto_key`/`hmac_key` pair. Because the
//! keys live on the record, a signature is bound to that exact license: the
//! same domain signed for another record never verifies.

use crate::crypto;
use crate::error::Result;
use crate::models::License;

/// Escape hatch for deployments that need to accept specific licenses
/// without a signature check (administrative overrides, migrations).
/// Default is off for every license.
pub trait SignatureBypass: Send + Sync {
    fn bypass(&self, license: &License) -> bool;
}

pub struct NoSignatureBypass;

impl SignatureBypass for NoSignatureBypass {
    fn bypass(&self, _license: &License) -> bool {
        false
    }
}

/// Signs `domain` for this license.
pub fn generate_signature(license: &License, domain: &str) -> Result<String> {
    let payload = format!(
        "{}|{}|{}|{}",
        domain, license.package_slug, license.license_key, license.id
    );

    crypto::encrypt(payload.as_bytes(), &license.crypto_key, &license.hmac_key)
}

/// Verifies a signature against this license.
///
/// Requires the decrypted payload to carry a domain present in the
/// license's allowed list and the license's own package slug. A failed
/// decryption (wrong keys, tampered data) is an ordinary `false`.
pub fn verify_signature(license: &License, signature: &str) -> bool {
    if signature.is_empty() {
        return false;
    }

    let Some(payload) = crypto::decrypt(signature, &license.crypto_key, &license.hmac_key) else {
        return false;
    };

    let Ok(payload) = String::from_utf8(payload) else {
        return false;
    };

    let mut parts = payload.split('|');
    let domain = parts.next().unwrap_or("");
    let package_slug = parts.next().unwrap_or("");

    license.has_domain(domain) && license.package_slug == package_slug
}
