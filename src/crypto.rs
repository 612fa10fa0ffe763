//! Authenticated symmetric encryption for license signatures.
//!
//! Scheme: AES-256-CBC under a SHA-256-derived key, encrypt-then-MAC with
//! HMAC-SHA256 over IV || ciphertext. The encoded output is base64 with `/`
//! swapped for `_` so signatures survive inclusion in URLs; `+` and `=` are
//! left alone, consumers are expected to transport the value verbatim.

use aes::Aes256;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

const IV_LEN: usize = 16;
const MAC_LEN: usize = 32;

/// Encrypt `message` under a key derived from `crypt_seed`, authenticated
/// with `sign_seed`. Seeds of any length are stretched to the exact cipher
/// key size with SHA-256.
pub fn encrypt(message: &[u8], crypt_seed: &str, sign_seed: &str) -> Result<String> {
    let key: [u8; 32] = Sha256::digest(crypt_seed.as_bytes()).into();

    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext =
        Aes256CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(message);

    let mut mac = HmacSha256::new_from_slice(sign_seed.as_bytes())
        .map_err(|_| AppError::Internal("Invalid signing key".into()))?;
    mac.update(&iv);
    mac.update(&ciphertext);
    let tag = mac.finalize().into_bytes();

    let mut raw = Vec::with_capacity(IV_LEN + MAC_LEN + ciphertext.len());
    raw.extend_from_slice(&iv);
    raw.extend_from_slice(&tag);
    raw.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(raw).replace('/', "_"))
}

/// Decode and authenticate `ciphertext`, returning the plaintext only when
/// the MAC verifies. `None` covers every invalid input: bad encoding, short
/// payload, MAC mismatch, bad padding. Decryption is never attempted before
/// the MAC check passes.
pub fn decrypt(ciphertext: &str, crypt_seed: &str, sign_seed: &str) -> Option<Vec<u8>> {
    let raw = BASE64.decode(ciphertext.replace('_', "/")).ok()?;

    if raw.len() < IV_LEN + MAC_LEN {
        return None;
    }

    let (iv, rest) = raw.split_at(IV_LEN);
    let (tag, ct) = rest.split_at(MAC_LEN);

    let mut mac = HmacSha256::new_from_slice(sign_seed.as_bytes()).ok()?;
    mac.update(iv);
    mac.update(ct);
    let expected = mac.finalize().into_bytes();

    if !bool::from(expected.as_slice().ct_eq(tag)) {
        return None;
    }

    let key: [u8; 32] = Sha256::digest(crypt_seed.as_bytes()).into();
    let iv: [u8; IV_LEN] = iv.try_into().ok()?;

    Aes256CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ct)
        .ok()
}

/// 16 random bytes, hex-encoded. Used for generated license keys and the
/// per-license crypto/hmac key pair.
pub fn random_hex_key() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Constant-time string comparison for signature checks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}
