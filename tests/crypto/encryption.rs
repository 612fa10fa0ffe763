use depot::crypto::{constant_time_eq, decrypt, encrypt, random_hex_key};

#[test]
fn round_trip() {
    let ciphertext = encrypt(b"example.com|acme-plugin|key|id", "crypt-seed", "sign-seed").unwrap();
    let plaintext = decrypt(&ciphertext, "crypt-seed", "sign-seed").unwrap();

    assert_eq!(plaintext, b"example.com|acme-plugin|key|id");
}

#[test]
fn output_is_url_safe() {
    // '/' is the only base64 character swapped; over enough samples at
    // least one would contain it if the substitution were missing.
    for _ in 0..50 {
        let ciphertext = encrypt(b"some message padded out to a few blocks", "c", "s").unwrap();
        assert!(!ciphertext.contains('/'));
    }
}

#[test]
fn tampered_ciphertext_is_rejected() {
    let ciphertext = encrypt(b"message", "crypt-seed", "sign-seed").unwrap();

    // Flip one character in the middle of the encoding to another base64
    // character; the MAC check must fail before any decryption happens.
    let mid = ciphertext.len() / 2;
    let original = ciphertext.as_bytes()[mid];
    let replacement = if original == b'A' { b'B' } else { b'A' };
    let mut tampered = ciphertext.into_bytes();
    tampered[mid] = replacement;
    let tampered = String::from_utf8(tampered).unwrap();

    assert!(decrypt(&tampered, "crypt-seed", "sign-seed").is_none());
}

#[test]
fn wrong_sign_seed_is_rejected() {
    let ciphertext = encrypt(b"message", "crypt-seed", "sign-seed").unwrap();
    assert!(decrypt(&ciphertext, "crypt-seed", "other-seed").is_none());
}

#[test]
fn garbage_input_is_rejected() {
    assert!(decrypt("", "c", "s").is_none());
    assert!(decrypt("not base64 at all!!!", "c", "s").is_none());
    assert!(decrypt("QQ==", "c", "s").is_none());
}

#[test]
fn random_keys_are_hex_and_unique() {
    let a = random_hex_key();
    let b = random_hex_key();

    assert_eq!(a.len(), 32);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(a, b);
}

#[test]
fn constant_time_eq_compares_values() {
    assert!(constant_time_eq("abc", "abc"));
    assert!(!constant_time_eq("abc", "abd"));
    assert!(!constant_time_eq("abc", "abcd"));
}
