// Session vault cipher: PBKDF2-derived key, AES-256-CBC, PKCS#7 padding.
//
// The blob format is `salt[16] || iv[16] || ciphertext` and carries no MAC
// or AEAD tag. A wrong password or a corrupted file surfaces as a padding
// failure (or later as a parse failure in the session store); decrypt
// success is NOT a tamper-proof integrity check.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{Error, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Salt length in bytes, stored as the first segment of the blob.
pub const SALT_LEN: usize = 16;
/// IV length in bytes, stored directly after the salt.
pub const IV_LEN: usize = 16;
/// PBKDF2-HMAC-SHA256 iteration count.
pub const KDF_ROUNDS: u32 = 100_000;

/// Derive a 256-bit key from a password and salt.
///
/// Deterministic per `(password, salt)` pair; the salt stored in the blob is
/// all that is needed to re-derive the key on decrypt.
pub fn derive_key(password: &[u8], salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password, salt, KDF_ROUNDS, &mut key);
    key
}

/// Encrypt `plaintext`, returning `salt || iv || ciphertext`.
///
/// Salt and IV are drawn fresh from the OS RNG on every call, so two
/// encryptions of identical input never share a key stream.
pub fn encrypt(plaintext: &[u8], password: &str) -> Vec<u8> {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut iv);

    let mut key = derive_key(password.as_bytes(), &salt);
    let ciphertext =
        Aes256CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    key.zeroize();

    let mut blob = Vec::with_capacity(SALT_LEN + IV_LEN + ciphertext.len());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);
    blob
}

/// Decrypt a `salt || iv || ciphertext` blob produced by [`encrypt`].
///
/// Fails with [`Error::Format`] when the blob cannot even contain a salt and
/// IV, and with [`Error::Integrity`] when padding removal rejects the result
/// (wrong password and corruption are indistinguishable here).
pub fn decrypt(blob: &[u8], password: &str) -> Result<Vec<u8>> {
    if blob.len() < SALT_LEN + IV_LEN {
        return Err(Error::Format(format!(
            "encrypted payload is {} bytes, need at least {}",
            blob.len(),
            SALT_LEN + IV_LEN
        )));
    }
    let (salt, rest) = blob.split_at(SALT_LEN);
    let (iv, ciphertext) = rest.split_at(IV_LEN);

    let mut key = derive_key(password.as_bytes(), salt);
    let plaintext = Aes256CbcDec::new_from_slices(&key, iv)
        .map_err(|e| Error::Format(format!("bad key/iv length: {e}")))
        .and_then(|cipher| {
            cipher
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(|_| Error::Integrity)
        });
    key.zeroize();
    plaintext
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_key_is_deterministic() {
        let salt = [7u8; SALT_LEN];
        assert_eq!(derive_key(b"hunter2", &salt), derive_key(b"hunter2", &salt));
    }

    #[test]
    fn derive_key_depends_on_salt() {
        assert_ne!(
            derive_key(b"hunter2", &[0u8; SALT_LEN]),
            derive_key(b"hunter2", &[1u8; SALT_LEN])
        );
    }

    #[test]
    fn derive_key_depends_on_password() {
        let salt = [9u8; SALT_LEN];
        assert_ne!(derive_key(b"hunter2", &salt), derive_key(b"hunter3", &salt));
    }

    #[test]
    fn round_trip() {
        let blob = encrypt(b"attack at dawn", "pw");
        assert_eq!(decrypt(&blob, "pw").unwrap(), b"attack at dawn");
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let blob = encrypt(b"", "pw");
        // PKCS#7 always emits at least one full padding block
        assert_eq!(blob.len(), SALT_LEN + IV_LEN + 16);
        assert_eq!(decrypt(&blob, "pw").unwrap(), b"");
    }

    #[test]
    fn fresh_salt_and_iv_per_call() {
        let a = encrypt(b"same input", "pw");
        let b = encrypt(b"same input", "pw");
        assert_ne!(a, b);
        assert_ne!(&a[..SALT_LEN], &b[..SALT_LEN]);
        assert_ne!(&a[SALT_LEN..SALT_LEN + IV_LEN], &b[SALT_LEN..SALT_LEN + IV_LEN]);
    }

    #[test]
    fn wrong_password_never_reveals_plaintext() {
        let blob = encrypt(b"secret payload", "right");
        match decrypt(&blob, "wrong") {
            Err(Error::Integrity) => {}
            Err(other) => panic!("unexpected error: {other}"),
            // A wrong key can produce a byte that happens to be valid
            // padding; even then the output must not be the plaintext.
            Ok(garbage) => assert_ne!(garbage, b"secret payload"),
        }
    }

    #[test]
    fn short_blob_is_a_format_error() {
        assert!(matches!(decrypt(&[0u8; 31], "pw"), Err(Error::Format(_))));
        assert!(matches!(decrypt(&[], "pw"), Err(Error::Format(_))));
    }

    #[test]
    fn truncated_ciphertext_is_an_integrity_error() {
        let mut blob = encrypt(b"0123456789abcdef0123", "pw");
        blob.truncate(SALT_LEN + IV_LEN + 7); // mid-block
        assert!(matches!(decrypt(&blob, "pw"), Err(Error::Integrity)));
    }

    #[test]
    fn empty_ciphertext_is_an_integrity_error() {
        let blob = encrypt(b"x", "pw");
        assert!(matches!(
            decrypt(&blob[..SALT_LEN + IV_LEN], "pw"),
            Err(Error::Integrity)
        ));
    }
}
