use chacha20::{
    cipher::{KeyIvInit, StreamCipher},
    ChaCha20,
};
use std::convert::TryInto;
use thiserror::Error;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("can't convert to array from slice")]
    FromSlice(#[from] std::array::TryFromSliceError),
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("secret must be 32 bytes, got {0}")]
    SecretLength(usize),
    #[error("encrypted value is too short")]
    Truncated,
    #[error("decrypted value is not utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Encrypts and decrypts stored backend credentials with the shared secret.
///
/// Values are `base64(nonce || ciphertext)`, every value gets a fresh nonce.
#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "credential cipher")
    }
}

impl CredentialCipher {
    pub fn new(key: &[u8]) -> Result<Self, EncryptionError> {
        if key.len() != KEY_LEN {
            return Err(EncryptionError::SecretLength(key.len()));
        }
        Ok(CredentialCipher {
            key: key.try_into()?,
        })
    }

    /// Builds the cipher from a base64 encoded secret.
    pub fn from_secret(secret: &str) -> Result<Self, EncryptionError> {
        let key = base64::decode(secret.trim())?;
        CredentialCipher::new(&key)
    }

    pub fn encrypt(&self, plain: &str) -> String {
        let nonce: [u8; NONCE_LEN] = rand::random();
        let mut v = plain.as_bytes().to_vec();
        let mut cipher = ChaCha20::new(&self.key.into(), &nonce.into());
        cipher.apply_keystream(&mut v);

        let mut out = Vec::with_capacity(NONCE_LEN + v.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&v);
        base64::encode(out)
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<String, EncryptionError> {
        let raw = base64::decode(encrypted.trim())?;
        if raw.len() < NONCE_LEN {
            return Err(EncryptionError::Truncated);
        }
        let (nonce, body) = raw.split_at(NONCE_LEN);
        let nonce: [u8; NONCE_LEN] = nonce.try_into()?;
        let mut v = body.to_vec();
        let mut cipher = ChaCha20::new(&self.key.into(), &nonce.into());
        cipher.apply_keystream(&mut v);
        Ok(String::from_utf8(v)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> CredentialCipher {
        CredentialCipher::from_secret(&base64::encode([7u8; 32])).unwrap()
    }

    #[test]
    fn decrypts_what_it_encrypts() {
        let c = cipher();
        let enc = c.encrypt("s3cr3t-key");
        assert_ne!(enc, "s3cr3t-key");
        assert_eq!(c.decrypt(&enc).unwrap(), "s3cr3t-key");
        assert_ne!(c.encrypt("s3cr3t-key"), enc);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            CredentialCipher::from_secret(&base64::encode([1u8; 16])),
            Err(EncryptionError::SecretLength(16))
        ));
        assert!(matches!(
            cipher().decrypt(&base64::encode([1u8; 4])),
            Err(EncryptionError::Truncated)
        ));
        assert!(cipher().decrypt("not base64!").is_err());
    }

    #[test]
    fn wrong_key_does_not_recover_value() {
        let enc = cipher().encrypt("value");
        let other = CredentialCipher::new(&[9u8; 32]).unwrap();
        assert_ne!(other.decrypt(&enc).ok().as_deref(), Some("value"));
    }
}
