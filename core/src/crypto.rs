//! Crypto envelope: AES-256-GCM body encryption with an RSA-OAEP-wrapped
//! session key.
//!
//! The session key and nonce are drawn from the OS RNG per frame; the wrapped
//! key blob, nonce, and authentication tag travel inside the frame's
//! FEC-protected region. Any unwrap or tag mismatch is `AuthFailed` and is
//! never retried.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::{Result, SonicLinkError};

pub const SESSION_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const WRAPPED_KEY_LEN: usize = 256;
pub const RSA_BITS: usize = 2048;

/// Key material collaborator: wraps and unwraps 32-byte session keys.
///
/// Any compliant asymmetric primitive works; [`RsaKeys`] is the stock
/// RSA-2048 OAEP(SHA-256) implementation.
pub trait KeyProvider {
    fn wrap_key(&self, key: &[u8; SESSION_KEY_LEN]) -> Result<[u8; WRAPPED_KEY_LEN]>;
    fn unwrap_key(&self, blob: &[u8; WRAPPED_KEY_LEN]) -> Result<[u8; SESSION_KEY_LEN]>;
}

/// RSA key material. A sender needs the recipient's public half; a receiver
/// needs the private half.
pub struct RsaKeys {
    public: Option<RsaPublicKey>,
    private: Option<RsaPrivateKey>,
}

impl RsaKeys {
    /// Generate a fresh 2048-bit key pair.
    pub fn generate() -> Result<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, RSA_BITS)
            .map_err(|e| SonicLinkError::CryptoFailure(e.to_string()))?;
        let public = private.to_public_key();
        Ok(Self {
            public: Some(public),
            private: Some(private),
        })
    }

    pub fn from_public_pem(pem: &str) -> Result<Self> {
        let public = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| SonicLinkError::CryptoFailure(e.to_string()))?;
        Ok(Self {
            public: Some(public),
            private: None,
        })
    }

    pub fn from_private_pem(pem: &str) -> Result<Self> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| SonicLinkError::CryptoFailure(e.to_string()))?;
        let public = private.to_public_key();
        Ok(Self {
            public: Some(public),
            private: Some(private),
        })
    }

    pub fn public_pem(&self) -> Result<String> {
        let public = self
            .public
            .as_ref()
            .ok_or(SonicLinkError::KeyRequired("public key"))?;
        public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| SonicLinkError::CryptoFailure(e.to_string()))
    }

    pub fn private_pem(&self) -> Result<String> {
        let private = self
            .private
            .as_ref()
            .ok_or(SonicLinkError::KeyRequired("private key"))?;
        let pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| SonicLinkError::CryptoFailure(e.to_string()))?;
        Ok(pem.to_string())
    }
}

impl KeyProvider for RsaKeys {
    fn wrap_key(&self, key: &[u8; SESSION_KEY_LEN]) -> Result<[u8; WRAPPED_KEY_LEN]> {
        let public = self
            .public
            .as_ref()
            .ok_or(SonicLinkError::KeyRequired("recipient public key"))?;
        let blob = public
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key)
            .map_err(|e| SonicLinkError::CryptoFailure(e.to_string()))?;
        blob.try_into()
            .map_err(|_| SonicLinkError::CryptoFailure("unexpected wrapped key size".to_string()))
    }

    fn unwrap_key(&self, blob: &[u8; WRAPPED_KEY_LEN]) -> Result<[u8; SESSION_KEY_LEN]> {
        let private = self
            .private
            .as_ref()
            .ok_or(SonicLinkError::KeyRequired("private key"))?;
        let key = private
            .decrypt(Oaep::new::<Sha256>(), blob)
            .map_err(|_| SonicLinkError::AuthFailed)?;
        key.try_into().map_err(|_| SonicLinkError::AuthFailed)
    }
}

/// A sealed frame body.
pub struct Envelope {
    pub wrapped_key: [u8; WRAPPED_KEY_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

/// Seal `plaintext` under a fresh session key wrapped for the recipient.
pub fn seal(keys: &dyn KeyProvider, plaintext: &[u8]) -> Result<Envelope> {
    let mut key = [0u8; SESSION_KEY_LEN];
    OsRng.fill_bytes(&mut key);
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let mut ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| SonicLinkError::CryptoFailure("AEAD seal failed".to_string()))?;
    let tag_offset = ciphertext.len() - TAG_LEN;
    let tag: [u8; TAG_LEN] = ciphertext[tag_offset..]
        .try_into()
        .map_err(|_| SonicLinkError::CryptoFailure("AEAD tag missing".to_string()))?;
    ciphertext.truncate(tag_offset);

    let wrapped_key = keys.wrap_key(&key)?;
    Ok(Envelope {
        wrapped_key,
        nonce,
        ciphertext,
        tag,
    })
}

/// Unwrap the session key and verify/decrypt the body.
pub fn open(keys: &dyn KeyProvider, envelope: &Envelope) -> Result<Vec<u8>> {
    let key = keys.unwrap_key(&envelope.wrapped_key)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let mut buf = Vec::with_capacity(envelope.ciphertext.len() + TAG_LEN);
    buf.extend_from_slice(&envelope.ciphertext);
    buf.extend_from_slice(&envelope.tag);
    cipher
        .decrypt(Nonce::from_slice(&envelope.nonce), buf.as_slice())
        .map_err(|_| SonicLinkError::AuthFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_roundtrip_and_tamper() {
        let keys = RsaKeys::generate().unwrap();
        let plaintext = b"secret payload over sound";

        let envelope = seal(&keys, plaintext).unwrap();
        assert_eq!(envelope.ciphertext.len(), plaintext.len());
        assert_eq!(open(&keys, &envelope).unwrap(), plaintext);

        // Single-bit flip in the ciphertext is rejected.
        let mut bad = seal(&keys, plaintext).unwrap();
        bad.ciphertext[0] ^= 0x01;
        assert!(matches!(open(&keys, &bad), Err(SonicLinkError::AuthFailed)));

        // Single-bit flip in the tag is rejected.
        let mut bad = seal(&keys, plaintext).unwrap();
        bad.tag[0] ^= 0x01;
        assert!(matches!(open(&keys, &bad), Err(SonicLinkError::AuthFailed)));

        // Corrupted wrapped key is rejected without an oracle.
        let mut bad = seal(&keys, plaintext).unwrap();
        bad.wrapped_key[10] ^= 0xFF;
        assert!(matches!(open(&keys, &bad), Err(SonicLinkError::AuthFailed)));

        // Empty plaintext seals to a tag-only envelope.
        let envelope = seal(&keys, b"").unwrap();
        assert!(envelope.ciphertext.is_empty());
        assert!(open(&keys, &envelope).unwrap().is_empty());

        // PEM roundtrip keeps both halves usable.
        let public_only = RsaKeys::from_public_pem(&keys.public_pem().unwrap()).unwrap();
        let restored = RsaKeys::from_private_pem(&keys.private_pem().unwrap()).unwrap();
        let envelope = seal(&public_only, plaintext).unwrap();
        assert_eq!(open(&restored, &envelope).unwrap(), plaintext);
        assert!(matches!(
            open(&public_only, &envelope),
            Err(SonicLinkError::KeyRequired(_))
        ));
    }
}
