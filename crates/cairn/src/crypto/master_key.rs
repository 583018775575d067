use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the master key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;
/// Size of the ChaCha20-Poly1305 nonce in bytes
pub const NONCE_SIZE: usize = 12;
/// Size of the Poly1305 authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Errors that can occur during encryption/decryption
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("ciphertext failed authentication")]
    AuthenticationFailed,
    #[error("ciphertext too short: {0} bytes")]
    TruncatedCiphertext(usize),
    #[error("random generator failure: {0}")]
    Rng(String),
}

/// The repository master key.
///
/// 256 bits of randomness used to encrypt and authenticate every stored
/// object. Never written to disk in the clear; wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_SIZE]);

impl MasterKey {
    /// Generate a fresh random master key
    pub fn generate() -> Self {
        let mut buff = [0; KEY_SIZE];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        MasterKey(buff)
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        MasterKey(bytes)
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encrypt and authenticate an opaque payload.
    ///
    /// Output framing is `nonce (12 bytes) || ciphertext || tag (16 bytes)`
    /// with a fresh random nonce per call.
    pub fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.seal(plain, b"")
    }

    /// Decrypt a payload produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.open(data, b"")
    }

    pub(crate) fn seal(&self, plain: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes)
            .map_err(|err| CryptoError::Rng(err.to_string()))?;
        self.seal_with_nonce(plain, aad, nonce_bytes)
    }

    pub(crate) fn seal_with_nonce(
        &self,
        plain: &[u8],
        aad: &[u8],
        nonce_bytes: [u8; NONCE_SIZE],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, Payload { msg: plain, aad })
            .map_err(|_| CryptoError::AuthenticationFailed)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Derive a nonce from key and nonce material.
    ///
    /// The nonce repeats only when the material repeats, and with the same
    /// material the whole ciphertext repeats too. Sealing object payloads
    /// under a nonce derived from their plaintext id makes encryption
    /// convergent: concurrent writers of the same plaintext produce the
    /// same stored bytes under the same name, which is what keeps saves
    /// idempotent under races.
    pub(crate) fn derive_nonce(&self, material: &[u8]) -> [u8; NONCE_SIZE] {
        let mut hasher = Sha256::new();
        hasher.update(self.0);
        hasher.update(material);
        let digest = hasher.finalize();
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&digest[..NONCE_SIZE]);
        nonce
    }

    pub(crate) fn open(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::TruncatedCiphertext(data.len()));
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);
        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &data[NONCE_SIZE..],
                    aad,
                },
            )
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

impl fmt::Debug for MasterKey {
    // never log key material
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(..)")
    }
}
