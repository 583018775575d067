//! Authenticated encryption of stored objects and master key management.
//!
//! Every object body is framed as `nonce (12) || ciphertext || tag (16)`
//! under ChaCha20-Poly1305; there is no plaintext header. The master key is
//! random, lives only in memory, and is persisted exclusively inside a
//! password-wrapped key file.

mod key_file;
mod master_key;

pub use key_file::{search_key, KdfParams, KeyError, KeyFile};
pub use master_key::{CryptoError, MasterKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
