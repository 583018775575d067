use argon2::{Config, Variant};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::backend::{Backend, BackendError, ObjectKind};
use crate::host;
use crate::id::Id;

use super::master_key::{CryptoError, MasterKey, KEY_SIZE};

/// Size of the KDF salt in bytes
const SALT_SIZE: usize = 16;

const KDF_ARGON2ID: &str = "argon2id";

/// Errors that can occur while handling key files
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("wrong password for key file")]
    BadPassword,
    #[error("no key file found in repository")]
    NoKeyFound,
    #[error("unsupported key derivation function {0:?}")]
    UnsupportedKdf(String),
    #[error("malformed key file: {0}")]
    Malformed(String),
    #[error("key derivation failed: {0}")]
    Kdf(#[from] argon2::Error),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("key file encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Password hashing parameters, stored alongside the wrapped key.
///
/// The parameter string is bound into the wrap as associated data, so a key
/// file whose parameters were tampered with fails to unwrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub kdf: String,
    /// Memory cost in KiB
    pub m_cost: u32,
    /// Number of passes
    pub t_cost: u32,
    /// Degree of parallelism
    pub p_cost: u32,
}

impl Default for KdfParams {
    /// Argon2id, 64 MiB, 3 passes, 4 lanes
    fn default() -> Self {
        KdfParams {
            kdf: KDF_ARGON2ID.to_string(),
            m_cost: 64 * 1024,
            t_cost: 3,
            p_cost: 4,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests; never use for a real repository
    pub fn weak() -> Self {
        KdfParams {
            kdf: KDF_ARGON2ID.to_string(),
            m_cost: 64,
            t_cost: 1,
            p_cost: 1,
        }
    }

    /// The associated-data string binding these parameters to the wrap
    fn binding(&self) -> Vec<u8> {
        format!("{}:{}:{}:{}", self.kdf, self.m_cost, self.t_cost, self.p_cost).into_bytes()
    }
}

/// A stored key object: the master key wrapped under a password-derived key.
///
/// Key files are plaintext JSON on the backend (there is nothing to decrypt
/// them with yet), named by the SHA-256 of their bytes. Several may coexist,
/// one per password; a session loads exactly one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFile {
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(flatten)]
    pub params: KdfParams,
    /// Hex-encoded KDF salt
    salt: String,
    /// Hex-encoded wrapped master key (`nonce || ciphertext || tag`)
    data: String,
}

impl KeyFile {
    /// Create a key file wrapping a fresh master key under `password`
    pub fn create(password: &str) -> Result<(KeyFile, MasterKey), KeyError> {
        Self::create_with_params(password, KdfParams::default())
    }

    pub fn create_with_params(
        password: &str,
        params: KdfParams,
    ) -> Result<(KeyFile, MasterKey), KeyError> {
        let master = MasterKey::generate();

        let mut salt = [0u8; SALT_SIZE];
        getrandom::getrandom(&mut salt).map_err(|err| CryptoError::Rng(err.to_string()))?;

        let kek = derive_key(password, &salt, &params)?;
        let data = kek.seal(master.bytes(), &params.binding())?;

        let key_file = KeyFile {
            created: OffsetDateTime::now_utc(),
            hostname: host::hostname(),
            username: host::username(),
            params,
            salt: hex::encode(salt),
            data: hex::encode(data),
        };
        Ok((key_file, master))
    }

    /// Recover the master key, or fail with [`KeyError::BadPassword`] if the
    /// supplied password does not match
    pub fn unwrap_key(&self, password: &str) -> Result<MasterKey, KeyError> {
        if self.params.kdf != KDF_ARGON2ID {
            return Err(KeyError::UnsupportedKdf(self.params.kdf.clone()));
        }

        let salt = hex::decode(&self.salt)
            .map_err(|_| KeyError::Malformed("salt is not valid hex".into()))?;
        let data = hex::decode(&self.data)
            .map_err(|_| KeyError::Malformed("key data is not valid hex".into()))?;

        let kek = derive_key(password, &salt, &self.params)?;
        let plain = match kek.open(&data, &self.params.binding()) {
            Ok(plain) => plain,
            Err(CryptoError::AuthenticationFailed) => return Err(KeyError::BadPassword),
            Err(err) => return Err(err.into()),
        };

        let bytes: [u8; KEY_SIZE] = plain
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::Malformed("wrapped key has wrong length".into()))?;
        Ok(MasterKey::from_bytes(bytes))
    }

    /// Write the key file to the backend, named by the digest of its bytes
    pub async fn save(&self, backend: &dyn Backend) -> Result<Id, KeyError> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        let id = Id::digest(&bytes);

        let mut writer = backend.create().await?;
        if let Err(err) = writer.write(&bytes).await {
            writer.discard().await.ok();
            return Err(err.into());
        }
        writer.finalize(ObjectKind::Key, &id.to_hex()).await?;

        debug!(key = %id, "stored key file");
        Ok(id)
    }

    /// Read a key file from the backend by name
    pub async fn load(backend: &dyn Backend, name: &str) -> Result<KeyFile, KeyError> {
        let bytes = backend.read(ObjectKind::Key, name).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn derive_key(password: &str, salt: &[u8], params: &KdfParams) -> Result<MasterKey, KeyError> {
    let config = Config {
        variant: Variant::Argon2id,
        mem_cost: params.m_cost,
        time_cost: params.t_cost,
        lanes: params.p_cost,
        hash_length: KEY_SIZE as u32,
        ..Config::default()
    };
    let derived = argon2::hash_raw(password.as_bytes(), salt, &config)?;
    let bytes: [u8; KEY_SIZE] = derived
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::Malformed("derived key has wrong length".into()))?;
    Ok(MasterKey::from_bytes(bytes))
}

/// Try every key file in the repository against `password`.
///
/// Returns the first master key that unwraps, with the name of the key file
/// it came from. Fails with [`KeyError::BadPassword`] when key files exist
/// but none match, [`KeyError::NoKeyFound`] when the repository has none.
pub async fn search_key(
    backend: &dyn Backend,
    password: &str,
) -> Result<(MasterKey, Id), KeyError> {
    let mut names = backend.list(ObjectKind::Key).await?;
    let mut seen_any = false;

    while let Some(name) = names.recv().await {
        seen_any = true;
        let key_file = match KeyFile::load(backend, &name).await {
            Ok(key_file) => key_file,
            Err(err) => {
                debug!(key = %name, error = %err, "skipping unreadable key file");
                continue;
            }
        };
        match key_file.unwrap_key(password) {
            Ok(master) => {
                let id = Id::from_hex(&name)
                    .map_err(|_| KeyError::Malformed(format!("key file name {name:?}")))?;
                return Ok((master, id));
            }
            Err(KeyError::BadPassword) => continue,
            Err(err) => return Err(err),
        }
    }

    if seen_any {
        Err(KeyError::BadPassword)
    } else {
        Err(KeyError::NoKeyFound)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wrap_unwrap_round_trip() {
        let (key_file, master) = KeyFile::create_with_params("geheim", KdfParams::weak()).unwrap();
        let recovered = key_file.unwrap_key("geheim").unwrap();
        assert_eq!(master.bytes(), recovered.bytes());
    }

    #[test]
    fn test_wrong_password_rejected() {
        let (key_file, _) = KeyFile::create_with_params("geheim", KdfParams::weak()).unwrap();
        assert!(matches!(
            key_file.unwrap_key("falsch"),
            Err(KeyError::BadPassword)
        ));
    }

    #[test]
    fn test_tampered_params_rejected() {
        let (mut key_file, _) =
            KeyFile::create_with_params("geheim", KdfParams::weak()).unwrap();
        // altering the advertised cost must invalidate the wrap
        key_file.params.t_cost = 2;
        key_file.params.m_cost = 128;
        assert!(key_file.unwrap_key("geheim").is_err());
    }

    #[test]
    fn test_unsupported_kdf_rejected() {
        let (mut key_file, _) =
            KeyFile::create_with_params("geheim", KdfParams::weak()).unwrap();
        key_file.params.kdf = "scrypt".to_string();
        assert!(matches!(
            key_file.unwrap_key("geheim"),
            Err(KeyError::UnsupportedKdf(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let (key_file, _) = KeyFile::create_with_params("geheim", KdfParams::weak()).unwrap();
        let json = serde_json::to_vec(&key_file).unwrap();
        let back: KeyFile = serde_json::from_slice(&json).unwrap();
        assert_eq!(key_file.params, back.params);
        assert_eq!(key_file.salt, back.salt);
        assert_eq!(key_file.data, back.data);
        assert!(back.unwrap_key("geheim").is_ok());
    }
}
