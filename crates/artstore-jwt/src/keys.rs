//! RSA keypair generation and the key-version record used by rotation
//! (spec §3 "JWTKey", §4.3 "Key rotation").

use chrono::{DateTime, Duration, Utc};
use pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use uuid::Uuid;

use crate::error::JwtError;

const RSA_KEY_BITS: usize = 2048;

/// Overlap window a freshly rotated key is granted beyond the 24h it must
/// remain valid for already-issued tokens to expire under it (spec §4.3:
/// new key validity = 24h + 1h overlap = 25h).
pub const ROTATION_VALIDITY: Duration = Duration::hours(25);

/// One versioned RSA signing key, public and private halves plus its
/// rotation bookkeeping.
#[derive(Debug, Clone)]
pub struct JwtKeyPair {
    /// Unique version identifier for this key, carried as the JWT `kid` header.
    pub version: String,
    /// PEM-encoded PKCS#8 public key.
    pub public_key_pem: String,
    /// PEM-encoded PKCS#8 private key. Present only on the issuer side.
    pub private_key_pem: Option<String>,
    /// When this key was generated.
    pub created_at: DateTime<Utc>,
    /// When this key stops being accepted for new signatures (it may still
    /// validate existing tokens until they individually expire).
    pub expires_at: DateTime<Utc>,
    /// Whether new tokens may be signed with this key.
    pub is_active: bool,
    /// How many times this version has been through a rotation cycle.
    pub rotation_count: u32,
}

impl JwtKeyPair {
    /// Generate a fresh RSA-2048 keypair with a new random version ID.
    pub fn generate() -> Result<Self, JwtError> {
        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| JwtError::KeyGeneration(e.to_string()))?;
        let public_key = private_key.to_public_key();

        let private_key_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::Pem(e.to_string()))?
            .to_string();
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| JwtError::Pem(e.to_string()))?;

        let created_at = current_time();
        Ok(Self {
            version: Uuid::new_v4().to_string(),
            public_key_pem,
            private_key_pem: Some(private_key_pem),
            created_at,
            expires_at: created_at + ROTATION_VALIDITY,
            is_active: true,
            rotation_count: 0,
        })
    }

    /// True once `expires_at` has passed.
    pub fn is_expired(&self) -> bool {
        current_time() >= self.expires_at
    }
}

/// Time source indirection. `artstore-jwt` never calls `Utc::now()`
/// directly outside this function, so tests can exercise expiry without
/// sleeping.
fn current_time() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_valid_pem_and_active() {
        let key = JwtKeyPair::generate().expect("keygen");
        assert!(key.public_key_pem.starts_with("-----BEGIN"));
        assert!(key.private_key_pem.as_deref().unwrap().starts_with("-----BEGIN"));
        assert!(key.is_active);
        assert!(!key.is_expired());
        assert_eq!(key.rotation_count, 0);
    }

    #[test]
    fn distinct_keys_get_distinct_versions() {
        let a = JwtKeyPair::generate().unwrap();
        let b = JwtKeyPair::generate().unwrap();
        assert_ne!(a.version, b.version);
        assert_ne!(a.public_key_pem, b.public_key_pem);
    }
}
