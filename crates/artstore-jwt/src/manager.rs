//! Key loading, hot-reload and the sign/validate surface used by every
//! service (spec §4.3 "JWT validation", grounded on
//! `original_source/admin-module/app/core/jwt_key_manager.py`).
//!
//! The Python original carries an explicit architectural constraint: the
//! file watcher must not be started from the manager's constructor,
//! because no event loop exists yet when the singleton is built. The same
//! shape holds here — [`KeyManager::new`] never touches a runtime, and
//! [`KeyManager::start_watching`] must be called once a tokio runtime is
//! active (typically from a service's `main` after `#[tokio::main]` has
//! entered).

use std::path::PathBuf;
use std::sync::Arc;

use jsonwebtoken::{decode, decode_header, encode, DecodingKey, EncodingKey, Header, Validation};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::RwLock;

use crate::claims::UnifiedClaims;
use crate::error::JwtError;
use crate::keys::JwtKeyPair;

/// At most this many keys are kept active for validation at once (spec
/// §4.3: current signing key plus one prior key during its overlap window).
const MAX_ACTIVE_KEYS: usize = 2;

/// Where a manager's public/private key material comes from: either a
/// mounted file path, or PEM content handed directly (e.g. injected from a
/// Kubernetes secret as an env value).
#[derive(Debug, Clone)]
enum KeySource {
    Path(PathBuf),
    DirectPem(String),
}

impl KeySource {
    fn from_value(value: &str) -> Self {
        if value.trim_start().starts_with("-----BEGIN") {
            KeySource::DirectPem(value.to_string())
        } else {
            KeySource::Path(PathBuf::from(value))
        }
    }

    fn watch_path(&self) -> Option<&std::path::Path> {
        match self {
            KeySource::Path(p) => Some(p.as_path()),
            KeySource::DirectPem(_) => None,
        }
    }

    fn read(&self) -> Result<String, JwtError> {
        match self {
            KeySource::DirectPem(pem) => Ok(pem.clone()),
            KeySource::Path(path) => {
                std::fs::read_to_string(path).map_err(|source| JwtError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        }
    }
}

fn validate_pem(content: &str) -> Result<(), JwtError> {
    if content.trim_start().starts_with("-----BEGIN") {
        Ok(())
    } else {
        Err(JwtError::NotPem)
    }
}

struct KeyManagerState {
    /// Index 0 is the current signing key. Older entries remain for
    /// validation only, until `MAX_ACTIVE_KEYS` is exceeded and they age out.
    keys: Vec<JwtKeyPair>,
}

/// Loads, validates, hot-reloads and rotates RS256 signing keys, and signs
/// or validates [`UnifiedClaims`] tokens against them.
pub struct KeyManager {
    state: RwLock<KeyManagerState>,
    public_key_source: Option<KeySource>,
    private_key_source: Option<KeySource>,
    watcher: std::sync::Mutex<Option<RecommendedWatcher>>,
}

impl KeyManager {
    /// Build a manager around an already-loaded key, e.g. for tests or
    /// single-process deployments. Does not start watching anything.
    pub fn from_keypair(key: JwtKeyPair) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(KeyManagerState { keys: vec![key] }),
            public_key_source: None,
            private_key_source: None,
            watcher: std::sync::Mutex::new(None),
        })
    }

    /// Load signing (optional, issuer side only) and validation key material
    /// from either a file path or direct PEM content. Does not start the
    /// hot-reload watcher — call [`KeyManager::start_watching`] for that
    /// once a tokio runtime is running.
    pub fn load(
        private_key_value: Option<&str>,
        public_key_value: &str,
    ) -> Result<Arc<Self>, JwtError> {
        let public_key_source = KeySource::from_value(public_key_value);
        let private_key_source = private_key_value.map(KeySource::from_value);

        let public_key_pem = public_key_source.read()?;
        validate_pem(&public_key_pem)?;

        let private_key_pem = match &private_key_source {
            Some(src) => {
                let pem = src.read()?;
                validate_pem(&pem)?;
                Some(pem)
            }
            None => None,
        };

        let now = chrono::Utc::now();
        let key = JwtKeyPair {
            version: uuid::Uuid::new_v4().to_string(),
            public_key_pem,
            private_key_pem,
            created_at: now,
            expires_at: now + crate::keys::ROTATION_VALIDITY,
            is_active: true,
            rotation_count: 0,
        };

        Ok(Arc::new(Self {
            state: RwLock::new(KeyManagerState { keys: vec![key] }),
            public_key_source: Some(public_key_source),
            private_key_source,
            watcher: std::sync::Mutex::new(None),
        }))
    }

    /// Sign `claims` with the current primary key, tagging the JWT header
    /// with the key's version as `kid` so validators can select the right
    /// public key directly.
    pub async fn sign(&self, claims: &UnifiedClaims) -> Result<String, JwtError> {
        let state = self.state.read().await;
        let key = state.keys.first().ok_or(JwtError::NoMatchingKey)?;
        let private_pem = key
            .private_key_pem
            .as_deref()
            .ok_or(JwtError::NoMatchingKey)?;

        let mut header = Header::new(jsonwebtoken::Algorithm::RS256);
        header.kid = Some(key.version.clone());

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())?;
        Ok(encode(&header, claims, &encoding_key)?)
    }

    /// Validate `token`, trying the key named by its `kid` header first and
    /// falling back to every active key (oldest-issued tokens may predate
    /// `kid` tagging).
    pub async fn validate(&self, token: &str) -> Result<UnifiedClaims, JwtError> {
        let state = self.state.read().await;
        if state.keys.is_empty() {
            return Err(JwtError::NoMatchingKey);
        }

        let kid = decode_header(token).ok().and_then(|h| h.kid);
        let validation = Validation::new(jsonwebtoken::Algorithm::RS256);

        // Prefer the key matching `kid`, then fall back across the rest —
        // tokens issued before `kid` tagging existed carry no hint.
        let mut candidates: Vec<&JwtKeyPair> = Vec::new();
        if let Some(kid) = &kid {
            candidates.extend(state.keys.iter().filter(|k| &k.version == kid));
        }
        candidates.extend(state.keys.iter().filter(|k| Some(&k.version) != kid.as_ref()));

        let mut last_err: Option<jsonwebtoken::errors::Error> = None;
        for key in candidates {
            let decoding_key = match DecodingKey::from_rsa_pem(key.public_key_pem.as_bytes()) {
                Ok(k) => k,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };
            match decode::<UnifiedClaims>(token, &decoding_key, &validation) {
                Ok(data) => return Ok(data.claims),
                Err(e) => last_err = Some(e),
            }
        }

        match last_err {
            Some(e) => Err(JwtError::InvalidToken(e)),
            None => Err(JwtError::NoMatchingKey),
        }
    }

    /// When the current primary key stops being eligible for new signatures.
    /// Used by admin-module's rotation task to decide whether a rotation is due.
    pub async fn primary_expires_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.state.read().await.keys.first().map(|k| k.expires_at)
    }

    /// Generate a new signing key and promote it to primary, keeping the
    /// previous primary active (for validation of already-issued tokens)
    /// until `MAX_ACTIVE_KEYS` is exceeded.
    pub async fn rotate(&self) -> Result<JwtKeyPair, JwtError> {
        let new_key = JwtKeyPair::generate()?;
        let mut state = self.state.write().await;
        for key in state.keys.iter_mut() {
            key.rotation_count += 1;
        }
        state.keys.insert(0, new_key.clone());
        state.keys.truncate(MAX_ACTIVE_KEYS);
        Ok(new_key)
    }

    /// Drop keys past their `expires_at`, keeping at least the primary key
    /// regardless of its expiry (a service with no rotation configured
    /// must keep validating with what it has).
    pub async fn evict_expired(&self) {
        let mut state = self.state.write().await;
        if state.keys.len() <= 1 {
            return;
        }
        let primary = state.keys.remove(0);
        state.keys.retain(|k| !k.is_expired());
        state.keys.insert(0, primary);
    }

    /// Start watching the configured key file(s) for external changes
    /// (e.g. an operator or secret manager rewriting the mounted PEM).
    /// Must be called after a tokio runtime is running — never from a
    /// constructor, matching the source's `start_watching()` split.
    pub fn start_watching(self: &Arc<Self>) -> Result<(), JwtError> {
        let Some(path) = self
            .public_key_source
            .as_ref()
            .and_then(KeySource::watch_path)
        else {
            return Ok(());
        };
        let watch_dir = path.parent().unwrap_or(path).to_path_buf();

        let handle = tokio::runtime::Handle::current();
        let manager = Arc::clone(self);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if event.kind.is_modify() || event.kind.is_create() {
                    let manager = Arc::clone(&manager);
                    handle.spawn(async move {
                        if let Err(e) = manager.reload_from_disk().await {
                            tracing::warn!(error = %e, "jwt key hot-reload failed, keeping previous key");
                        } else {
                            tracing::info!("jwt signing/validation key reloaded from disk");
                        }
                    });
                }
            }
        })
        .map_err(|e| JwtError::KeyGeneration(e.to_string()))?;

        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| JwtError::KeyGeneration(e.to_string()))?;

        *self.watcher.lock().unwrap() = Some(watcher);
        Ok(())
    }

    /// Re-read key material from disk, validate it, and swap the primary
    /// key's PEM content in place. On any failure the previous key is kept
    /// untouched and the error is returned for the caller to log.
    async fn reload_from_disk(&self) -> Result<(), JwtError> {
        let Some(public_source) = &self.public_key_source else {
            return Ok(());
        };
        let new_public_pem = public_source.read()?;
        validate_pem(&new_public_pem)?;

        let new_private_pem = match &self.private_key_source {
            Some(src) => {
                let pem = src.read()?;
                validate_pem(&pem)?;
                Some(pem)
            }
            None => None,
        };

        let mut state = self.state.write().await;
        if let Some(primary) = state.keys.first_mut() {
            primary.public_key_pem = new_public_pem;
            if new_private_pem.is_some() {
                primary.private_key_pem = new_private_pem;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::TokenType;

    fn sample_claims() -> UnifiedClaims {
        let now = chrono::Utc::now().timestamp();
        UnifiedClaims {
            sub: "user-1".into(),
            token_type_raw: "admin_user".into(),
            role: "ADMIN".into(),
            name: "Alice".into(),
            jti: uuid::Uuid::new_v4().to_string(),
            iat: now,
            exp: now + 3600,
            nbf: now - 1,
            client_id: None,
            rate_limit: None,
        }
    }

    #[tokio::test]
    async fn signs_and_validates_round_trip() {
        let key = JwtKeyPair::generate().unwrap();
        let manager = KeyManager::from_keypair(key);

        let claims = sample_claims();
        let token = manager.sign(&claims).await.unwrap();
        let validated = manager.validate(&token).await.unwrap();

        assert_eq!(validated.sub, claims.sub);
        assert_eq!(validated.token_type(), TokenType::AdminUser);
    }

    #[tokio::test]
    async fn rotate_keeps_old_key_valid_for_existing_tokens() {
        let key = JwtKeyPair::generate().unwrap();
        let manager = KeyManager::from_keypair(key);

        let old_token = manager.sign(&sample_claims()).await.unwrap();
        manager.rotate().await.unwrap();
        let new_token = manager.sign(&sample_claims()).await.unwrap();

        assert!(manager.validate(&old_token).await.is_ok());
        assert!(manager.validate(&new_token).await.is_ok());
    }

    #[tokio::test]
    async fn rotate_caps_active_keys_at_two() {
        let key = JwtKeyPair::generate().unwrap();
        let manager = KeyManager::from_keypair(key);
        manager.rotate().await.unwrap();
        manager.rotate().await.unwrap();
        let state = manager.state.read().await;
        assert_eq!(state.keys.len(), MAX_ACTIVE_KEYS);
    }

    #[tokio::test]
    async fn tampered_token_is_rejected() {
        let key = JwtKeyPair::generate().unwrap();
        let manager = KeyManager::from_keypair(key);
        let mut token = manager.sign(&sample_claims()).await.unwrap();
        token.push('x');
        assert!(manager.validate(&token).await.is_err());
    }
}
