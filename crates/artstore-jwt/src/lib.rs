//! Unified RS256 JWT claims, key management and hot-reload, shared by every
//! ArtStore service (spec §3 "JWTKey"/"UnifiedJWT Payload", §4.3 "JWT
//! validation").
//!
//! `admin-module` is the only service that signs tokens and rotates keys;
//! the other three services load the same [`KeyManager`] with no private
//! key configured and only ever call [`KeyManager::validate`].

#![warn(missing_docs)]

mod claims;
mod error;
mod keys;
mod manager;

pub use claims::{TokenType, UnifiedClaims};
pub use error::JwtError;
pub use keys::{JwtKeyPair, ROTATION_VALIDITY};
pub use manager::KeyManager;
