//! The UnifiedJWT claim schema (spec §3 "UnifiedJWT Payload").
//!
//! Per Design Note §9: the dynamic claim map of the source is modeled as a
//! struct of required fields plus an optional `client_id`/`rate_limit`
//! pair, and `token_type()` derives the logical type by a function rather
//! than duck-typing on whatever keys happen to be present.

use serde::{Deserialize, Serialize};

/// The logical principal type of a validated token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    /// A human administrator.
    AdminUser,
    /// A machine client authenticated via OAuth2 client-credentials.
    ServiceAccount,
}

/// Claims carried by every ArtStore-issued JWT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedClaims {
    /// Subject: user ID or service-account ID.
    pub sub: String,
    /// Raw `type` claim. New issuers emit only `"admin_user"` or
    /// `"service_account"`; legacy `"access"`/`"refresh"` values are
    /// accepted on the validation side for backward compatibility (spec
    /// §9 open question, preserved as-is).
    #[serde(rename = "type")]
    pub token_type_raw: String,
    /// Role name (e.g. `"ADMIN"`, `"OPERATOR"`, `"READONLY"`).
    pub role: String,
    /// Display name of the principal.
    pub name: String,
    /// JWT ID, unique per issued token.
    pub jti: String,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Expiration, Unix seconds.
    pub exp: i64,
    /// Not-before, Unix seconds.
    pub nbf: i64,
    /// OAuth2 client ID, present for service-account tokens. Service
    /// accounts' client IDs are conventionally prefixed `sa_`, which is
    /// what lets a legacy `"access"`/`"refresh"` token be classified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Requests-per-minute budget for the rate limiter, service accounts only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
}

impl UnifiedClaims {
    /// Derive the logical token type from `type` plus, for legacy tokens,
    /// the `sa_` prefix convention on `client_id`.
    pub fn token_type(&self) -> TokenType {
        match self.token_type_raw.as_str() {
            "admin_user" => TokenType::AdminUser,
            "service_account" => TokenType::ServiceAccount,
            // Legacy issuers used "access"/"refresh" for both principal
            // kinds; service-accountness is inferred from the client_id
            // prefix instead.
            _ => {
                let is_service_account = self
                    .client_id
                    .as_deref()
                    .is_some_and(|id| id.starts_with("sa_"));
                if is_service_account {
                    TokenType::ServiceAccount
                } else {
                    TokenType::AdminUser
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(token_type_raw: &str, client_id: Option<&str>) -> UnifiedClaims {
        UnifiedClaims {
            sub: "u1".into(),
            token_type_raw: token_type_raw.into(),
            role: "ADMIN".into(),
            name: "Alice".into(),
            jti: "j1".into(),
            iat: 0,
            exp: 100,
            nbf: 0,
            client_id: client_id.map(str::to_string),
            rate_limit: None,
        }
    }

    #[test]
    fn unified_types_map_directly() {
        assert_eq!(base("admin_user", None).token_type(), TokenType::AdminUser);
        assert_eq!(
            base("service_account", Some("sa_abc")).token_type(),
            TokenType::ServiceAccount
        );
    }

    #[test]
    fn legacy_access_infers_from_client_id_prefix() {
        assert_eq!(
            base("access", Some("sa_machine1")).token_type(),
            TokenType::ServiceAccount
        );
        assert_eq!(base("access", None).token_type(), TokenType::AdminUser);
        assert_eq!(base("refresh", Some("not-sa")).token_type(), TokenType::AdminUser);
    }
}
