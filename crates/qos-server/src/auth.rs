//! JWT issuing and validation for the admin API.
//!
//! Access tokens authorise API and WebSocket requests; refresh tokens are
//! accepted only by the refresh endpoint. Both are HS256 with the
//! configured issuer, and carry a `typ` claim so one can never stand in for
//! the other.

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use qos_core::TokenResponse;
use qos_settings::{AuthSettings, JwtSettings};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Role granted to the configured admin account.
pub const ADMIN_ROLE: &str = "admin";

/// Subject of the configured admin account.
const ADMIN_SUBJECT: &str = "1";

/// Which endpoint a token is good for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Authorises API requests.
    Access,
    /// Exchanged for a new pair.
    Refresh,
}

/// JWT claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Account name.
    pub username: String,
    /// Role name.
    pub role: String,
    /// Token type.
    pub typ: TokenType,
    /// Issuer.
    pub iss: String,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Not before (unix seconds).
    pub nbf: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
}

/// Authentication failures. All map to 401.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No token was presented.
    #[error("missing authorization token")]
    MissingToken,
    /// The header was not `Bearer <token>`.
    #[error("invalid authorization header format")]
    InvalidScheme,
    /// The token has expired.
    #[error("token expired")]
    Expired,
    /// Signature mismatch.
    #[error("invalid token signature")]
    InvalidSignature,
    /// Wrong issuer.
    #[error("invalid token issuer")]
    InvalidIssuer,
    /// A refresh token was used as an access token, or the reverse.
    #[error("wrong token type")]
    WrongType,
    /// Any other decode or validation failure.
    #[error("invalid token")]
    Invalid,
    /// Username or password did not match.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Signing a token failed.
    #[error("failed to issue token: {0}")]
    Issue(String),
}

/// Signs and verifies tokens with one shared secret.
#[derive(Clone)]
pub struct JwtAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    access_ttl: i64,
    refresh_ttl: i64,
}

impl std::fmt::Debug for JwtAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthority")
            .field("issuer", &self.issuer)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl JwtAuthority {
    /// Build from settings. The secret length is checked at settings load.
    pub fn new(settings: &JwtSettings) -> Self {
        Self {
            encoding: EncodingKey::from_secret(settings.secret.as_bytes()),
            decoding: DecodingKey::from_secret(settings.secret.as_bytes()),
            issuer: settings.issuer.clone(),
            access_ttl: settings.access_ttl_secs as i64,
            refresh_ttl: settings.refresh_ttl_secs as i64,
        }
    }

    /// Access token lifetime in seconds.
    pub fn access_ttl(&self) -> i64 {
        self.access_ttl
    }

    /// Sign one token for `sub`.
    pub fn issue(
        &self,
        sub: &str,
        username: &str,
        role: &str,
        typ: TokenType,
    ) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let ttl = match typ {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            sub: sub.to_string(),
            username: username.to_string(),
            role: role.to_string(),
            typ,
            iss: self.issuer.clone(),
            iat: now,
            nbf: now,
            exp: now + ttl,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Issue(e.to_string()))
    }

    /// Sign an access/refresh pair.
    pub fn issue_pair(
        &self,
        sub: &str,
        username: &str,
        role: &str,
    ) -> Result<TokenResponse, AuthError> {
        Ok(TokenResponse {
            access_token: self.issue(sub, username, role, TokenType::Access)?,
            refresh_token: self.issue(sub, username, role, TokenType::Refresh)?,
            expires_in: self.access_ttl,
        })
    }

    /// Validate signature, issuer, expiry, not-before and token type.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_nbf = true;
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
                _ => {
                    debug!(error = %e, "token rejected");
                    AuthError::Invalid
                }
            })?;

        if claims.typ != expected {
            warn!(sub = %claims.sub, "token presented with the wrong type");
            return Err(AuthError::WrongType);
        }
        Ok(claims)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: &str) -> Result<&str, AuthError> {
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidScheme)?
        .trim();
    if token.is_empty() {
        return Err(AuthError::InvalidScheme);
    }
    Ok(token)
}

/// Check login credentials against the configured admin account.
///
/// Returns `(sub, role)` on success.
pub fn check_credentials(
    settings: &AuthSettings,
    username: &str,
    password: &str,
) -> Result<(&'static str, &'static str), AuthError> {
    if username == settings.admin_username && password == settings.admin_password {
        Ok((ADMIN_SUBJECT, ADMIN_ROLE))
    } else {
        Err(AuthError::InvalidCredentials)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn settings() -> JwtSettings {
        JwtSettings {
            secret: "a-test-secret-that-is-long-enough-123".into(),
            ..JwtSettings::default()
        }
    }

    fn authority() -> JwtAuthority {
        JwtAuthority::new(&settings())
    }

    #[test]
    fn access_token_round_trips() {
        let auth = authority();
        let token = auth.issue("1", "admin", ADMIN_ROLE, TokenType::Access).unwrap();
        let claims = auth.verify(&token, TokenType::Access).unwrap();
        assert_eq!(claims.sub, "1");
        assert_eq!(claims.username, "admin");
        assert_eq!(claims.role, "admin");
        assert_eq!(claims.iss, settings().issuer);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn pair_has_distinct_types() {
        let auth = authority();
        let pair = auth.issue_pair("1", "admin", ADMIN_ROLE).unwrap();
        assert_eq!(pair.expires_in, 3600);
        assert!(auth.verify(&pair.refresh_token, TokenType::Refresh).is_ok());
        assert_eq!(
            auth.verify(&pair.refresh_token, TokenType::Access),
            Err(AuthError::WrongType)
        );
        assert_eq!(
            auth.verify(&pair.access_token, TokenType::Refresh),
            Err(AuthError::WrongType)
        );
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = authority()
            .issue("1", "admin", ADMIN_ROLE, TokenType::Access)
            .unwrap();
        let other = JwtAuthority::new(&JwtSettings {
            secret: "another-secret-that-is-long-enough-456".into(),
            ..JwtSettings::default()
        });
        assert_eq!(
            other.verify(&token, TokenType::Access),
            Err(AuthError::InvalidSignature)
        );
    }

    #[test]
    fn wrong_issuer_rejected() {
        let token = authority()
            .issue("1", "admin", ADMIN_ROLE, TokenType::Access)
            .unwrap();
        let other = JwtAuthority::new(&JwtSettings {
            issuer: "someone-else".into(),
            ..settings()
        });
        assert_eq!(
            other.verify(&token, TokenType::Access),
            Err(AuthError::InvalidIssuer)
        );
    }

    #[test]
    fn expired_token_rejected() {
        let auth = authority();
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "1".into(),
            username: "admin".into(),
            role: ADMIN_ROLE.into(),
            typ: TokenType::Access,
            iss: settings().issuer,
            iat: now - 7200,
            nbf: now - 7200,
            exp: now - 3600,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &auth.encoding).unwrap();
        assert_eq!(auth.verify(&token, TokenType::Access), Err(AuthError::Expired));
    }

    #[test]
    fn garbage_rejected() {
        assert_eq!(
            authority().verify("not.a.jwt", TokenType::Access),
            Err(AuthError::Invalid)
        );
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token("Bearer abc.def"), Ok("abc.def"));
        assert_matches!(bearer_token("Basic abc"), Err(AuthError::InvalidScheme));
        assert_matches!(bearer_token("Bearer "), Err(AuthError::InvalidScheme));
        assert_matches!(bearer_token("abc"), Err(AuthError::InvalidScheme));
    }

    #[test]
    fn credentials_match_configured_admin() {
        let s = AuthSettings::default();
        assert_eq!(
            check_credentials(&s, &s.admin_username, &s.admin_password),
            Ok(("1", "admin"))
        );
        assert_eq!(
            check_credentials(&s, &s.admin_username, "wrong-password1"),
            Err(AuthError::InvalidCredentials)
        );
    }

    #[test]
    fn debug_hides_keys() {
        let rendered = format!("{:?}", authority());
        assert!(!rendered.contains("a-test-secret"));
    }
}
