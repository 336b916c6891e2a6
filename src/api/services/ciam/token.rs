//! JWT issue, parse, and validation.
//!
//! Tokens are EdDSA-signed JWTs with millisecond `iat`/`exp` claims. The
//! signing primitive is the injected [`TokenSigner`], so the private key may
//! live out of process; validation needs only the public key.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::services::signing::{SigningError, TokenSigner};

use super::role::{Quotas, Role};
use super::CiamError;

/// Fixed token issuer claim.
pub const ISSUER: &str = "https://ciam.diagramastext.dev";
/// Fixed token audience claim.
pub const AUDIENCE: &str = "https://diagramastext.dev";

// OKTA defaults: https://support.okta.com/help/s/article/What-is-the-lifetime-of-the-JWT-tokens
const ID_TOKEN_TTL_MS: i64 = 60 * 60 * 1000;
const ACCESS_TOKEN_TTL_MS: i64 = 60 * 60 * 1000;
const REFRESH_TOKEN_TTL_MS: i64 = 2400 * 60 * 60 * 1000;

fn header_segment() -> String {
    URL_SAFE_NO_PAD.encode(br#"{"alg":"EdDSA","typ":"JWT"}"#)
}

/// Claims shared by all token variants. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StdClaims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

impl StdClaims {
    fn new(user_id: &str, iat: DateTime<Utc>, ttl_ms: i64) -> Self {
        let iat = iat.timestamp_millis();
        Self {
            sub: user_id.to_string(),
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
            iat,
            exp: iat + ttl_ms,
        }
    }

    fn validate(&self, now_ms: i64) -> Result<(), CiamError> {
        if self.iss != ISSUER {
            return Err(CiamError::InvalidToken("wrong issuer".to_string()));
        }
        if self.aud != AUDIENCE {
            return Err(CiamError::InvalidToken("wrong audience".to_string()));
        }
        if self.exp <= now_ms {
            return Err(CiamError::InvalidToken("token expired".to_string()));
        }
        if self.iat > self.exp || self.iat > now_ms {
            return Err(CiamError::InvalidToken("faulty iat".to_string()));
        }
        Ok(())
    }
}

/// ID token payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdClaims {
    #[serde(flatten)]
    pub std: StdClaims,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
}

/// Access token payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    #[serde(flatten)]
    pub std: StdClaims,
    pub role: Role,
    pub quotas: Quotas,
}

/// Refresh token payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    #[serde(flatten)]
    pub std: StdClaims,
}

fn none_if_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Issues and parses all three token variants over a [`TokenSigner`].
#[derive(Clone)]
pub struct TokenIssuer {
    signer: Arc<dyn TokenSigner>,
}

impl TokenIssuer {
    pub fn new(signer: Arc<dyn TokenSigner>) -> Self {
        Self { signer }
    }

    async fn sign_claims<T: Serialize>(&self, claims: &T) -> Result<String, CiamError> {
        let payload =
            serde_json::to_vec(claims).map_err(|e| CiamError::Serialization(e.to_string()))?;
        let signing_string = format!("{}.{}", header_segment(), URL_SAFE_NO_PAD.encode(payload));
        let (signature, _alg) = self
            .signer
            .sign(&signing_string)
            .await
            .map_err(|e| CiamError::Signing(e.to_string()))?;
        Ok(format!("{signing_string}.{signature}"))
    }

    pub async fn new_id_token(
        &self,
        user_id: &str,
        email: &str,
        fingerprint: &str,
        email_verified: bool,
        iat: DateTime<Utc>,
    ) -> Result<String, CiamError> {
        let claims = IdClaims {
            std: StdClaims::new(user_id, iat, ID_TOKEN_TTL_MS),
            email: none_if_empty(email),
            fingerprint: none_if_empty(fingerprint),
            email_verified,
        };
        self.sign_claims(&claims).await
    }

    pub async fn new_access_token(
        &self,
        user_id: &str,
        role: Role,
        iat: DateTime<Utc>,
    ) -> Result<String, CiamError> {
        let claims = AccessClaims {
            std: StdClaims::new(user_id, iat, ACCESS_TOKEN_TTL_MS),
            role,
            quotas: role.quotas(),
        };
        self.sign_claims(&claims).await
    }

    pub async fn new_refresh_token(
        &self,
        user_id: &str,
        iat: DateTime<Utc>,
    ) -> Result<String, CiamError> {
        let claims = RefreshClaims {
            std: StdClaims::new(user_id, iat, REFRESH_TOKEN_TTL_MS),
        };
        self.sign_claims(&claims).await
    }

    /// Split the token, verify the signature, and deserialize the payload.
    /// Claim validation is the caller's step.
    async fn parse_payload<T: DeserializeOwned>(&self, token: &str) -> Result<T, CiamError> {
        let els: Vec<&str> = token.split('.').collect();
        if els.len() < 3 {
            return Err(CiamError::InvalidToken("wrong token format".to_string()));
        }

        let signing_string = format!("{}.{}", els[0], els[1]);
        self.signer
            .verify(&signing_string, els[2])
            .await
            .map_err(|e| match e {
                SigningError::Unavailable(m) => CiamError::Signing(m),
                _ => CiamError::InvalidToken("wrong signature".to_string()),
            })?;

        let payload = URL_SAFE_NO_PAD
            .decode(els[1])
            .map_err(|_| CiamError::InvalidToken("wrong payload format".to_string()))?;
        serde_json::from_slice(&payload)
            .map_err(|_| CiamError::InvalidToken("cannot deserialize payload".to_string()))
    }

    pub async fn parse_id_token(&self, token: &str) -> Result<IdClaims, CiamError> {
        let claims: IdClaims = self.parse_payload(token).await?;
        claims.std.validate(Utc::now().timestamp_millis())?;
        Ok(claims)
    }

    pub async fn parse_refresh_token(&self, token: &str) -> Result<RefreshClaims, CiamError> {
        let claims: RefreshClaims = self.parse_payload(token).await?;
        claims.std.validate(Utc::now().timestamp_millis())?;
        Ok(claims)
    }

    /// Parse an access token; beyond the standard claims, the embedded
    /// quotas must equal the canonical quotas of the embedded role.
    pub async fn parse_access_token(&self, token: &str) -> Result<AccessClaims, CiamError> {
        let claims: AccessClaims = self.parse_payload(token).await?;
        claims.std.validate(Utc::now().timestamp_millis())?;
        if claims.quotas != claims.role.quotas() {
            return Err(CiamError::StaleAccessToken);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::signing::LocalSigner;
    use chrono::Duration;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(Arc::new(LocalSigner::new(SigningKey::generate(&mut OsRng))))
    }

    #[tokio::test]
    async fn test_access_token_round_trip() {
        let issuer = issuer();
        let token = issuer
            .new_access_token("user-0", Role::Anonym, Utc::now())
            .await
            .unwrap();

        let claims = issuer.parse_access_token(&token).await.unwrap();
        assert_eq!(claims.std.sub, "user-0");
        assert_eq!(claims.std.iss, ISSUER);
        assert_eq!(claims.std.aud, AUDIENCE);
        assert_eq!(claims.role, Role::Anonym);
        assert_eq!(claims.quotas, Role::Anonym.quotas());
        assert_eq!(claims.std.exp - claims.std.iat, ACCESS_TOKEN_TTL_MS);
    }

    #[tokio::test]
    async fn test_id_token_optional_claims() {
        let issuer = issuer();
        let token = issuer
            .new_id_token("user-0", "", "fp", false, Utc::now())
            .await
            .unwrap();

        let claims = issuer.parse_id_token(&token).await.unwrap();
        assert_eq!(claims.email, None);
        assert_eq!(claims.fingerprint.as_deref(), Some("fp"));
        assert!(!claims.email_verified);
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let issuer = issuer();
        let token = issuer
            .new_access_token("user-0", Role::Anonym, Utc::now() - Duration::hours(2))
            .await
            .unwrap();
        assert!(matches!(
            issuer.parse_access_token(&token).await.unwrap_err(),
            CiamError::InvalidToken(msg) if msg == "token expired"
        ));
    }

    #[tokio::test]
    async fn test_future_iat_is_rejected() {
        let issuer = issuer();
        let token = issuer
            .new_refresh_token("user-0", Utc::now() + Duration::minutes(5))
            .await
            .unwrap();
        assert!(matches!(
            issuer.parse_refresh_token(&token).await.unwrap_err(),
            CiamError::InvalidToken(msg) if msg == "faulty iat"
        ));
    }

    #[tokio::test]
    async fn test_stale_quotas_are_rejected() {
        let issuer = issuer();
        let mut quotas = Role::Anonym.quotas();
        quotas.prompt_length_max += 1;
        let claims = AccessClaims {
            std: StdClaims::new("user-0", Utc::now(), ACCESS_TOKEN_TTL_MS),
            role: Role::Anonym,
            quotas,
        };
        let token = issuer.sign_claims(&claims).await.unwrap();
        assert!(matches!(
            issuer.parse_access_token(&token).await.unwrap_err(),
            CiamError::StaleAccessToken
        ));
    }

    #[tokio::test]
    async fn test_foreign_signature_is_rejected() {
        let token = issuer()
            .new_access_token("user-0", Role::Anonym, Utc::now())
            .await
            .unwrap();
        // a different issuer holds a different key
        assert!(matches!(
            issuer().parse_access_token(&token).await.unwrap_err(),
            CiamError::InvalidToken(_)
        ));
    }

    #[tokio::test]
    async fn test_malformed_token_is_rejected() {
        assert!(matches!(
            issuer().parse_access_token("a.b").await.unwrap_err(),
            CiamError::InvalidToken(msg) if msg == "wrong token format"
        ));
    }

    #[tokio::test]
    async fn test_wrong_issuer_claim_is_rejected() {
        let issuer = issuer();
        let claims = RefreshClaims {
            std: StdClaims {
                iss: "https://elsewhere.example".to_string(),
                ..StdClaims::new("user-0", Utc::now(), REFRESH_TOKEN_TTL_MS)
            },
        };
        let token = issuer.sign_claims(&claims).await.unwrap();
        assert!(matches!(
            issuer.parse_refresh_token(&token).await.unwrap_err(),
            CiamError::InvalidToken(msg) if msg == "wrong issuer"
        ));
    }

    #[tokio::test]
    async fn test_header_is_fixed() {
        let token = issuer()
            .new_refresh_token("user-0", Utc::now())
            .await
            .unwrap();
        let header = token.split('.').next().unwrap();
        let decoded = URL_SAFE_NO_PAD.decode(header).unwrap();
        assert_eq!(decoded, br#"{"alg":"EdDSA","typ":"JWT"}"#);
    }
}
