//! CIAM engine: passwordless sign-in state machine, token issuance, and
//! access-token validation with role-pinned quotas.
//!
//! All durable state lives in the repository; the engine itself is
//! stateless and shares nothing between requests but the signing key.

pub mod role;
pub mod token;

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::Rng;
use thiserror::Error;
use uuid::Uuid;

use crate::storage::{Repository, StorageError};

use super::signing::TokenSigner;
use super::smtp_service::SigninMailer;

pub use role::{Quotas, Role};
pub use token::{AccessClaims, IdClaims, RefreshClaims, TokenIssuer};

const ONE_TIME_SECRET_TTL_MINUTES: i64 = 10;

/// CIAM failures.
#[derive(Error, Debug)]
pub enum CiamError {
    /// A required input is missing or malformed.
    #[error("{0}")]
    Validation(String),
    #[error("user was deactivated")]
    Deactivated,
    #[error("user not found")]
    UserNotFound,
    #[error("user's email was not verified yet")]
    EmailUnverified,
    #[error("no secret was sent")]
    NoPendingConfirmation,
    #[error("secret is wrong")]
    WrongSecret,
    /// Token is malformed, forged, expired, or mis-addressed.
    #[error("invalid token: {0}")]
    InvalidToken(String),
    /// Access token quotas diverge from the canonical role quotas.
    #[error("quotas from the token are not up to date")]
    StaleAccessToken,
    #[error("signing failure: {0}")]
    Signing(String),
    #[error("token serialization failed: {0}")]
    Serialization(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("email delivery failed: {0}")]
    Email(String),
}

/// The three tokens handed out on a successful sign-in.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Tokens {
    pub id: String,
    pub refresh: String,
    pub access: String,
}

/// CIAM client over the repository, signing, and mail capabilities.
pub struct Ciam {
    repository: Arc<dyn Repository>,
    issuer: TokenIssuer,
    mailer: Arc<dyn SigninMailer>,
}

impl Ciam {
    pub fn new(
        repository: Arc<dyn Repository>,
        signer: Arc<dyn TokenSigner>,
        mailer: Arc<dyn SigninMailer>,
    ) -> Self {
        Self {
            repository,
            issuer: TokenIssuer::new(signer),
            mailer,
        }
    }

    /// Anonym sign-in: find or create the user behind the fingerprint and
    /// hand out all three tokens with the Anonym role.
    pub async fn signin_anonym(&self, fingerprint: &str) -> Result<Tokens, CiamError> {
        if fingerprint.is_empty() {
            return Err(CiamError::Validation(
                "fingerprint must be provided".to_string(),
            ));
        }

        let user_id = match self.repository.lookup_user_by_fingerprint(fingerprint).await? {
            Some(user) if !user.is_active => return Err(CiamError::Deactivated),
            Some(user) => user.user_id,
            None => {
                let user_id = Uuid::new_v4().to_string();
                self.repository
                    .create_user(&user_id, "", fingerprint, true)
                    .await?;
                user_id
            }
        };

        self.issue_tokens(&user_id, "", fingerprint, false).await
    }

    /// Email sign-in: find or create the user, send a one-time secret, and
    /// return an ID token the caller presents on confirmation.
    ///
    /// A pending secret younger than ten minutes is not rotated; the ID
    /// token is re-emitted bound to the stored `iat`, so repeated sign-ins
    /// within the window are idempotent.
    pub async fn signin_user(&self, email: &str, fingerprint: &str) -> Result<String, CiamError> {
        if email.is_empty() {
            return Err(CiamError::Validation("email must be provided".to_string()));
        }

        let user_id = match self.repository.lookup_user_by_email(email).await? {
            Some(user) if !user.is_active => return Err(CiamError::Deactivated),
            Some(user) => {
                if let Some(pending) = self.repository.read_one_time_secret(&user.user_id).await? {
                    if pending.iat + Duration::minutes(ONE_TIME_SECRET_TTL_MINUTES) > Utc::now() {
                        return self
                            .issuer
                            .new_id_token(&user.user_id, email, fingerprint, false, pending.iat)
                            .await;
                    }
                }
                user.user_id
            }
            None => {
                let user_id = Uuid::new_v4().to_string();
                self.repository
                    .create_user(&user_id, email, fingerprint, true)
                    .await?;
                user_id
            }
        };

        let secret = generate_onetime_secret();
        let iat = Utc::now();

        self.mailer
            .send_signin_secret(email, &secret)
            .await
            .map_err(|e| CiamError::Email(e.0))?;
        self.repository
            .write_one_time_secret(&user_id, &secret, iat)
            .await?;

        self.issuer
            .new_id_token(&user_id, email, fingerprint, false, iat)
            .await
    }

    /// Confirm the emailed secret and elevate the user to a verified email
    /// identity.
    pub async fn issue_tokens_after_secret_confirmation(
        &self,
        id_token: &str,
        secret: &str,
    ) -> Result<Tokens, CiamError> {
        let claims = self.issuer.parse_id_token(id_token).await?;
        let user_id = &claims.std.sub;

        let pending = self
            .repository
            .read_one_time_secret(user_id)
            .await?
            .ok_or(CiamError::NoPendingConfirmation)?;

        if secret != pending.secret {
            return Err(CiamError::WrongSecret);
        }

        self.repository.update_user_set_email_verified(user_id).await?;

        // best effort: a lingering secret expires on its own
        let _ = self.repository.delete_one_time_secret(user_id).await;

        self.issue_tokens(
            user_id,
            claims.email.as_deref().unwrap_or_default(),
            claims.fingerprint.as_deref().unwrap_or_default(),
            true,
        )
        .await
    }

    /// Re-issue all three tokens from a refresh token, recomputing quotas
    /// from the user's current role.
    pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<Tokens, CiamError> {
        let claims = self.issuer.parse_refresh_token(refresh_token).await?;

        let user = self
            .repository
            .read_user(&claims.std.sub)
            .await?
            .ok_or(CiamError::UserNotFound)?;

        if !user.is_active {
            return Err(CiamError::Deactivated);
        }
        if !user.email.is_empty() && !user.email_verified {
            return Err(CiamError::EmailUnverified);
        }

        self.issue_tokens(
            &user.user_id,
            &user.email,
            &user.fingerprint,
            user.email_verified,
        )
        .await
    }

    /// Validate an access token and return its claims.
    pub async fn parse_access_token(&self, token: &str) -> Result<AccessClaims, CiamError> {
        self.issuer.parse_access_token(token).await
    }

    async fn issue_tokens(
        &self,
        user_id: &str,
        email: &str,
        fingerprint: &str,
        email_verified: bool,
    ) -> Result<Tokens, CiamError> {
        let iat = Utc::now();
        let role = derive_role(email, email_verified);

        let id = self
            .issuer
            .new_id_token(user_id, email, fingerprint, email_verified, iat)
            .await?;
        let access = self.issuer.new_access_token(user_id, role, iat).await?;
        let refresh = self.issuer.new_refresh_token(user_id, iat).await?;

        Ok(Tokens {
            id,
            refresh,
            access,
        })
    }
}

fn derive_role(email: &str, email_verified: bool) -> Role {
    if email.is_empty() {
        Role::Anonym
    } else if email_verified {
        Role::RegisteredVerified
    } else {
        Role::RegisteredNotVerified
    }
}

fn generate_onetime_secret() -> String {
    const CHARSET: &[u8] = b"0123456789abcdef";
    const LENGTH: usize = 6;
    let mut rng = rand::thread_rng();
    (0..LENGTH)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ModelOutput, UserInput};
    use crate::services::signing::LocalSigner;
    use crate::services::smtp_service::MailerError;
    use crate::storage::{OneTimeSecret, UserLookup, UserRecord};
    use async_trait::async_trait;
    use chrono::DateTime;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemRepository {
        users: Mutex<HashMap<String, UserRecord>>,
        secrets: Mutex<HashMap<String, OneTimeSecret>>,
    }

    #[async_trait]
    impl Repository for MemRepository {
        async fn lookup_user_by_fingerprint(
            &self,
            fingerprint: &str,
        ) -> Result<Option<UserLookup>, StorageError> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .values()
                .find(|u| u.fingerprint == fingerprint)
                .map(|u| UserLookup {
                    user_id: u.user_id.clone(),
                    is_active: u.is_active,
                }))
        }

        async fn lookup_user_by_email(
            &self,
            email: &str,
        ) -> Result<Option<UserLookup>, StorageError> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .values()
                .find(|u| u.email == email)
                .map(|u| UserLookup {
                    user_id: u.user_id.clone(),
                    is_active: u.is_active,
                }))
        }

        async fn read_user(&self, user_id: &str) -> Result<Option<UserRecord>, StorageError> {
            Ok(self.users.lock().unwrap().get(user_id).cloned())
        }

        async fn create_user(
            &self,
            user_id: &str,
            email: &str,
            fingerprint: &str,
            is_active: bool,
        ) -> Result<(), StorageError> {
            self.users.lock().unwrap().insert(
                user_id.to_string(),
                UserRecord {
                    user_id: user_id.to_string(),
                    is_active,
                    email_verified: false,
                    email: email.to_string(),
                    fingerprint: fingerprint.to_string(),
                },
            );
            Ok(())
        }

        async fn update_user_set_email_verified(
            &self,
            user_id: &str,
        ) -> Result<(), StorageError> {
            if let Some(user) = self.users.lock().unwrap().get_mut(user_id) {
                user.email_verified = true;
            }
            Ok(())
        }

        async fn read_one_time_secret(
            &self,
            user_id: &str,
        ) -> Result<Option<OneTimeSecret>, StorageError> {
            Ok(self.secrets.lock().unwrap().get(user_id).cloned())
        }

        async fn write_one_time_secret(
            &self,
            user_id: &str,
            secret: &str,
            iat: DateTime<Utc>,
        ) -> Result<(), StorageError> {
            self.secrets.lock().unwrap().insert(
                user_id.to_string(),
                OneTimeSecret {
                    secret: secret.to_string(),
                    iat,
                },
            );
            Ok(())
        }

        async fn delete_one_time_secret(&self, user_id: &str) -> Result<(), StorageError> {
            self.secrets.lock().unwrap().remove(user_id);
            Ok(())
        }

        async fn write_prompt(&self, _input: &UserInput) -> Result<(), StorageError> {
            Ok(())
        }

        async fn write_model_prediction(
            &self,
            _output: &ModelOutput,
        ) -> Result<(), StorageError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemMailer {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SigninMailer for MemMailer {
        async fn send_signin_secret(
            &self,
            email: &str,
            secret: &str,
        ) -> Result<(), MailerError> {
            self.sent
                .lock()
                .unwrap()
                .push((email.to_string(), secret.to_string()));
            Ok(())
        }
    }

    fn ciam_with(repo: Arc<MemRepository>, mailer: Arc<MemMailer>) -> Ciam {
        Ciam::new(
            repo,
            Arc::new(LocalSigner::new(SigningKey::generate(&mut OsRng))),
            mailer,
        )
    }

    #[tokio::test]
    async fn test_signin_anonym_creates_user_and_tokens() {
        let repo = Arc::new(MemRepository::default());
        let ciam = ciam_with(repo.clone(), Arc::new(MemMailer::default()));

        let tokens = ciam.signin_anonym("fp-0").await.unwrap();
        let claims = ciam.parse_access_token(&tokens.access).await.unwrap();
        assert_eq!(claims.role, Role::Anonym);
        assert_eq!(claims.quotas, Role::Anonym.quotas());

        // second sign-in reuses the stored user
        let again = ciam.signin_anonym("fp-0").await.unwrap();
        let again_claims = ciam.parse_access_token(&again.access).await.unwrap();
        assert_eq!(claims.std.sub, again_claims.std.sub);
        assert_eq!(repo.users.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_signin_anonym_requires_fingerprint() {
        let ciam = ciam_with(
            Arc::new(MemRepository::default()),
            Arc::new(MemMailer::default()),
        );
        assert!(matches!(
            ciam.signin_anonym("").await.unwrap_err(),
            CiamError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_signin_anonym_rejects_deactivated_user() {
        let repo = Arc::new(MemRepository::default());
        repo.create_user("user-0", "", "fp-0", false).await.unwrap();
        let ciam = ciam_with(repo, Arc::new(MemMailer::default()));
        assert!(matches!(
            ciam.signin_anonym("fp-0").await.unwrap_err(),
            CiamError::Deactivated
        ));
    }

    #[tokio::test]
    async fn test_email_signin_happy_path() {
        let repo = Arc::new(MemRepository::default());
        let mailer = Arc::new(MemMailer::default());
        let ciam = ciam_with(repo.clone(), mailer.clone());

        let id_token = ciam.signin_user("a@b", "fp-0").await.unwrap();

        let sent = mailer.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "a@b");
        let secret = sent[0].1.clone();
        assert_eq!(secret.len(), 6);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));

        let tokens = ciam
            .issue_tokens_after_secret_confirmation(&id_token, &secret)
            .await
            .unwrap();
        let claims = ciam.parse_access_token(&tokens.access).await.unwrap();
        assert_eq!(claims.role, Role::RegisteredVerified);
        assert_eq!(claims.quotas, Role::RegisteredVerified.quotas());

        // the secret is consumed
        assert!(repo.secrets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_secret_keeps_pending_secret() {
        let repo = Arc::new(MemRepository::default());
        let mailer = Arc::new(MemMailer::default());
        let ciam = ciam_with(repo.clone(), mailer.clone());

        let id_token = ciam.signin_user("a@b", "fp-0").await.unwrap();
        assert!(matches!(
            ciam.issue_tokens_after_secret_confirmation(&id_token, "000000")
                .await
                .unwrap_err(),
            CiamError::WrongSecret
        ));

        // the stored secret survives and the right one still works
        assert_eq!(repo.secrets.lock().unwrap().len(), 1);
        let secret = mailer.sent.lock().unwrap()[0].1.clone();
        assert!(ciam
            .issue_tokens_after_secret_confirmation(&id_token, &secret)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_confirmation_without_pending_secret() {
        let repo = Arc::new(MemRepository::default());
        let mailer = Arc::new(MemMailer::default());
        let ciam = ciam_with(repo.clone(), mailer.clone());

        let id_token = ciam.signin_user("a@b", "fp-0").await.unwrap();
        let user_id = repo.users.lock().unwrap().keys().next().unwrap().clone();
        repo.delete_one_time_secret(&user_id).await.unwrap();

        assert!(matches!(
            ciam.issue_tokens_after_secret_confirmation(&id_token, "abcdef")
                .await
                .unwrap_err(),
            CiamError::NoPendingConfirmation
        ));
    }

    #[tokio::test]
    async fn test_resend_within_window_does_not_rotate_secret() {
        let repo = Arc::new(MemRepository::default());
        let mailer = Arc::new(MemMailer::default());
        let ciam = ciam_with(repo.clone(), mailer.clone());

        ciam.signin_user("a@b", "fp-0").await.unwrap();
        let first = repo.secrets.lock().unwrap().values().next().unwrap().clone();

        ciam.signin_user("a@b", "fp-0").await.unwrap();
        let second = repo.secrets.lock().unwrap().values().next().unwrap().clone();

        assert_eq!(first.secret, second.secret);
        assert_eq!(first.iat, second.iat);
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_secret_is_rotated() {
        let repo = Arc::new(MemRepository::default());
        let mailer = Arc::new(MemMailer::default());
        let ciam = ciam_with(repo.clone(), mailer.clone());

        ciam.signin_user("a@b", "fp-0").await.unwrap();
        let user_id = repo.users.lock().unwrap().keys().next().unwrap().clone();
        let stale_iat = Utc::now() - Duration::minutes(11);
        let old = repo.secrets.lock().unwrap().get(&user_id).unwrap().clone();
        repo.write_one_time_secret(&user_id, &old.secret, stale_iat)
            .await
            .unwrap();

        ciam.signin_user("a@b", "fp-0").await.unwrap();
        let fresh = repo.secrets.lock().unwrap().get(&user_id).unwrap().clone();
        assert!(fresh.iat > stale_iat);
        assert_eq!(mailer.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_tokens_for_anonym_user() {
        let repo = Arc::new(MemRepository::default());
        let ciam = ciam_with(repo, Arc::new(MemMailer::default()));

        let tokens = ciam.signin_anonym("fp-0").await.unwrap();
        let refreshed = ciam.refresh_tokens(&tokens.refresh).await.unwrap();
        let claims = ciam.parse_access_token(&refreshed.access).await.unwrap();
        assert_eq!(claims.role, Role::Anonym);
    }

    #[tokio::test]
    async fn test_refresh_rejects_unverified_email_user() {
        let repo = Arc::new(MemRepository::default());
        let mailer = Arc::new(MemMailer::default());
        let ciam = ciam_with(repo.clone(), mailer);

        ciam.signin_user("a@b", "fp-0").await.unwrap();
        let user_id = repo.users.lock().unwrap().keys().next().unwrap().clone();
        let refresh = ciam
            .issuer
            .new_refresh_token(&user_id, Utc::now())
            .await
            .unwrap();

        assert!(matches!(
            ciam.refresh_tokens(&refresh).await.unwrap_err(),
            CiamError::EmailUnverified
        ));
    }

    #[tokio::test]
    async fn test_refresh_rejects_unknown_user() {
        let ciam = ciam_with(
            Arc::new(MemRepository::default()),
            Arc::new(MemMailer::default()),
        );
        let refresh = ciam
            .issuer
            .new_refresh_token("ghost", Utc::now())
            .await
            .unwrap();
        assert!(matches!(
            ciam.refresh_tokens(&refresh).await.unwrap_err(),
            CiamError::UserNotFound
        ));
    }

    #[test]
    fn test_generated_secret_shape() {
        for _ in 0..32 {
            let secret = generate_onetime_secret();
            assert_eq!(secret.len(), 6);
            assert!(secret
                .chars()
                .all(|c| "0123456789abcdef".contains(c)));
        }
    }
}
