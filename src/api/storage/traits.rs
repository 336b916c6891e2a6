//! Repository capability: users, one-time secrets, and request records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{ModelOutput, UserInput};

use super::StorageError;

/// Result of a user lookup by email or fingerprint.
#[derive(Clone, Debug)]
pub struct UserLookup {
    pub user_id: String,
    pub is_active: bool,
}

/// Full user record.
#[derive(Clone, Debug)]
pub struct UserRecord {
    pub user_id: String,
    pub is_active: bool,
    pub email_verified: bool,
    pub email: String,
    pub fingerprint: String,
}

/// Pending one-time secret of the email sign-in flow.
#[derive(Clone, Debug)]
pub struct OneTimeSecret {
    pub secret: String,
    pub iat: DateTime<Utc>,
}

/// Backend trait for all durable state.
///
/// Handlers are stateless; everything that must survive a request goes
/// through this capability.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Find a user by device fingerprint.
    async fn lookup_user_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<UserLookup>, StorageError>;

    /// Find a user by email.
    async fn lookup_user_by_email(&self, email: &str)
        -> Result<Option<UserLookup>, StorageError>;

    /// Read the full user record.
    async fn read_user(&self, user_id: &str) -> Result<Option<UserRecord>, StorageError>;

    /// Create a user. A primary key conflict is an error.
    async fn create_user(
        &self,
        user_id: &str,
        email: &str,
        fingerprint: &str,
        is_active: bool,
    ) -> Result<(), StorageError>;

    /// Flag the user's email as verified.
    async fn update_user_set_email_verified(&self, user_id: &str) -> Result<(), StorageError>;

    /// Read the pending one-time secret, if any.
    async fn read_one_time_secret(
        &self,
        user_id: &str,
    ) -> Result<Option<OneTimeSecret>, StorageError>;

    /// Upsert the one-time secret.
    async fn write_one_time_secret(
        &self,
        user_id: &str,
        secret: &str,
        iat: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Drop the one-time secret.
    async fn delete_one_time_secret(&self, user_id: &str) -> Result<(), StorageError>;

    /// Record the user's prompt.
    async fn write_prompt(&self, input: &UserInput) -> Result<(), StorageError>;

    /// Record the model's prediction.
    async fn write_model_prediction(&self, output: &ModelOutput) -> Result<(), StorageError>;

    /// Release held resources.
    async fn close(&self) -> Result<(), StorageError>;
}
