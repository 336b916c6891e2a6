//! PostgreSQL repository implementation.
//!
//! Uses sqlx for database operations. The prompt and prediction table names
//! are configuration, so all statements are built at runtime.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Row};

use crate::models::{ModelOutput, UserInput};

use super::traits::{OneTimeSecret, Repository, UserLookup, UserRecord};
use super::StorageError;

/// Connection and table configuration.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub db_host: String,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
    pub table_prompt: String,
    pub table_prediction: String,
    pub ssl_mode: String,
}

impl Config {
    /// Read the configuration from the environment.
    pub fn from_env() -> Self {
        let var = |k: &str| std::env::var(k).unwrap_or_default();
        Self {
            db_host: var("DB_HOST"),
            db_name: var("DB_NAME"),
            db_user: var("DB_USER"),
            db_password: var("DB_PASSWORD"),
            table_prompt: var("TABLE_PROMPT"),
            table_prediction: var("TABLE_PREDICTION"),
            ssl_mode: var("SSL_MODE"),
        }
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        if self.db_host.is_empty() {
            return Err(StorageError::InvalidConfig("host must be provided".into()));
        }
        if self.db_name.is_empty() {
            return Err(StorageError::InvalidConfig(
                "dbname must be provided".into(),
            ));
        }
        if self.db_user.is_empty() {
            return Err(StorageError::InvalidConfig("user must be provided".into()));
        }
        if self.table_prompt.is_empty() {
            return Err(StorageError::InvalidConfig(
                "table_prompt must be provided".into(),
            ));
        }
        if self.table_prediction.is_empty() {
            return Err(StorageError::InvalidConfig(
                "table_prediction must be provided".into(),
            ));
        }
        validate_ssl_mode(&self.ssl_mode)
    }

    /// Assemble the libpq keyword connection string.
    fn connection_string(&self) -> String {
        let mut conn = format!("user={} dbname={}{}", self.db_user, self.db_name, host_clause(&self.db_host));
        if !self.db_password.is_empty() {
            conn.push_str(" password=");
            conn.push_str(&self.db_password);
        }
        if !self.ssl_mode.is_empty() {
            conn.push_str(" sslmode=");
            conn.push_str(&self.ssl_mode);
        }
        conn
    }
}

fn validate_ssl_mode(mode: &str) -> Result<(), StorageError> {
    match mode {
        "" | "disable" | "verify-full" => Ok(()),
        other => Err(StorageError::InvalidConfig(format!(
            "ssl mode {other} is not supported"
        ))),
    }
}

/// `DB_HOST` may carry `host:port`; split it when the suffix parses as a port.
fn host_clause(host: &str) -> String {
    if let Some((name, port)) = host.split_once(':') {
        if port.parse::<u32>().is_ok() {
            return format!(" host={name} port={port}");
        }
    }
    format!(" host={host}")
}

/// PostgreSQL-backed repository.
pub struct PostgresRepository {
    pool: PgPool,
    table_prompt: String,
    table_prediction: String,
}

impl PostgresRepository {
    /// Connect and validate the configuration.
    pub async fn connect(cfg: Config) -> Result<Self, StorageError> {
        cfg.validate()?;

        let options = PgConnectOptions::from_str(&cfg.connection_string())
            .map_err(|e| StorageError::InvalidConfig(e.to_string()))?;

        let pool = PgPoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;

        Ok(Self {
            pool,
            table_prompt: cfg.table_prompt,
            table_prediction: cfg.table_prediction,
        })
    }

    /// Wrap an existing pool, e.g. one shared with migrations.
    pub fn with_pool(pool: PgPool, table_prompt: String, table_prediction: String) -> Self {
        Self {
            pool,
            table_prompt,
            table_prediction,
        }
    }
}

fn db_err(e: sqlx::Error) -> StorageError {
    StorageError::ConnectionError(e.to_string())
}

fn row_err(e: sqlx::Error) -> StorageError {
    StorageError::Other(e.to_string())
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn lookup_user_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<UserLookup>, StorageError> {
        let row = sqlx::query("SELECT user_id, is_active FROM users WHERE fingerprint = $1")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(|row| {
            Ok(UserLookup {
                user_id: row.try_get("user_id").map_err(row_err)?,
                is_active: row.try_get("is_active").map_err(row_err)?,
            })
        })
        .transpose()
    }

    async fn lookup_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserLookup>, StorageError> {
        let row = sqlx::query("SELECT user_id, is_active FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(|row| {
            Ok(UserLookup {
                user_id: row.try_get("user_id").map_err(row_err)?,
                is_active: row.try_get("is_active").map_err(row_err)?,
            })
        })
        .transpose()
    }

    async fn read_user(&self, user_id: &str) -> Result<Option<UserRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT user_id, is_active, email_verified, \
             COALESCE(email, '') AS email, COALESCE(fingerprint, '') AS fingerprint \
             FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|row| {
            Ok(UserRecord {
                user_id: row.try_get("user_id").map_err(row_err)?,
                is_active: row.try_get("is_active").map_err(row_err)?,
                email_verified: row.try_get("email_verified").map_err(row_err)?,
                email: row.try_get("email").map_err(row_err)?,
                fingerprint: row.try_get("fingerprint").map_err(row_err)?,
            })
        })
        .transpose()
    }

    async fn create_user(
        &self,
        user_id: &str,
        email: &str,
        fingerprint: &str,
        is_active: bool,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO users (user_id, email, fingerprint, is_active, email_verified) \
             VALUES ($1, NULLIF($2, ''), NULLIF($3, ''), $4, FALSE)",
        )
        .bind(user_id)
        .bind(email)
        .bind(fingerprint)
        .bind(is_active)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_user_set_email_verified(&self, user_id: &str) -> Result<(), StorageError> {
        sqlx::query("UPDATE users SET email_verified = TRUE WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn read_one_time_secret(
        &self,
        user_id: &str,
    ) -> Result<Option<OneTimeSecret>, StorageError> {
        let row = sqlx::query("SELECT secret, iat FROM one_time_secret WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(|row| {
            Ok(OneTimeSecret {
                secret: row.try_get("secret").map_err(row_err)?,
                iat: row.try_get::<DateTime<Utc>, _>("iat").map_err(row_err)?,
            })
        })
        .transpose()
    }

    async fn write_one_time_secret(
        &self,
        user_id: &str,
        secret: &str,
        iat: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO one_time_secret (user_id, secret, iat) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id) DO UPDATE SET secret = EXCLUDED.secret, iat = EXCLUDED.iat",
        )
        .bind(user_id)
        .bind(secret)
        .bind(iat)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_one_time_secret(&self, user_id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM one_time_secret WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn write_prompt(&self, input: &UserInput) -> Result<(), StorageError> {
        if input.request_id.is_empty() {
            return Err(StorageError::MissingField("request_id"));
        }
        if input.prompt.is_empty() {
            return Err(StorageError::MissingField("prompt"));
        }
        let stmt = format!(
            "INSERT INTO {} (request_id, user_id, prompt, timestamp) VALUES ($1, $2, $3, $4)",
            self.table_prompt
        );
        sqlx::query(&stmt)
            .bind(&input.request_id)
            .bind(&input.user_id)
            .bind(&input.prompt)
            .bind(input.timestamp)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn write_model_prediction(&self, output: &ModelOutput) -> Result<(), StorageError> {
        if output.request_id.is_empty() {
            return Err(StorageError::MissingField("request_id"));
        }
        if output.response.is_empty() {
            return Err(StorageError::MissingField("response"));
        }
        if output.model.is_empty() {
            return Err(StorageError::MissingField("model"));
        }
        let stmt = format!(
            "INSERT INTO {} (request_id, user_id, response, timestamp, model, prompt_tokens, completion_tokens) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            self.table_prediction
        );
        sqlx::query(&stmt)
            .bind(&output.request_id)
            .bind(&output.user_id)
            .bind(&output.response)
            .bind(output.timestamp)
            .bind(&output.model)
            .bind(output.prompt_tokens)
            .bind(output.completion_tokens)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.pool.close().await;
        Ok(())
    }
}
