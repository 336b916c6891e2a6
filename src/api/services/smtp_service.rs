//! SMTP capability delivering the one-time sign-in secret.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

/// Email delivery failure.
#[derive(Error, Debug)]
#[error("email delivery failed: {0}")]
pub struct MailerError(pub String);

/// Capability sending the sign-in secret to a user.
#[async_trait]
pub trait SigninMailer: Send + Sync {
    async fn send_signin_secret(&self, email: &str, secret: &str) -> Result<(), MailerError>;
}

/// SMTP-backed mailer.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(transport: AsyncSmtpTransport<Tokio1Executor>, from: String) -> Self {
        Self { transport, from }
    }

    /// Build the transport from `SMTP_HOST`, `SMTP_PORT`, `SMTP_USER`,
    /// `SMTP_PASSWORD`, and `SMTP_FROM`.
    pub fn from_env() -> Result<Self, MailerError> {
        let host = std::env::var("SMTP_HOST").map_err(|_| {
            MailerError("SMTP_HOST must be provided".to_string())
        })?;
        let from = std::env::var("SMTP_FROM").map_err(|_| {
            MailerError("SMTP_FROM must be provided".to_string())
        })?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .map_err(|e| MailerError(e.to_string()))?;

        if let Ok(port) = std::env::var("SMTP_PORT") {
            let port: u16 = port
                .parse()
                .map_err(|_| MailerError("SMTP_PORT must be a port number".to_string()))?;
            builder = builder.port(port);
        }

        if let (Ok(user), Ok(password)) =
            (std::env::var("SMTP_USER"), std::env::var("SMTP_PASSWORD"))
        {
            builder = builder.credentials(Credentials::new(user, password));
        }

        Ok(Self::new(builder.build(), from))
    }
}

#[async_trait]
impl SigninMailer for SmtpMailer {
    async fn send_signin_secret(&self, email: &str, secret: &str) -> Result<(), MailerError> {
        let message = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|_| MailerError("invalid sender address".to_string()))?,
            )
            .to(email
                .parse()
                .map_err(|_| MailerError("invalid recipient address".to_string()))?)
            .subject("diagramastext.dev sign-in code")
            .header(ContentType::TEXT_PLAIN)
            .body(format!(
                "Your sign-in code is {secret}. It is valid for 10 minutes."
            ))
            .map_err(|e| MailerError(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailerError(e.to_string()))?;
        Ok(())
    }
}
