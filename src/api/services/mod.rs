//! Services module - CIAM, graph inference, token signing, and mail.

pub mod ciam;
pub mod llm_service;
pub mod signing;
pub mod smtp_service;

// Re-export for convenience
pub use ciam::{Ciam, CiamError, Quotas, Role, Tokens};
pub use llm_service::{GraphInference, OpenAiClient, Prediction, PredictionError};
pub use signing::{LocalSigner, RemoteSigner, SigningError, TokenSigner};
pub use smtp_service::{MailerError, SigninMailer, SmtpMailer};
