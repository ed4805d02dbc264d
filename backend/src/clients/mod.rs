//! # Collaborator Clients
//!
//! Request/response calls to services outside this one. Each collaborator
//! sits behind a trait so the saga can be exercised with stubs.
//!
//! Remote services answer with a `{code, message, result}` envelope where
//! `code == 1000` means success. [`CollaboratorResponse`] turns that loose
//! shape into an explicit success/error value before any caller sees it.

pub mod identity;

use serde::Deserialize;
use thiserror::Error;

pub use identity::{HttpIdentityClient, IdentityClient, KycProfile, KycValidity};

/// Envelope code for a successful call.
pub const SUCCESS_CODE: i32 = 1000;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Collaborator returned HTTP {0}")]
    HttpStatus(u16),

    #[error("Collaborator rejected the call ({code}): {message}")]
    Rejected { code: i32, message: String },

    #[error("Invalid collaborator URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Collaborator URL cannot take a path: {0}")]
    InvalidBaseUrl(String),
}

/// Wire shape of a collaborator response.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub code: Option<i32>,
    #[serde(default)]
    pub message: Option<String>,
    pub result: Option<T>,
}

/// A collaborator response with its outcome made explicit.
#[derive(Debug, Clone, PartialEq)]
pub enum CollaboratorResponse<T> {
    Success(T),
    Error { code: i32, message: String },
}

impl<T> From<Envelope<T>> for CollaboratorResponse<T> {
    fn from(envelope: Envelope<T>) -> Self {
        // A missing code is how the services answer plain successes.
        let code = envelope.code.unwrap_or(SUCCESS_CODE);
        match (code, envelope.result) {
            (SUCCESS_CODE, Some(result)) => Self::Success(result),
            (SUCCESS_CODE, None) => Self::Error {
                code,
                message: "empty result".to_string(),
            },
            (code, _) => Self::Error {
                code,
                message: envelope.message.unwrap_or_default(),
            },
        }
    }
}

impl<T> CollaboratorResponse<T> {
    pub fn into_result(self) -> Result<T, ClientError> {
        match self {
            Self::Success(result) => Ok(result),
            Self::Error { code, message } => Err(ClientError::Rejected { code, message }),
        }
    }
}
