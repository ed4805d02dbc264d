//! Identity service client: KYC validity and KYC profile lookups.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{ClientError, CollaboratorResponse, Envelope};

/// Answer of the KYC validity check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KycValidity {
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// The parts of a KYC profile the contract request needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KycProfile {
    pub user_id: Option<String>,
    pub full_name: Option<String>,
    pub id_number: Option<String>,
    pub status: Option<String>,
}

#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// `GET /kyc/valid/{userId}`
    async fn check_kyc_valid(&self, user_id: &str) -> Result<KycValidity, ClientError>;

    /// `GET /kyc/user/{userId}`
    async fn get_kyc_profile(&self, user_id: &str) -> Result<KycProfile, ClientError>;
}

/// HTTP implementation over reqwest.
#[derive(Clone)]
pub struct HttpIdentityClient {
    client: Client,
    base_url: Url,
}

impl HttpIdentityClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidBaseUrl(base_url.to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// Append path segments to the base URL. Each segment is escaped, so a
    /// `/`, `?` or `#` inside an id stays part of that segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<T, ClientError> {
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();

        // Error envelopes come back with 4xx codes too; only give up on
        // the body when it isn't an envelope at all.
        let envelope: Envelope<T> = match response.json().await {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => return Err(ClientError::HttpStatus(status.as_u16())),
            Err(e) => return Err(e.into()),
        };

        CollaboratorResponse::from(envelope).into_result()
    }
}

#[async_trait]
impl IdentityClient for HttpIdentityClient {
    async fn check_kyc_valid(&self, user_id: &str) -> Result<KycValidity, ClientError> {
        self.get(self.endpoint(&["kyc", "valid", user_id])?).await
    }

    async fn get_kyc_profile(&self, user_id: &str) -> Result<KycProfile, ClientError> {
        self.get(self.endpoint(&["kyc", "user", user_id])?).await
    }
}
