//! KYC-service and credential-issuer API client.
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum::{Display, EnumIter, EnumString};

use crate::{error::HumanKitError, http_request::Request, identity::Identity, PipelineConfig};

/// A KYC provider the issuer accepts as proof of humanity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum KycProvider {
    /// Civic pass.
    Civic,
    /// Gitcoin Passport.
    GitcoinPassport,
    /// Unstoppable Domains login.
    UnstoppableDomains,
    /// World ID.
    Worldcoin,
}

impl KycProvider {
    /// Whether verification needs a nonce signed by the connected wallet.
    #[must_use]
    pub const fn requires_signed_nonce(self) -> bool {
        !matches!(self, Self::Worldcoin)
    }
}

/// An iden3-comm credential offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimOffer {
    /// Message id.
    pub id: String,
    /// Media type of the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    /// Protocol message type (`.../credentials/1.0/offer`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Thread id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thid: Option<String>,
    /// Offer payload.
    pub body: ClaimOfferBody,
    /// Issuer DID.
    pub from: String,
    /// Holder DID.
    pub to: String,
}

/// Where the offered credentials can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimOfferBody {
    /// Agent endpoint serving the credentials.
    pub url: String,
    /// The offered credentials.
    pub credentials: Vec<OfferedCredential>,
}

/// One credential referenced by a [`ClaimOffer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferedCredential {
    /// Credential id at the issuer.
    pub id: String,
    /// Schema description.
    #[serde(default)]
    pub description: String,
}

#[derive(Deserialize)]
struct JsonApiResponse<T> {
    data: JsonApiData<T>,
}

#[derive(Deserialize)]
struct JsonApiData<T> {
    attributes: T,
}

#[derive(Deserialize)]
struct NonceAttributes {
    message: String,
}

/// Outcome of a KYC verification request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VerifyAttributes {
    /// Id of the claim the issuer is preparing, when it reports one.
    #[serde(default)]
    pub claim_id: Option<String>,
}

/// Issuer API client. Requests are single-shot: polling lives in
/// [`CredentialAcquisition`](crate::CredentialAcquisition).
pub struct IssuerClient {
    base_url: String,
    request: Request,
}

impl IssuerClient {
    /// Creates a client for the issuer configured in `config`.
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            request: Request::new(config.http_timeout(), 0),
        }
    }

    /// Asks the KYC service for a message the wallet has to sign.
    ///
    /// # Errors
    /// Returns error on network failure or invalid response.
    pub async fn request_nonce(&self, address: Address) -> Result<String, HumanKitError> {
        let url = format!("{}/integrations/kyc-service/v1/public/nonce", self.base_url);
        let body = json!({
            "data": {
                "type": "nonce_request",
                "attributes": { "address": address },
            }
        });
        let response: JsonApiResponse<NonceAttributes> =
            self.request.json(self.request.post(&url).json(&body)).await?;
        Ok(response.data.attributes.message)
    }

    /// Submits the provider's verification payload for `identity`.
    ///
    /// # Errors
    /// Returns error on network failure, a rejected verification or invalid response.
    pub async fn verify(
        &self,
        provider: KycProvider,
        identity: &Identity,
        provider_data: Value,
    ) -> Result<VerifyAttributes, HumanKitError> {
        let url = format!(
            "{}/integrations/kyc-service/v1/public/verify/{provider}",
            self.base_url
        );
        let body = json!({
            "data": {
                "id": identity.id_string(),
                "type": "verify",
                "attributes": { "provider_data": provider_data },
            }
        });
        let response: JsonApiResponse<VerifyAttributes> =
            self.request.json(self.request.post(&url).json(&body)).await?;
        log::info!("{provider} verification accepted for {}", identity.id_string());
        Ok(response.data.attributes)
    }

    /// Fetches the claim offer prepared for `identity`. A missing offer is an error (`404`).
    ///
    /// # Errors
    /// Returns error on network failure, a non-success status or invalid response.
    pub async fn get_claim_offer(
        &self,
        identity: &Identity,
        provider: KycProvider,
    ) -> Result<ClaimOffer, HumanKitError> {
        let url = format!(
            "{}/integrations/issuer/v1/public/claims/offers/{}/{provider}",
            self.base_url,
            identity.id_string()
        );
        self.request.json(self.request.get(&url)).await
    }
}
