use std::time::Duration;

use alloy_primitives::hex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    chain::SupportedChain,
    error::HumanKitError,
    identity::{Identity, IdentityKey},
    issuer::{ClaimOffer, IssuerClient, KycProvider, VerifyAttributes},
    session::Session,
    snap::SnapBridge,
    wallet::WalletSession,
    PipelineConfig,
};

/// Credential-subject field the proof query is evaluated on.
pub const PREDICATE_VARIABLE: &str = "isNatural";

/// A W3C verifiable credential as stored by the identity runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiableCredential {
    /// Credential id.
    pub id: String,
    /// JSON-LD contexts.
    #[serde(rename = "@context", default)]
    pub context: Vec<String>,
    /// Credential types, most generic first.
    #[serde(rename = "type", default)]
    pub types: Vec<String>,
    /// Issuer DID.
    pub issuer: String,
    /// Subject claims.
    pub credential_subject: Map<String, Value>,
    /// Revocation status descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_status: Option<Value>,
    /// Issuer proofs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<Value>,
    /// Issuance date (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuance_date: Option<String>,
    /// Expiration date (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<String>,
}

impl VerifiableCredential {
    /// Whether the subject carries `variable`.
    #[must_use]
    pub fn carries(&self, variable: &str) -> bool {
        self.credential_subject.contains_key(variable)
    }

    /// The specific credential type, skipping the generic `VerifiableCredential`.
    #[must_use]
    pub fn credential_type(&self) -> Option<&str> {
        self.types
            .iter()
            .rev()
            .map(String::as_str)
            .find(|t| *t != "VerifiableCredential")
    }

    /// Issuer id as the state oracle knows it: the last segment of the issuer DID.
    #[must_use]
    pub fn issuer_id(&self) -> &str {
        self.issuer.rsplit(':').next().unwrap_or(&self.issuer)
    }
}

/// Predicate variable the verifier on `chain` checks.
#[must_use]
pub const fn predicate_variable(_chain: SupportedChain) -> &'static str {
    PREDICATE_VARIABLE
}

/// Obtains an identity and a verifiable credential for it.
pub struct CredentialAcquisition {
    issuer: IssuerClient,
    max_attempts: u32,
    poll_delay: Duration,
}

impl CredentialAcquisition {
    /// Creates the component with the issuer and polling budget from `config`.
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            issuer: IssuerClient::new(config),
            max_attempts: config.claim_offer_max_attempts.max(1),
            poll_delay: config.claim_offer_poll_delay(),
        }
    }

    /// The issuer API client.
    #[must_use]
    pub const fn issuer(&self) -> &IssuerClient {
        &self.issuer
    }

    /// Returns the session's identity, creating it when needed.
    ///
    /// Without `key`, a held identity is reused and a missing one is derived from fresh key
    /// material. With `key`, a held identity on the same key is reused; otherwise the identity
    /// derived from `key` replaces it.
    ///
    /// # Errors
    /// Fails when the runtime cannot derive the identity.
    pub async fn create_identity<'s>(
        &self,
        snap: &SnapBridge,
        session: &'s mut Session,
        key: Option<IdentityKey>,
    ) -> Result<&'s Identity, HumanKitError> {
        let reuse = match (session.identity_store().get(), &key) {
            (Some(_), None) => true,
            (Some(held), Some(key)) => held.key().matches(key),
            (None, _) => false,
        };
        if reuse {
            return session.identity();
        }

        let key = key.unwrap_or_else(IdentityKey::generate);
        let created = snap
            .create_identity(Some(key.to_key_file().as_str()))
            .await?;
        let identity = Identity::new(
            created.identity_id_string,
            &created.identity_id_big_int_string,
            key,
        )?;
        log::info!("identity {} ready", identity.id_string());
        Ok(session.install_identity(identity))
    }

    /// Verifies the user with a KYC provider so the issuer starts preparing a credential.
    ///
    /// Providers relying on wallet ownership get a fresh nonce signed by the connected account;
    /// `address` and `signature` are added to `payload` for them.
    ///
    /// # Errors
    /// Fails when the wallet is not connected (signed-nonce providers), the user rejects the
    /// signature or the service rejects the verification.
    pub async fn verify_provider(
        &self,
        wallet: &WalletSession,
        identity: &Identity,
        provider: KycProvider,
        payload: Value,
    ) -> Result<VerifyAttributes, HumanKitError> {
        let provider_data = if provider.requires_signed_nonce() {
            let address = wallet.require_address()?;
            let message = self.issuer.request_nonce(address).await?;
            let signature = wallet.sign_message(&message).await?;

            let mut data = match payload {
                Value::Object(map) => map,
                Value::Null => Map::new(),
                other => {
                    return Err(HumanKitError::InvalidInput {
                        attribute: "payload".to_string(),
                        reason: format!("expected an object, got {other}"),
                    })
                }
            };
            data.insert(
                "address".to_string(),
                Value::String(hex::encode_prefixed(address.as_slice())),
            );
            data.insert("signature".to_string(), Value::String(signature));
            Value::Object(data)
        } else {
            payload
        };

        self.issuer.verify(provider, identity, provider_data).await
    }

    /// Polls the issuer until a claim offer for `identity` exists.
    ///
    /// Makes at most `claim_offer_max_attempts` requests with a fixed delay between them and
    /// returns `false` once they are used up. Errors count as "not ready".
    pub async fn is_claim_offer_exists(&self, identity: &Identity, provider: KycProvider) -> bool {
        for attempt in 1..=self.max_attempts {
            match self.get_claim_offer(identity, provider).await {
                Ok(_) => {
                    log::debug!(
                        "claim offer for {} ready after {attempt} attempt(s)",
                        identity.id_string()
                    );
                    return true;
                }
                Err(err) => {
                    log::debug!("claim offer attempt {attempt}/{}: {err}", self.max_attempts);
                }
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.poll_delay).await;
            }
        }
        log::warn!(
            "no claim offer for {} after {} attempts",
            identity.id_string(),
            self.max_attempts
        );
        false
    }

    /// Fetches the claim offer once. Issuer errors propagate.
    ///
    /// # Errors
    /// See [`IssuerClient::get_claim_offer`].
    pub async fn get_claim_offer(
        &self,
        identity: &Identity,
        provider: KycProvider,
    ) -> Result<ClaimOffer, HumanKitError> {
        self.issuer.get_claim_offer(identity, provider).await
    }

    /// Exchanges the claim offer for `identity` into the credential the verifier on `chain`
    /// accepts. Not cached.
    ///
    /// # Errors
    /// [`HumanKitError::CredentialMissing`] when no saved credential carries the predicate;
    /// issuer and runtime errors otherwise.
    pub async fn fetch_verifiable_credential(
        &self,
        snap: &SnapBridge,
        identity: &Identity,
        chain: SupportedChain,
        provider: KycProvider,
    ) -> Result<VerifiableCredential, HumanKitError> {
        let offer = self.get_claim_offer(identity, provider).await?;
        let variable = predicate_variable(chain);
        snap.save_credentials(&offer)
            .await?
            .into_iter()
            .find(|credential| credential.carries(variable))
            .ok_or(HumanKitError::CredentialMissing)
    }

    /// The session identity's credential, from the cache or fetched and cached.
    ///
    /// # Errors
    /// See [`CredentialAcquisition::fetch_verifiable_credential`].
    pub async fn get_verifiable_credentials<'s>(
        &self,
        snap: &SnapBridge,
        session: &'s mut Session,
        chain: SupportedChain,
        provider: KycProvider,
    ) -> Result<&'s VerifiableCredential, HumanKitError> {
        if session.credential().is_none() {
            let credential = self
                .fetch_verifiable_credential(snap, session.identity()?, chain, provider)
                .await?;
            session.cache_credential(credential)?;
        }
        session.credential().ok_or(HumanKitError::CredentialMissing)
    }
}
