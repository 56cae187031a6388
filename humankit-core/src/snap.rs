use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    credential::VerifiableCredential,
    error::HumanKitError,
    field::FieldValue,
    issuer::ClaimOffer,
    proof::{ProofRequest, SubjectProof},
    provider::Eip1193Provider,
    PipelineConfig,
};

/// Methods exposed by the identity runtime through `wallet_invokeSnap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum SnapMethod {
    /// Derives identity ids from key material, generating it when absent.
    CreateIdentity,
    /// Exchanges a claim offer for the credentials it references and stores them.
    SaveCredentials,
    /// Produces a SNARK proof for a credential query.
    CreateProof,
}

/// Identity ids as derived by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedIdentity {
    /// Stable string identifier.
    pub identity_id_string: String,
    /// Numeric identifier, decimal.
    pub identity_id_big_int_string: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateIdentityParams<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    private_key_hex: Option<&'a str>,
}

#[derive(Deserialize)]
struct Groth16Proof {
    pi_a: Vec<FieldValue>,
    pi_b: Vec<Vec<FieldValue>>,
    pi_c: Vec<FieldValue>,
}

#[derive(Deserialize)]
struct CreateProofResponse {
    proof: Groth16Proof,
    pub_signals: Vec<FieldValue>,
}

#[derive(Deserialize)]
struct InstalledSnap {
    #[serde(default)]
    blocked: bool,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
}

const fn enabled_by_default() -> bool {
    true
}

/// Bridge to the identity runtime hosted inside the wallet.
pub struct SnapBridge {
    provider: Arc<dyn Eip1193Provider>,
    snap_id: String,
    snap_version: Option<String>,
}

impl SnapBridge {
    /// Creates a bridge to the runtime configured in `config`.
    #[must_use]
    pub fn new(provider: Arc<dyn Eip1193Provider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            snap_id: config.snap_id.clone(),
            snap_version: config.snap_version.clone(),
        }
    }

    /// The runtime's snap id.
    #[must_use]
    pub fn snap_id(&self) -> &str {
        &self.snap_id
    }

    /// Whether the runtime is installed and usable.
    ///
    /// # Errors
    /// Fails when `wallet_getSnaps` fails.
    pub async fn is_installed(&self) -> Result<bool, HumanKitError> {
        let snaps = self.provider.request("wallet_getSnaps", json!({})).await?;
        Ok(self.installed_in(&snaps))
    }

    /// Installs the runtime, or connects to it when already installed.
    ///
    /// # Errors
    /// [`HumanKitError::SnapNotInstalled`] when the wallet did not grant the runtime.
    pub async fn connect(&self) -> Result<(), HumanKitError> {
        let version = self
            .snap_version
            .as_ref()
            .map_or_else(|| json!({}), |version| json!({ "version": version }));
        let mut params = serde_json::Map::new();
        params.insert(self.snap_id.clone(), version);

        let granted = self
            .provider
            .request("wallet_requestSnaps", Value::Object(params))
            .await?;
        if !self.installed_in(&granted) {
            return Err(HumanKitError::SnapNotInstalled);
        }
        log::info!("identity runtime {} connected", self.snap_id);
        Ok(())
    }

    /// Calls one runtime method and decodes its response.
    ///
    /// # Errors
    /// Fails when the wallet rejects the call or the response does not decode into `T`.
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        method: SnapMethod,
        params: Value,
    ) -> Result<T, HumanKitError> {
        let method_name: &'static str = method.into();
        log::debug!("invoking runtime method {method_name}");
        let response = self
            .provider
            .request(
                "wallet_invokeSnap",
                json!({
                    "snapId": self.snap_id,
                    "request": { "method": method_name, "params": params },
                }),
            )
            .await?;
        serde_json::from_value(response).map_err(|e| HumanKitError::SerializationError {
            error: format!("{method_name} response: {e}"),
        })
    }

    /// Derives identity ids. The runtime generates key material when `private_key_hex` is `None`.
    ///
    /// # Errors
    /// See [`SnapBridge::invoke`].
    pub async fn create_identity(
        &self,
        private_key_hex: Option<&str>,
    ) -> Result<CreatedIdentity, HumanKitError> {
        let params = serde_json::to_value(CreateIdentityParams { private_key_hex })?;
        self.invoke(SnapMethod::CreateIdentity, params).await
    }

    /// Hands a claim offer to the runtime, which fetches and stores the referenced credentials.
    ///
    /// # Errors
    /// See [`SnapBridge::invoke`].
    pub async fn save_credentials(
        &self,
        offer: &ClaimOffer,
    ) -> Result<Vec<VerifiableCredential>, HumanKitError> {
        self.invoke(SnapMethod::SaveCredentials, serde_json::to_value(offer)?)
            .await
    }

    /// Produces a SNARK proof for `request`.
    ///
    /// # Errors
    /// See [`SnapBridge::invoke`].
    pub async fn create_proof(
        &self,
        request: &ProofRequest,
    ) -> Result<SubjectProof, HumanKitError> {
        let response: CreateProofResponse = self
            .invoke(SnapMethod::CreateProof, serde_json::to_value(request)?)
            .await?;
        Ok(SubjectProof {
            pi_a: response.proof.pi_a,
            pi_b: response.proof.pi_b,
            pi_c: response.proof.pi_c,
            pub_signals: response.pub_signals,
        })
    }

    fn installed_in(&self, snaps: &Value) -> bool {
        snaps
            .get(&self.snap_id)
            .cloned()
            .and_then(|snap| serde_json::from_value::<InstalledSnap>(snap).ok())
            .is_some_and(|snap| snap.enabled && !snap.blocked)
    }
}
