//! State-oracle client: issuer state details, inclusion proofs and transition parameters.
//!
//! The oracle indexes the identity registry asynchronously. Until a state produced by the issuer
//! is indexed it answers `400 Bad Request`; callers treat that as "not yet" (see
//! [`HumanKitError::is_not_yet_indexed`]) while every other failure is final.
use alloy_primitives::{Bytes, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{error::HumanKitError, field::FieldValue, http_request::Request, PipelineConfig};

/// The issuer's latest state as recorded by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreStateDetails {
    /// Numeric issuer id.
    pub issuer_id: FieldValue,
    /// Issuer state hash.
    pub state_hash: FieldValue,
    /// When the state was recorded.
    pub created_at_timestamp: FieldValue,
    /// Block the state was recorded in.
    pub created_at_block: FieldValue,
    /// Registry operation that last updated the state.
    pub last_update_operation_index: FieldValue,
}

/// Inclusion proof of an issuer state in the identities-states tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Sibling path, leaf to root.
    pub proof: Vec<B256>,
    /// Tree root the proof resolves to.
    pub root: B256,
}

/// Proof that a registry operation was signed by the registry's threshold key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationProof {
    /// Path of the operation in the signed operations tree.
    pub path: Vec<B256>,
    /// Threshold signature over the operations root.
    pub signature: Bytes,
}

/// The latest identities-states root, which target chains have to know for a proof to verify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetStateDetails {
    /// Identities-states root.
    pub root: B256,
    /// GIST root published together with it.
    pub gist_root: FieldValue,
    /// When the root was produced.
    pub created_at_timestamp: FieldValue,
}

/// GIST data passed along a state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GistData {
    /// GIST root.
    pub root: FieldValue,
    /// When the GIST root was produced.
    pub created_at_timestamp: FieldValue,
}

/// Everything a state contract needs to move to a new identities-states root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionParams {
    /// Root to transit to.
    pub new_identities_states_root: B256,
    /// GIST data bound to the root.
    pub gist_data: GistData,
    /// Signature proof of the transition.
    pub proof: Bytes,
}

/// Read access to the state oracle.
#[async_trait]
pub trait StateOracle: Send + Sync {
    /// Latest state of `issuer_id`.
    async fn core_state_details(&self, issuer_id: &str) -> Result<CoreStateDetails, HumanKitError>;

    /// Inclusion proof of `state_hash` for `issuer_id`.
    async fn merkle_proof(
        &self,
        issuer_id: &str,
        state_hash: &FieldValue,
    ) -> Result<MerkleProof, HumanKitError>;

    /// Signature proof of a registry operation.
    async fn operation_proof(
        &self,
        operation_index: &FieldValue,
    ) -> Result<OperationProof, HumanKitError>;

    /// The latest identities-states root.
    async fn target_state_details(&self) -> Result<TargetStateDetails, HumanKitError>;

    /// Parameters for a transition to `root`.
    async fn transition_params(&self, root: &B256) -> Result<TransitionParams, HumanKitError>;
}

/// HTTP client of the state oracle.
pub struct OracleClient {
    base_url: String,
    request: Request,
}

impl OracleClient {
    /// Creates a client for the oracle configured in `config`. Requests are never retried at
    /// the transport level.
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            base_url: config.oracle_url.trim_end_matches('/').to_string(),
            request: Request::new(config.http_timeout(), 0),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, HumanKitError> {
        let url = format!("{}{path}", self.base_url);
        log::trace!("oracle GET {url}");
        self.request.json(self.request.get(&url)).await
    }
}

#[async_trait]
impl StateOracle for OracleClient {
    async fn core_state_details(&self, issuer_id: &str) -> Result<CoreStateDetails, HumanKitError> {
        self.get(&format!("/v1/states/{issuer_id}")).await
    }

    async fn merkle_proof(
        &self,
        issuer_id: &str,
        state_hash: &FieldValue,
    ) -> Result<MerkleProof, HumanKitError> {
        self.get(&format!(
            "/v1/states/{issuer_id}/merkle-proof?state={}",
            state_hash.to_hex_string()
        ))
        .await
    }

    async fn operation_proof(
        &self,
        operation_index: &FieldValue,
    ) -> Result<OperationProof, HumanKitError> {
        self.get(&format!("/v1/operations/{operation_index}/proof"))
            .await
    }

    async fn target_state_details(&self) -> Result<TargetStateDetails, HumanKitError> {
        self.get("/v1/roots/latest").await
    }

    async fn transition_params(&self, root: &B256) -> Result<TransitionParams, HumanKitError> {
        self.get(&format!("/v1/transitions/{root}")).await
    }
}
