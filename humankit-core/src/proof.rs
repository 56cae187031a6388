use std::{sync::Arc, time::Duration};

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    chain::{ChainDeployment, SupportedChain},
    contracts,
    credential::{predicate_variable, VerifiableCredential},
    error::HumanKitError,
    field::FieldValue,
    oracle::{CoreStateDetails, MerkleProof, OperationProof, StateOracle, TargetStateDetails},
    session::Session,
    snap::SnapBridge,
    wallet::{challenge_for, WalletSession},
    PipelineConfig,
};

/// Circuit proving a credential query against an on-chain merkle tree.
pub const ON_CHAIN_MTP_CIRCUIT: &str = "credentialAtomicQueryMTPV2OnChain";

/// Groth16 proof components and public signals, as produced by the identity runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectProof {
    /// `A` point, projective (3 coordinates).
    pub pi_a: Vec<FieldValue>,
    /// `B` point, projective pairs in the runtime's coordinate order.
    pub pi_b: Vec<Vec<FieldValue>>,
    /// `C` point, projective.
    pub pi_c: Vec<FieldValue>,
    /// Public inputs of the circuit.
    pub pub_signals: Vec<FieldValue>,
}

/// On-chain data a proof needs before it can be verified on a target chain.
///
/// Every field starts empty and is filled by [`ProofGenerator::load_states_details`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatesDetails {
    /// Issuer state the credential was issued under.
    pub core_state_details: Option<CoreStateDetails>,
    /// Inclusion of that state in the identities-states tree.
    pub merkle_proof: Option<MerkleProof>,
    /// Signature proof of the operation that recorded the state.
    pub operation_proof: Option<OperationProof>,
    /// Latest identities-states root.
    pub target_state_details: Option<TargetStateDetails>,
}

impl StatesDetails {
    /// Whether all four parts are present.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.core_state_details.is_some()
            && self.merkle_proof.is_some()
            && self.operation_proof.is_some()
            && self.target_state_details.is_some()
    }
}

/// A generated proof and the state data gathered for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZkProof {
    /// The SNARK proof.
    pub subject_proof: SubjectProof,
    /// Issuer id (DID tail) the state data belongs to.
    pub issuer_id: String,
    /// Wallet address the proof is bound to, hex without prefix.
    pub challenge: String,
    /// The state data.
    pub states: StatesDetails,
}

/// Borrowed view of a [`ZkProof`] whose state data is complete.
///
/// Only [`ZkProof::submittable`] creates it, so holding one means the check just passed.
#[derive(Debug, Clone, Copy)]
pub struct SubmittableProof<'a> {
    /// The SNARK proof.
    pub subject_proof: &'a SubjectProof,
    /// Issuer state.
    pub core_state_details: &'a CoreStateDetails,
    /// Issuer state inclusion proof.
    pub merkle_proof: &'a MerkleProof,
    /// Operation signature proof.
    pub operation_proof: &'a OperationProof,
    /// Latest identities-states root.
    pub target_state_details: &'a TargetStateDetails,
}

impl ZkProof {
    /// A submittable view, when all state data is present. Evaluated on every call.
    #[must_use]
    pub fn submittable(&self) -> Option<SubmittableProof<'_>> {
        Some(SubmittableProof {
            subject_proof: &self.subject_proof,
            core_state_details: self.states.core_state_details.as_ref()?,
            merkle_proof: self.states.merkle_proof.as_ref()?,
            operation_proof: self.states.operation_proof.as_ref()?,
            target_state_details: self.states.target_state_details.as_ref()?,
        })
    }

    /// Whether the proof can be submitted.
    #[must_use]
    pub fn is_submittable(&self) -> bool {
        self.submittable().is_some()
    }

    /// Whether the proof was generated for `address`. Verifiers reject it from any other
    /// sender.
    #[must_use]
    pub fn is_bound_to(&self, address: &Address) -> bool {
        self.challenge == challenge_for(address)
    }
}

/// The query the verifiers check: the credential subject is a natural person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofQuery {
    /// Circuit the query is proven with.
    pub circuit_id: String,
    /// Issuers whose credentials are accepted.
    pub allowed_issuers: Vec<String>,
    /// Credential type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Predicate over the credential subject.
    pub credential_subject: Value,
}

impl ProofQuery {
    /// `<predicate> == 1` over credentials of `credential`'s issuer and type, with the
    /// predicate variable the verifier on `chain` checks.
    #[must_use]
    pub fn for_chain(credential: &VerifiableCredential, chain: SupportedChain) -> Self {
        let variable = predicate_variable(chain);
        Self {
            circuit_id: ON_CHAIN_MTP_CIRCUIT.to_string(),
            allowed_issuers: vec![credential.issuer.clone()],
            kind: credential
                .credential_type()
                .unwrap_or("IdentityProviders")
                .to_string(),
            credential_subject: json!({ variable: { "$eq": 1 } }),
        }
    }
}

/// Request sent to the runtime's `create_proof`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofRequest {
    /// Unique request id.
    pub request_id: String,
    /// Identity proving the query.
    pub identity_id: String,
    /// The credential the query is evaluated on.
    pub credential: VerifiableCredential,
    /// Wallet address the proof is bound to, hex without prefix.
    pub challenge: String,
    /// Query for the target chain's verifier.
    pub query: ProofQuery,
}

/// Produces proofs and gathers the on-chain state data they need.
pub struct ProofGenerator {
    oracle: Arc<dyn StateOracle>,
    states_poll_interval: Duration,
}

impl ProofGenerator {
    /// Creates a generator reading state data from `oracle`.
    #[must_use]
    pub fn new(oracle: Arc<dyn StateOracle>, config: &PipelineConfig) -> Self {
        Self {
            oracle,
            states_poll_interval: config.states_poll_interval(),
        }
    }

    /// The oracle state data is read from.
    #[must_use]
    pub fn oracle(&self) -> &dyn StateOracle {
        self.oracle.as_ref()
    }

    /// Generates a proof for the session's identity, queried for `chain`'s verifier, and stores
    /// it in the session bound to the wallet's address.
    ///
    /// Uses `credential` when given, the session's cached credential otherwise. The SNARK proof
    /// is stored before state data is loaded, so a failed or cancelled load keeps it and
    /// [`ProofGenerator::reload_states_details`] can resume.
    ///
    /// # Errors
    /// Precondition errors when the identity, the credential or the wallet is missing; runtime
    /// and oracle errors otherwise.
    pub async fn get_zk_proof(
        &self,
        snap: &SnapBridge,
        session: &mut Session,
        wallet: &WalletSession,
        chain: SupportedChain,
        credential: Option<VerifiableCredential>,
        cancel: &CancellationToken,
    ) -> Result<(), HumanKitError> {
        let identity = session.identity()?;
        let credential = match credential {
            Some(credential) => credential,
            None => session
                .credential()
                .cloned()
                .ok_or(HumanKitError::CredentialMissing)?,
        };
        let address = wallet.require_address()?;

        let request = ProofRequest {
            request_id: Uuid::new_v4().to_string(),
            identity_id: identity.id_string().to_string(),
            query: ProofQuery::for_chain(&credential, chain),
            challenge: challenge_for(&address),
            credential,
        };
        log::info!(
            "generating proof {} for {} on {chain}",
            request.request_id,
            request.identity_id
        );

        let subject_proof = snap.create_proof(&request).await?;
        session.set_zk_proof(ZkProof {
            subject_proof,
            issuer_id: request.credential.issuer_id().to_string(),
            challenge: request.challenge,
            states: StatesDetails::default(),
        });

        self.reload_states_details(session, cancel).await
    }

    /// Resumes state loading for the proof held by the session.
    ///
    /// # Errors
    /// [`HumanKitError::ProofMissing`] without a proof; see
    /// [`ProofGenerator::load_states_details`].
    pub async fn reload_states_details(
        &self,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> Result<(), HumanKitError> {
        let proof = session.zk_proof_mut().ok_or(HumanKitError::ProofMissing)?;
        self.load_states_details(&proof.issuer_id, &mut proof.states, cancel)
            .await
    }

    /// Fills every missing part of `states`, polling while the oracle has not indexed the
    /// issuer's state yet.
    ///
    /// A "not yet indexed" answer (`400`) waits one poll interval and retries; parts already
    /// loaded are kept. Any other error ends the loop and is returned as is. The loop runs until
    /// all parts are present or `cancel` fires.
    ///
    /// # Errors
    /// [`HumanKitError::Cancelled`] on cancellation, the oracle's error otherwise.
    pub async fn load_states_details(
        &self,
        issuer_id: &str,
        states: &mut StatesDetails,
        cancel: &CancellationToken,
    ) -> Result<(), HumanKitError> {
        let mut attempt: u32 = 0;
        while !states.is_complete() {
            if cancel.is_cancelled() {
                return Err(HumanKitError::Cancelled);
            }
            attempt += 1;

            match self.fill_states(issuer_id, states).await {
                Ok(()) => {}
                Err(err) if err.is_not_yet_indexed() => {
                    log::debug!(
                        "states of {issuer_id} not indexed yet (attempt {attempt}), retrying in {:?}",
                        self.states_poll_interval
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return Err(HumanKitError::Cancelled),
                        () = tokio::time::sleep(self.states_poll_interval) => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }
        log::info!("states of {issuer_id} loaded after {attempt} attempt(s)");
        Ok(())
    }

    async fn fill_states(
        &self,
        issuer_id: &str,
        states: &mut StatesDetails,
    ) -> Result<(), HumanKitError> {
        let core = match &states.core_state_details {
            Some(core) => core.clone(),
            None => {
                let core = self.oracle.core_state_details(issuer_id).await?;
                states.core_state_details.insert(core).clone()
            }
        };
        if states.merkle_proof.is_none() {
            states.merkle_proof = Some(
                self.oracle
                    .merkle_proof(issuer_id, &core.state_hash)
                    .await?,
            );
        }
        if states.operation_proof.is_none() {
            states.operation_proof = Some(
                self.oracle
                    .operation_proof(&core.last_update_operation_index)
                    .await?,
            );
        }
        if states.target_state_details.is_none() {
            states.target_state_details = Some(self.oracle.target_state_details().await?);
        }
        Ok(())
    }

    /// Whether the chain's state contract already knows the root `proof` verifies against,
    /// making a state transition unnecessary.
    ///
    /// # Errors
    /// Fails when the contract read fails.
    pub async fn is_states_actual(
        &self,
        wallet: &WalletSession,
        deployment: &ChainDeployment,
        proof: &SubmittableProof<'_>,
    ) -> Result<bool, HumanKitError> {
        let on_chain: B256 =
            contracts::identities_states_root(wallet.provider().as_ref(), deployment).await?;
        let expected = proof.target_state_details.root;
        log::debug!("{} states root: on chain {on_chain}, proof {expected}", deployment.chain);
        Ok(on_chain == expected)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use alloy_primitives::Bytes;
    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::{oracle::TransitionParams, Environment};

    pub(crate) fn core_state() -> CoreStateDetails {
        CoreStateDetails {
            issuer_id: FieldValue::parse("10").unwrap(),
            state_hash: FieldValue::parse("43").unwrap(),
            created_at_timestamp: FieldValue::parse("1718000000").unwrap(),
            created_at_block: FieldValue::parse("512").unwrap(),
            last_update_operation_index: FieldValue::parse("77").unwrap(),
        }
    }

    pub(crate) fn complete_states() -> StatesDetails {
        StatesDetails {
            core_state_details: Some(core_state()),
            merkle_proof: Some(MerkleProof {
                proof: vec![B256::repeat_byte(0x22)],
                root: B256::repeat_byte(0x11),
            }),
            operation_proof: Some(OperationProof {
                path: vec![],
                signature: Bytes::from_static(&[1, 2, 3]),
            }),
            target_state_details: Some(TargetStateDetails {
                root: B256::repeat_byte(0x11),
                gist_root: FieldValue::parse("5").unwrap(),
                created_at_timestamp: FieldValue::parse("1718000100").unwrap(),
            }),
        }
    }

    pub(crate) fn subject_proof() -> SubjectProof {
        let f = |values: &[&str]| -> Vec<FieldValue> {
            values.iter().map(|v| FieldValue::parse(v).unwrap()).collect()
        };
        SubjectProof {
            pi_a: f(&["1", "2", "1"]),
            pi_b: vec![f(&["3", "4"]), f(&["5", "6"]), f(&["1", "0"])],
            pi_c: f(&["7", "8", "1"]),
            pub_signals: f(&["9", "10", "11"]),
        }
    }

    /// Oracle answering the core state from a script, everything else immediately.
    pub(crate) struct ScriptedOracle {
        pub core_answers: Mutex<VecDeque<Result<CoreStateDetails, HumanKitError>>>,
        pub core_calls: Mutex<u32>,
    }

    impl ScriptedOracle {
        pub(crate) fn new(answers: Vec<Result<CoreStateDetails, HumanKitError>>) -> Self {
            Self {
                core_answers: Mutex::new(answers.into()),
                core_calls: Mutex::new(0),
            }
        }
    }

    pub(crate) fn not_indexed() -> HumanKitError {
        HumanKitError::NetworkError {
            url: "https://oracle/v1/states/tJ93".to_string(),
            status: Some(400),
            error: "state not found".to_string(),
        }
    }

    #[async_trait]
    impl StateOracle for ScriptedOracle {
        async fn core_state_details(
            &self,
            _issuer_id: &str,
        ) -> Result<CoreStateDetails, HumanKitError> {
            *self.core_calls.lock().unwrap() += 1;
            self.core_answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(core_state()))
        }

        async fn merkle_proof(
            &self,
            _issuer_id: &str,
            _state_hash: &FieldValue,
        ) -> Result<MerkleProof, HumanKitError> {
            Ok(complete_states().merkle_proof.unwrap())
        }

        async fn operation_proof(
            &self,
            _operation_index: &FieldValue,
        ) -> Result<OperationProof, HumanKitError> {
            Ok(complete_states().operation_proof.unwrap())
        }

        async fn target_state_details(&self) -> Result<TargetStateDetails, HumanKitError> {
            Ok(complete_states().target_state_details.unwrap())
        }

        async fn transition_params(
            &self,
            root: &B256,
        ) -> Result<TransitionParams, HumanKitError> {
            Ok(TransitionParams {
                new_identities_states_root: *root,
                gist_data: crate::oracle::GistData {
                    root: FieldValue::parse("5").unwrap(),
                    created_at_timestamp: FieldValue::parse("1718000100").unwrap(),
                },
                proof: Bytes::from_static(&[9]),
            })
        }
    }

    fn generator(oracle: Arc<ScriptedOracle>) -> ProofGenerator {
        ProofGenerator::new(oracle, &PipelineConfig::from_environment(&Environment::Staging))
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_indexed_three_times_then_loaded() {
        let oracle = Arc::new(ScriptedOracle::new(vec![
            Err(not_indexed()),
            Err(not_indexed()),
            Err(not_indexed()),
        ]));
        let generator = generator(Arc::clone(&oracle));
        let mut states = StatesDetails::default();

        let started = Instant::now();
        generator
            .load_states_details("tJ93", &mut states, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*oracle.core_calls.lock().unwrap(), 4);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(90) && elapsed < Duration::from_secs(91));
        assert!(states.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_propagate_on_first_occurrence() {
        let oracle = Arc::new(ScriptedOracle::new(vec![Err(HumanKitError::NetworkError {
            url: "https://oracle/v1/states/tJ93".to_string(),
            status: Some(500),
            error: "internal".to_string(),
        })]));
        let generator = generator(Arc::clone(&oracle));
        let mut states = StatesDetails::default();

        let started = Instant::now();
        let err = generator
            .load_states_details("tJ93", &mut states, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, HumanKitError::NetworkError { status: Some(500), .. }));
        assert_eq!(*oracle.core_calls.lock().unwrap(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!states.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_states_skip_the_oracle() {
        let oracle = Arc::new(ScriptedOracle::new(vec![]));
        let generator = generator(Arc::clone(&oracle));
        let mut states = complete_states();

        generator
            .load_states_details("tJ93", &mut states, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*oracle.core_calls.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_polling() {
        let oracle = Arc::new(ScriptedOracle::new(
            (0..100).map(|_| Err(not_indexed())).collect(),
        ));
        let generator = generator(Arc::clone(&oracle));
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(45)).await;
                cancel.cancel();
            })
        };

        let mut states = StatesDetails::default();
        let err = generator
            .load_states_details("tJ93", &mut states, &cancel)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, HumanKitError::Cancelled));
        assert_eq!(*oracle.core_calls.lock().unwrap(), 2);
    }

    #[test]
    fn test_submittable_requires_all_four_parts() {
        let mut proof = ZkProof {
            subject_proof: subject_proof(),
            issuer_id: "tJ93".to_string(),
            challenge: "00000000000000000000000000000000000000aa".to_string(),
            states: complete_states(),
        };
        assert!(proof.is_submittable());

        let strip: [fn(&mut StatesDetails); 4] = [
            |s| s.core_state_details = None,
            |s| s.merkle_proof = None,
            |s| s.operation_proof = None,
            |s| s.target_state_details = None,
        ];
        for strip_one in strip {
            let mut degraded = proof.clone();
            strip_one(&mut degraded.states);
            assert!(!degraded.is_submittable());
            assert!(!degraded.states.is_complete());
        }

        proof.states.merkle_proof = None;
        assert!(proof.submittable().is_none());
    }

    #[test]
    fn test_proof_is_bound_to_its_challenge() {
        let proof = ZkProof {
            subject_proof: subject_proof(),
            issuer_id: "tJ93".to_string(),
            challenge: challenge_for(&Address::repeat_byte(0xaa)),
            states: complete_states(),
        };
        assert!(proof.is_bound_to(&Address::repeat_byte(0xaa)));
        assert!(!proof.is_bound_to(&Address::repeat_byte(0xbb)));
    }

    #[test]
    fn test_query_uses_the_chain_predicate() {
        let credential: VerifiableCredential =
            serde_json::from_value(crate::credential::tests::credential_json("did:iden3:tQ1x"))
                .unwrap();
        for chain in [SupportedChain::Polygon, SupportedChain::PolygonAmoy] {
            let variable = predicate_variable(chain);
            let query = ProofQuery::for_chain(&credential, chain);
            let value = serde_json::to_value(&query).unwrap();
            assert_eq!(value["circuitId"], ON_CHAIN_MTP_CIRCUIT);
            assert_eq!(value["credentialSubject"], json!({ variable: { "$eq": 1 } }));
            assert_eq!(value["type"], "IdentityProviders");
        }
    }
}
