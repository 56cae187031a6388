//! ABI bindings of the identity verifier and the identities-state contract, and the call data
//! built from a proof.
use alloy_core::{sol, sol_types::SolCall};
use alloy_primitives::{Address, Bytes, B256, U256};

use crate::{
    chain::ChainDeployment,
    error::HumanKitError,
    field::FieldValue,
    oracle::TransitionParams,
    proof::{SubjectProof, SubmittableProof},
    provider::Eip1193Provider,
    wallet::eth_call,
};

sol! {
    /// Verifier read keyed by the identity.
    #[allow(missing_docs)]
    interface IdentityVerifierById {
        function isIdentityProved(uint256 identityId) external view returns (bool);
    }

    /// Verifier read keyed by the wallet address.
    #[allow(missing_docs)]
    interface IdentityVerifierByAddress {
        function isIdentityProved(address userAddress) external view returns (bool);
    }

    /// Verifier write.
    #[allow(missing_docs)]
    interface IdentityVerifier {
        struct StatesMerkleData {
            uint256 issuerId;
            uint256 issuerState;
            uint256 createdAtTimestamp;
            bytes32[] merkleProof;
        }

        function proveIdentity(
            StatesMerkleData statesMerkleData,
            uint256[] inputs,
            uint256[2] a,
            uint256[2][2] b,
            uint256[2] c
        ) external;
    }

    /// Identities-state contract on a target chain.
    #[allow(missing_docs)]
    interface LightweightState {
        struct GistRootData {
            uint256 root;
            uint256 createdAtTimestamp;
        }

        function identitiesStatesRoot() external view returns (bytes32);

        function signedTransitState(
            bytes32 newIdentitiesStatesRoot,
            GistRootData gistData,
            bytes proof
        ) external;
    }
}

fn decode_error(function: &str, err: impl std::fmt::Display) -> HumanKitError {
    HumanKitError::SerializationError {
        error: format!("{function} returned malformed data: {err}"),
    }
}

fn point<const N: usize>(
    coordinates: &[FieldValue],
    name: &str,
) -> Result<[U256; N], HumanKitError> {
    if coordinates.len() < N {
        return Err(HumanKitError::InvalidInput {
            attribute: name.to_string(),
            reason: format!("expected at least {N} coordinates, got {}", coordinates.len()),
        });
    }
    Ok(std::array::from_fn(|i| coordinates[i].0))
}

/// `pi_b` in the verifier's order: the first two pairs with their inner elements swapped.
///
/// # Errors
/// Fails when `pi_b` has fewer than two pairs of two coordinates.
pub fn swapped_pi_b(pi_b: &[Vec<FieldValue>]) -> Result<[[U256; 2]; 2], HumanKitError> {
    if pi_b.len() < 2 {
        return Err(HumanKitError::InvalidInput {
            attribute: "pi_b".to_string(),
            reason: format!("expected at least 2 pairs, got {}", pi_b.len()),
        });
    }
    let mut b = [[U256::ZERO; 2]; 2];
    for (target, pair) in b.iter_mut().zip(pi_b) {
        let [x, y] = point::<2>(pair, "pi_b")?;
        *target = [y, x];
    }
    Ok(b)
}

/// Call data of `proveIdentity` for a complete proof.
///
/// # Errors
/// Fails when the proof components do not have the Groth16 shape.
pub fn prove_identity_calldata(proof: &SubmittableProof<'_>) -> Result<Bytes, HumanKitError> {
    let SubjectProof {
        pi_a,
        pi_b,
        pi_c,
        pub_signals,
    } = proof.subject_proof;
    let core = proof.core_state_details;

    let call = IdentityVerifier::proveIdentityCall {
        statesMerkleData: IdentityVerifier::StatesMerkleData {
            issuerId: core.issuer_id.0,
            issuerState: core.state_hash.0,
            createdAtTimestamp: core.created_at_timestamp.0,
            merkleProof: proof.merkle_proof.proof.clone(),
        },
        inputs: pub_signals.iter().map(|signal| signal.0).collect(),
        a: point::<2>(pi_a, "pi_a")?,
        b: swapped_pi_b(pi_b)?,
        c: point::<2>(pi_c, "pi_c")?,
    };
    Ok(call.abi_encode().into())
}

/// Call data of `signedTransitState`.
#[must_use]
pub fn signed_transit_state_calldata(params: &TransitionParams) -> Bytes {
    LightweightState::signedTransitStateCall {
        newIdentitiesStatesRoot: params.new_identities_states_root,
        gistData: LightweightState::GistRootData {
            root: params.gist_data.root.0,
            createdAtTimestamp: params.gist_data.created_at_timestamp.0,
        },
        proof: params.proof.clone(),
    }
    .abi_encode()
    .into()
}

/// Whether the verifier on `deployment` recorded `identity_id` as proved.
///
/// # Errors
/// Fails when the read fails or returns malformed data.
pub async fn is_identity_proved(
    provider: &dyn Eip1193Provider,
    deployment: &ChainDeployment,
    identity_id: FieldValue,
) -> Result<bool, HumanKitError> {
    let data = IdentityVerifierById::isIdentityProvedCall {
        identityId: identity_id.0,
    }
    .abi_encode();
    let output = eth_call(provider, deployment.verifier, data.into()).await?;
    IdentityVerifierById::isIdentityProvedCall::abi_decode_returns(&output)
        .map_err(|e| decode_error("isIdentityProved(uint256)", e))
}

/// Whether the verifier on `deployment` recorded `address` as proved.
///
/// # Errors
/// Fails when the read fails or returns malformed data.
pub async fn is_address_proved(
    provider: &dyn Eip1193Provider,
    deployment: &ChainDeployment,
    address: Address,
) -> Result<bool, HumanKitError> {
    let data = IdentityVerifierByAddress::isIdentityProvedCall {
        userAddress: address,
    }
    .abi_encode();
    let output = eth_call(provider, deployment.verifier, data.into()).await?;
    IdentityVerifierByAddress::isIdentityProvedCall::abi_decode_returns(&output)
        .map_err(|e| decode_error("isIdentityProved(address)", e))
}

/// The identities-states root the state contract on `deployment` currently trusts.
///
/// # Errors
/// Fails when the read fails or returns malformed data.
pub async fn identities_states_root(
    provider: &dyn Eip1193Provider,
    deployment: &ChainDeployment,
) -> Result<B256, HumanKitError> {
    let data = LightweightState::identitiesStatesRootCall {}.abi_encode();
    let output = eth_call(provider, deployment.state_contract, data.into()).await?;
    LightweightState::identitiesStatesRootCall::abi_decode_returns(&output)
        .map_err(|e| decode_error("identitiesStatesRoot()", e))
}
