use alloy_primitives::{Address, B256};

use crate::{
    chain::{ChainDeployment, SupportedChain},
    contracts,
    error::HumanKitError,
    field::FieldValue,
    oracle::StateOracle,
    proof::ProofGenerator,
    session::Session,
    wallet::WalletSession,
    PipelineConfig,
};

/// How a proof reaches a target chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicationPath {
    /// The chain does not know the proof's root yet: transit the state, then submit.
    TransitState,
    /// Submit the proof directly.
    SubmitProof,
}

/// Which of the two on-chain proved records are set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvedStatus {
    /// The identity was proved.
    pub by_identity: bool,
    /// The wallet address was proved.
    pub by_address: bool,
}

impl ProvedStatus {
    /// Whether either record is set.
    #[must_use]
    pub const fn is_proved(self) -> bool {
        self.by_identity || self.by_address
    }
}

/// Result of a publication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Nothing was sent: the identity or the address is already proved on the chain.
    AlreadyProved(ProvedStatus),
    /// The proof was submitted.
    Published {
        /// Target chain.
        chain: SupportedChain,
        /// Hash of the state transition, when one was needed.
        transition_tx: Option<B256>,
        /// Hash of the proof submission.
        submission_tx: B256,
    },
}

/// Picks the publication path. A transition is needed only when the chain lags behind the
/// proof and no transition was sent yet this session.
#[must_use]
pub const fn choose_path(states_actual: bool, state_manually_transited: bool) -> PublicationPath {
    if !states_actual && !state_manually_transited {
        PublicationPath::TransitState
    } else {
        PublicationPath::SubmitProof
    }
}

/// Drives proof publication on a user-selected chain.
pub struct PublicationDecider {
    deployments: Vec<ChainDeployment>,
}

impl PublicationDecider {
    /// Creates a decider over the deployments in `config`.
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            deployments: config.chains.clone(),
        }
    }

    /// The deployment on `chain`.
    ///
    /// # Errors
    /// [`HumanKitError::UnsupportedChain`] when the chain is not configured.
    pub fn deployment(&self, chain: SupportedChain) -> Result<&ChainDeployment, HumanKitError> {
        self.deployments
            .iter()
            .find(|d| d.chain == chain)
            .ok_or(HumanKitError::UnsupportedChain {
                chain_id: chain.chain_id(),
            })
    }

    /// Switches the wallet to `chain`, registering the chain first when the wallet does not
    /// know it.
    ///
    /// # Errors
    /// Fails for unconfigured chains and rejected switches.
    pub async fn ensure_chain(
        &self,
        wallet: &mut WalletSession,
        chain: SupportedChain,
    ) -> Result<ChainDeployment, HumanKitError> {
        let deployment = self.deployment(chain)?.clone();
        wallet.switch_chain(&deployment).await?;
        Ok(deployment)
    }

    /// Reads both proved records on the wallet's current chain.
    ///
    /// # Errors
    /// Fails when either read fails.
    pub async fn check_proved(
        &self,
        wallet: &WalletSession,
        deployment: &ChainDeployment,
        identity_id: FieldValue,
        address: Address,
    ) -> Result<ProvedStatus, HumanKitError> {
        let provider = wallet.provider();
        Ok(ProvedStatus {
            by_identity: contracts::is_identity_proved(provider.as_ref(), deployment, identity_id)
                .await?,
            by_address: contracts::is_address_proved(provider.as_ref(), deployment, address)
                .await?,
        })
    }

    /// Moves the chain's state contract to the root the session's proof verifies against.
    ///
    /// # Errors
    /// Fails without a complete proof, or when the oracle, the wallet or the transaction fails.
    pub async fn transit_state(
        &self,
        wallet: &WalletSession,
        oracle: &dyn StateOracle,
        deployment: &ChainDeployment,
        session: &mut Session,
    ) -> Result<B256, HumanKitError> {
        let root = submittable_root(session)?;
        let params = oracle.transition_params(&root).await?;
        let calldata = contracts::signed_transit_state_calldata(&params);

        let tx_hash = wallet
            .send_transaction(deployment.state_contract, calldata)
            .await?;
        wallet.wait_for_receipt(tx_hash).await?;
        session.mark_state_transited();
        log::info!("state transited on {} to {root}", deployment.chain);
        Ok(tx_hash)
    }

    /// Submits the session's proof to the verifier and records the chain as published.
    ///
    /// # Errors
    /// Fails without a complete proof, or when the wallet or the transaction fails.
    pub async fn submit_proof(
        &self,
        wallet: &WalletSession,
        deployment: &ChainDeployment,
        session: &mut Session,
    ) -> Result<B256, HumanKitError> {
        let calldata = {
            let proof = session.zk_proof().ok_or(HumanKitError::ProofMissing)?;
            let submittable = proof.submittable().ok_or(HumanKitError::ProofIncomplete)?;
            contracts::prove_identity_calldata(&submittable)?
        };

        let tx_hash = wallet.send_transaction(deployment.verifier, calldata).await?;
        wallet.wait_for_receipt(tx_hash).await?;
        session.mark_published(deployment.chain)?;
        Ok(tx_hash)
    }

    /// Publishes the session's proof on `chain`.
    ///
    /// Switches the wallet to the chain, stops with [`PublishOutcome::AlreadyProved`] when the
    /// identity or the address is already proved there, transits the state when the chain lags
    /// behind the proof, then submits.
    ///
    /// # Errors
    /// Precondition errors without a wallet, identity or complete proof, or when the proof is
    /// bound to another account; remote errors from any of the reads and transactions.
    pub async fn publish(
        &self,
        wallet: &mut WalletSession,
        proofs: &ProofGenerator,
        session: &mut Session,
        chain: SupportedChain,
    ) -> Result<PublishOutcome, HumanKitError> {
        let address = wallet.require_address()?;
        let identity_id = session.identity()?.id_bigint();
        submittable_root(session)?;
        if !session.has_submittable_proof_for(&address) {
            log::warn!("proof was generated for another account than {address}");
            return Err(HumanKitError::ProofMissing);
        }

        let deployment = self.ensure_chain(wallet, chain).await?;

        let status = self
            .check_proved(wallet, &deployment, identity_id, address)
            .await?;
        if status.is_proved() {
            log::warn!("already proved on {chain}: {status:?}");
            return Ok(PublishOutcome::AlreadyProved(status));
        }

        let states_actual = if session.state_manually_transited() {
            true
        } else {
            let proof = session.zk_proof().ok_or(HumanKitError::ProofMissing)?;
            let submittable = proof.submittable().ok_or(HumanKitError::ProofIncomplete)?;
            proofs
                .is_states_actual(wallet, &deployment, &submittable)
                .await?
        };

        let transition_tx = match choose_path(states_actual, session.state_manually_transited()) {
            PublicationPath::TransitState => Some(
                self.transit_state(wallet, proofs.oracle(), &deployment, session)
                    .await?,
            ),
            PublicationPath::SubmitProof => None,
        };

        let submission_tx = self.submit_proof(wallet, &deployment, session).await?;
        Ok(PublishOutcome::Published {
            chain,
            transition_tx,
            submission_tx,
        })
    }
}

fn submittable_root(session: &Session) -> Result<B256, HumanKitError> {
    let proof = session.zk_proof().ok_or(HumanKitError::ProofMissing)?;
    let submittable = proof.submittable().ok_or(HumanKitError::ProofIncomplete)?;
    Ok(submittable.target_state_details.root)
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(false, false => PublicationPath::TransitState ; "stale chain")]
    #[test_case(true, false => PublicationPath::SubmitProof ; "actual chain")]
    #[test_case(false, true => PublicationPath::SubmitProof ; "after manual transition")]
    #[test_case(true, true => PublicationPath::SubmitProof ; "actual after transition")]
    fn test_choose_path(states_actual: bool, transited: bool) -> PublicationPath {
        choose_path(states_actual, transited)
    }

    #[test]
    fn test_proved_status() {
        assert!(!ProvedStatus::default().is_proved());
        assert!(ProvedStatus {
            by_identity: false,
            by_address: true
        }
        .is_proved());
    }
}
