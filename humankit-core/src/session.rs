use std::collections::{BTreeSet, HashMap};

use alloy_primitives::Address;
use zeroize::Zeroizing;

use crate::{
    chain::SupportedChain,
    credential::VerifiableCredential,
    error::HumanKitError,
    identity::{Identity, IdentityStore},
    proof::ZkProof,
};

/// Chains a proof was submitted on, per identity. Append-only: there is no removal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishedChainSet {
    entries: BTreeSet<(String, SupportedChain)>,
}

impl PublishedChainSet {
    /// Records a submission. Returns `false` when it was already recorded.
    pub fn insert(&mut self, identity_id: &str, chain: SupportedChain) -> bool {
        self.entries.insert((identity_id.to_string(), chain))
    }

    /// Whether the identity's proof was submitted on `chain`.
    #[must_use]
    pub fn contains(&self, identity_id: &str, chain: SupportedChain) -> bool {
        self.entries
            .iter()
            .any(|(id, c)| id == identity_id && *c == chain)
    }

    /// Chains the identity's proof was submitted on, in chain order.
    #[must_use]
    pub fn chains(&self, identity_id: &str) -> Vec<SupportedChain> {
        self.entries
            .iter()
            .filter(|(id, _)| id == identity_id)
            .map(|(_, chain)| *chain)
            .collect()
    }

    /// Number of recorded submissions across identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was submitted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Session-scoped pipeline state. Owned by the sequencer, written by the active step only.
#[derive(Debug, Default)]
pub struct Session {
    identity: IdentityStore,
    credentials: HashMap<String, VerifiableCredential>,
    zk_proof: Option<ZkProof>,
    published: PublishedChainSet,
    state_manually_transited: bool,
}

impl Session {
    /// An empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The identity store.
    #[must_use]
    pub const fn identity_store(&self) -> &IdentityStore {
        &self.identity
    }

    /// The session identity.
    ///
    /// # Errors
    /// [`HumanKitError::IdentityMissing`] before one is created.
    pub fn identity(&self) -> Result<&Identity, HumanKitError> {
        self.identity.require()
    }

    /// Installs `identity`. A different identity invalidates the proof and the manual state
    /// transition; cached credentials stay keyed by their identity.
    pub fn install_identity(&mut self, identity: Identity) -> &Identity {
        let changed = self
            .identity
            .get()
            .is_none_or(|held| held.id_string() != identity.id_string());
        if changed {
            self.zk_proof = None;
            self.state_manually_transited = false;
        }
        self.identity.install(identity)
    }

    /// Key file of the session identity.
    ///
    /// # Errors
    /// [`HumanKitError::IdentityMissing`] before one is created.
    pub fn export_key_file(&self) -> Result<Zeroizing<String>, HumanKitError> {
        self.identity.export_key_file()
    }

    /// The cached credential of the current identity.
    #[must_use]
    pub fn credential(&self) -> Option<&VerifiableCredential> {
        let identity = self.identity.get()?;
        self.credentials.get(identity.id_string())
    }

    /// Caches `credential` for the current identity.
    ///
    /// # Errors
    /// [`HumanKitError::IdentityMissing`] before an identity is created.
    pub fn cache_credential(
        &mut self,
        credential: VerifiableCredential,
    ) -> Result<(), HumanKitError> {
        let id = self.identity.require()?.id_string().to_string();
        self.credentials.insert(id, credential);
        Ok(())
    }

    /// The generated proof, complete or not.
    #[must_use]
    pub const fn zk_proof(&self) -> Option<&ZkProof> {
        self.zk_proof.as_ref()
    }

    pub(crate) fn zk_proof_mut(&mut self) -> Option<&mut ZkProof> {
        self.zk_proof.as_mut()
    }

    /// Stores a freshly generated proof, replacing the previous one.
    pub fn set_zk_proof(&mut self, proof: ZkProof) {
        self.zk_proof = Some(proof);
    }

    /// Whether a proof is held and currently submittable.
    #[must_use]
    pub fn has_submittable_proof(&self) -> bool {
        self.zk_proof.as_ref().is_some_and(ZkProof::is_submittable)
    }

    /// Whether a submittable proof bound to `address` is held.
    #[must_use]
    pub fn has_submittable_proof_for(&self, address: &Address) -> bool {
        self.zk_proof
            .as_ref()
            .is_some_and(|proof| proof.is_submittable() && proof.is_bound_to(address))
    }

    /// Drops the proof together with the manual state transition made for it.
    pub fn discard_zk_proof(&mut self) {
        self.zk_proof = None;
        self.state_manually_transited = false;
    }

    /// Chains the proof was published on.
    #[must_use]
    pub const fn published(&self) -> &PublishedChainSet {
        &self.published
    }

    /// Records a publication of the current identity's proof on `chain`.
    ///
    /// # Errors
    /// [`HumanKitError::IdentityMissing`] before an identity is created.
    pub fn mark_published(&mut self, chain: SupportedChain) -> Result<(), HumanKitError> {
        let id = self.identity.require()?.id_string().to_string();
        if self.published.insert(&id, chain) {
            log::info!("proof of {id} published on {chain}");
        }
        Ok(())
    }

    /// Whether the current identity's proof was published on at least one chain.
    #[must_use]
    pub fn is_submitted(&self) -> bool {
        self.identity
            .get()
            .is_some_and(|identity| !self.published.chains(identity.id_string()).is_empty())
    }

    /// Whether a state transition was sent during this session.
    #[must_use]
    pub const fn state_manually_transited(&self) -> bool {
        self.state_manually_transited
    }

    /// Remembers that a state transition was sent.
    pub fn mark_state_transited(&mut self) {
        self.state_manually_transited = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        identity::IdentityKey,
        proof::tests::{complete_states, subject_proof},
        wallet::challenge_for,
    };

    fn identity(id: &str) -> Identity {
        Identity::new(id.to_string(), "1", IdentityKey::generate()).unwrap()
    }

    fn proof() -> ZkProof {
        ZkProof {
            subject_proof: subject_proof(),
            issuer_id: "tJ93".to_string(),
            challenge: challenge_for(&Address::repeat_byte(0xaa)),
            states: complete_states(),
        }
    }

    #[test]
    fn test_published_set_only_grows() {
        let mut session = Session::new();
        assert!(session.mark_published(SupportedChain::Polygon).is_err());

        session.install_identity(identity("tQ1"));
        session.mark_published(SupportedChain::Polygon).unwrap();
        session.mark_published(SupportedChain::Polygon).unwrap();
        session.mark_published(SupportedChain::Ethereum).unwrap();
        assert!(session.is_submitted());
        assert_eq!(session.published().len(), 2);
        assert_eq!(
            session.published().chains("tQ1"),
            vec![SupportedChain::Ethereum, SupportedChain::Polygon]
        );

        session.install_identity(identity("tQ2"));
        assert!(!session.is_submitted());
        assert_eq!(session.published().len(), 2);
        assert!(session.published().contains("tQ1", SupportedChain::Polygon));
    }

    #[test]
    fn test_new_identity_invalidates_proof() {
        let mut session = Session::new();
        session.install_identity(identity("tQ1"));
        session.set_zk_proof(proof());
        session.mark_state_transited();
        assert!(session.has_submittable_proof());

        // same identity again keeps everything
        session.install_identity(identity("tQ1"));
        assert!(session.has_submittable_proof());
        assert!(session.state_manually_transited());

        session.install_identity(identity("tQ2"));
        assert!(session.zk_proof().is_none());
        assert!(!session.state_manually_transited());
    }

    #[test]
    fn test_proof_for_another_address_is_not_submittable() {
        let mut session = Session::new();
        session.install_identity(identity("tQ1"));
        session.set_zk_proof(proof());
        session.mark_state_transited();
        assert!(session.has_submittable_proof_for(&Address::repeat_byte(0xaa)));
        assert!(!session.has_submittable_proof_for(&Address::repeat_byte(0xbb)));

        session.discard_zk_proof();
        assert!(session.zk_proof().is_none());
        assert!(!session.state_manually_transited());
    }

    #[test]
    fn test_incomplete_proof_is_not_submittable() {
        let mut session = Session::new();
        session.install_identity(identity("tQ1"));
        let mut incomplete = proof();
        incomplete.states.operation_proof = None;
        session.set_zk_proof(incomplete);
        assert!(session.zk_proof().is_some());
        assert!(!session.has_submittable_proof());
    }
}
