//! The user-facing flow: a linear state machine over [`Step`].
//!
//! The sequencer owns every pipeline component and the [`Session`]; each step action borrows
//! what it needs, so exactly one step writes session state at a time.
use std::sync::Arc;

use serde_json::Value;
use strum::{Display, EnumCount, EnumIter, IntoEnumIterator};
use tokio_util::sync::CancellationToken;

use crate::{
    chain::SupportedChain,
    credential::CredentialAcquisition,
    error::{ErrorKind, HumanKitError},
    identity::IdentityKey,
    issuer::KycProvider,
    oracle::{OracleClient, StateOracle},
    proof::ProofGenerator,
    provider::Eip1193Provider,
    publication::{ProvedStatus, PublicationDecider, PublishOutcome},
    session::Session,
    snap::SnapBridge,
    wallet::{WalletEvent, WalletSession},
    PipelineConfig,
};

/// A step of the flow, in forward order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, EnumCount,
)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[strum(serialize_all = "snake_case")]
pub enum Step {
    /// Connect a wallet on a supported chain.
    WalletConnection,
    /// Install or connect the identity runtime.
    SnapConnection,
    /// Create or import the identity.
    IdentityCreation,
    /// Verify with a KYC provider and obtain the credential.
    KycProviders,
    /// Generate the proof.
    ProofGenerating,
    /// Waiting for the proof's state data.
    ProofGeneratingLoader,
    /// Publish the proof on a chain.
    ProofSubmitting,
    /// Done.
    ProofSubmitted,
}

impl Step {
    /// The first step.
    pub const FIRST: Self = Self::WalletConnection;
    /// The terminal step.
    pub const LAST: Self = Self::ProofSubmitted;

    /// Zero-based position.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The following step; the terminal step stays put.
    #[must_use]
    pub fn next(self) -> Self {
        Self::iter().nth(self.index() + 1).unwrap_or(self)
    }

    /// The preceding step; the first step stays put.
    #[must_use]
    pub fn prev(self) -> Self {
        self.index()
            .checked_sub(1)
            .and_then(|i| Self::iter().nth(i))
            .unwrap_or(self)
    }
}

/// What is already in place for the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// An account is connected.
    pub wallet_connected: bool,
    /// The wallet is on a chain with a deployment.
    pub valid_chain: bool,
    /// The identity runtime is installed.
    pub snap_installed: bool,
    /// An identity exists.
    pub has_identity: bool,
    /// A credential exists for it.
    pub has_credential: bool,
    /// A submittable proof bound to the connected account exists.
    pub has_proof: bool,
    /// The proof was published.
    pub is_submitted: bool,
}

/// The earliest step whose precondition is unmet.
#[must_use]
pub const fn detect_start_step(snapshot: &SessionSnapshot) -> Step {
    if !snapshot.wallet_connected || !snapshot.valid_chain {
        Step::WalletConnection
    } else if !snapshot.snap_installed {
        Step::SnapConnection
    } else if !snapshot.has_identity {
        Step::IdentityCreation
    } else if !snapshot.has_credential {
        Step::KycProviders
    } else if !snapshot.has_proof {
        Step::ProofGenerating
    } else if !snapshot.is_submitted {
        Step::ProofSubmitting
    } else {
        Step::ProofSubmitted
    }
}

/// Sink for errors and warnings the user should learn about without being blocked.
pub trait ErrorReporter: Send + Sync {
    /// A recoverable failure of `step`.
    fn report(&self, error: &HumanKitError, step: Step);

    /// A condition that stops the flow without being a failure.
    fn warn(&self, message: &str);
}

/// Reporter writing to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, error: &HumanKitError, step: Step) {
        log::error!("{step} failed: {error}");
    }

    fn warn(&self, message: &str) {
        log::warn!("{message}");
    }
}

/// Drives the flow and owns every component.
pub struct StepSequencer {
    config: PipelineConfig,
    wallet: WalletSession,
    snap: SnapBridge,
    credentials: CredentialAcquisition,
    proofs: ProofGenerator,
    publication: PublicationDecider,
    session: Session,
    reporter: Arc<dyn ErrorReporter>,
    current: Step,
    steps_progress: f64,
    is_load_failed: bool,
    selected_chain: SupportedChain,
}

impl StepSequencer {
    /// Creates a sequencer talking to the wallet through `provider` and to the configured
    /// state oracle over HTTP.
    ///
    /// `config` must carry the deployment of every chain to publish on, including
    /// `default_chain`: [`PipelineConfig::from_environment`] ships none, so add them with
    /// [`PipelineConfig::with_deployment`] or load them from JSON. Without one, wallet
    /// connection fails with [`HumanKitError::UnsupportedChain`].
    #[must_use]
    pub fn new(
        provider: Arc<dyn Eip1193Provider>,
        config: PipelineConfig,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let oracle = Arc::new(OracleClient::new(&config));
        Self::with_oracle(provider, oracle, config, reporter)
    }

    /// Creates a sequencer over an explicit oracle. See [`StepSequencer::new`] for the
    /// deployments `config` needs.
    #[must_use]
    pub fn with_oracle(
        provider: Arc<dyn Eip1193Provider>,
        oracle: Arc<dyn StateOracle>,
        config: PipelineConfig,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        if config.deployment(config.default_chain).is_none() {
            log::warn!(
                "no deployment configured for the default chain {}, wallet connection will fail",
                config.default_chain
            );
        }
        let mut sequencer = Self {
            wallet: WalletSession::new(Arc::clone(&provider), &config),
            snap: SnapBridge::new(provider, &config),
            credentials: CredentialAcquisition::new(&config),
            proofs: ProofGenerator::new(oracle, &config),
            publication: PublicationDecider::new(&config),
            session: Session::new(),
            reporter,
            current: Step::FIRST,
            steps_progress: 0.0,
            is_load_failed: false,
            selected_chain: config.default_chain,
            config,
        };
        sequencer.set_step(Step::FIRST);
        sequencer
    }

    /// The current step.
    #[must_use]
    pub const fn current_step(&self) -> Step {
        self.current
    }

    /// Progress through the flow in percent: `(index + 1) / steps * 100`.
    #[must_use]
    pub const fn steps_progress(&self) -> f64 {
        self.steps_progress
    }

    /// Whether the flow failed to initialize and needs a reload.
    #[must_use]
    pub const fn is_load_failed(&self) -> bool {
        self.is_load_failed
    }

    /// Session state.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Wallet state.
    #[must_use]
    pub const fn wallet(&self) -> &WalletSession {
        &self.wallet
    }

    /// The pipeline configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The chain proofs are generated for and published on by default.
    #[must_use]
    pub const fn selected_chain(&self) -> SupportedChain {
        self.selected_chain
    }

    /// Selects the target chain.
    ///
    /// # Errors
    /// [`HumanKitError::UnsupportedChain`] when the chain has no deployment.
    pub fn select_chain(&mut self, chain: SupportedChain) -> Result<(), HumanKitError> {
        self.publication.deployment(chain)?;
        self.selected_chain = chain;
        Ok(())
    }

    /// Moves one step forward. No-op on the terminal step.
    pub fn next(&mut self) {
        self.set_step(self.current.next());
    }

    /// Moves one step back. No-op on the first step.
    pub fn prev(&mut self) {
        self.set_step(self.current.prev());
    }

    /// Jumps to `step`.
    pub fn set_step(&mut self, step: Step) {
        if step != self.current {
            log::debug!("step {} -> {step}", self.current);
        }
        self.current = step;
        #[allow(clippy::cast_precision_loss)]
        let progress = (step.index() + 1) as f64 / Step::COUNT as f64 * 100.0;
        self.steps_progress = progress;
    }

    /// Routes a failed step action.
    ///
    /// Precondition errors send the user to the step resolving them and are not reported.
    /// Cancellation rewinds silently. Initialization failures mark the flow as failed. Every
    /// other error is reported and rewinds to the previous step with an action, so a failed
    /// publication lands on [`Step::ProofGenerating`].
    pub fn handle_error(&mut self, error: &HumanKitError) {
        match error.kind() {
            ErrorKind::Precondition => {
                if let Some(step) = error.required_step() {
                    self.set_step(step);
                }
            }
            ErrorKind::Fatal => {
                self.is_load_failed = true;
                self.reporter.report(error, self.current);
            }
            ErrorKind::Transient | ErrorKind::Remote => {
                if !matches!(error, HumanKitError::Cancelled) {
                    self.reporter.report(error, self.current);
                }
                self.rewind();
            }
        }
    }

    fn rewind(&mut self) {
        let mut step = self.current.prev();
        // the loader is only entered from generate_proof
        if step == Step::ProofGeneratingLoader {
            step = step.prev();
        }
        self.set_step(step);
    }

    /// Applies a wallet event. Losing the account or moving to an unsupported chain sends the
    /// user back to wallet connection.
    ///
    /// Switching to another account drops a proof bound to the previous one; a user about to
    /// publish it goes back to proof generation.
    pub fn apply_wallet_event(&mut self, event: WalletEvent) {
        self.wallet.apply_event(event);

        if let Some(address) = self.wallet.address() {
            let stale = self
                .session
                .zk_proof()
                .is_some_and(|proof| !proof.is_bound_to(&address));
            if stale {
                log::info!("account changed to {address}, dropping the proof");
                self.session.discard_zk_proof();
                if self.current == Step::ProofSubmitting {
                    self.set_step(Step::ProofGenerating);
                }
            }
        }

        if !self.wallet.is_connected() || !self.is_valid_chain() {
            self.set_step(Step::WalletConnection);
        }
    }

    /// Gathers what is in place. A failing runtime install check counts as "not installed".
    pub async fn collect_snapshot(&self) -> SessionSnapshot {
        let snap_installed = match self.snap.is_installed().await {
            Ok(installed) => installed,
            Err(err) => {
                log::debug!("runtime install check failed: {err}");
                false
            }
        };
        self.snapshot_with(snap_installed)
    }

    fn snapshot_with(&self, snap_installed: bool) -> SessionSnapshot {
        SessionSnapshot {
            wallet_connected: self.wallet.is_connected(),
            valid_chain: self.is_valid_chain(),
            snap_installed,
            has_identity: self.session.identity_store().get().is_some(),
            has_credential: self.session.credential().is_some(),
            has_proof: self.proof_for_wallet(),
            is_submitted: self.session.is_submitted(),
        }
    }

    /// Whether the session holds a submittable proof bound to the connected account.
    fn proof_for_wallet(&self) -> bool {
        self.wallet
            .address()
            .is_some_and(|address| self.session.has_submittable_proof_for(&address))
    }

    fn is_valid_chain(&self) -> bool {
        self.wallet
            .chain_id()
            .and_then(|id| self.config.deployment_by_id(id))
            .is_some()
    }

    /// Picks the start step from what is already in place.
    ///
    /// Restores an existing wallet authorization, then, when the wallet is connected and the
    /// runtime installed, derives the identity and jumps to [`Step::ProofSubmitted`] if it is
    /// already proved on the wallet's chain. A failing derivation marks the flow as failed.
    pub async fn bootstrap(&mut self) {
        self.bootstrap_with_key(None).await;
    }

    /// [`StepSequencer::bootstrap`] for a returning user holding a key file: the identity is
    /// derived from `key` instead of fresh key material.
    pub async fn bootstrap_with_key(&mut self, key: Option<IdentityKey>) {
        if let Err(err) = self.wallet.restore().await {
            log::debug!("no wallet authorization to restore: {err}");
        }

        let snapshot = self.collect_snapshot().await;
        self.set_step(detect_start_step(&snapshot));

        if snapshot.wallet_connected && snapshot.snap_installed {
            if let Err(err) = self.enter_identity_creation(key).await {
                self.handle_error(&HumanKitError::LoadFailed {
                    error: err.to_string(),
                });
                return;
            }
            if self.current != Step::ProofSubmitted {
                let snapshot = self.snapshot_with(true);
                self.set_step(detect_start_step(&snapshot));
            }
        }
    }

    /// Creates or retrieves the identity and short-circuits to [`Step::ProofSubmitted`] when it
    /// is already proved. Returns whether it short-circuited.
    async fn enter_identity_creation(
        &mut self,
        key: Option<IdentityKey>,
    ) -> Result<bool, HumanKitError> {
        self.credentials
            .create_identity(&self.snap, &mut self.session, key)
            .await?;
        let proved = self.already_proved().await.is_some_and(ProvedStatus::is_proved);
        if proved {
            self.reporter
                .warn("this identity is already proved, nothing left to do");
            self.set_step(Step::ProofSubmitted);
        }
        Ok(proved)
    }

    /// Opportunistic proved check on the wallet's current chain. Failures are logged and
    /// treated as unknown.
    async fn already_proved(&self) -> Option<ProvedStatus> {
        let deployment = self.config.deployment_by_id(self.wallet.chain_id()?)?;
        let identity = self.session.identity().ok()?;
        let address = self.wallet.address()?;
        match self
            .publication
            .check_proved(&self.wallet, deployment, identity.id_bigint(), address)
            .await
        {
            Ok(status) => Some(status),
            Err(err) => {
                log::debug!("proved check skipped: {err}");
                None
            }
        }
    }

    fn expect_step(&self, expected: Step) -> Result<(), HumanKitError> {
        if self.current == expected {
            Ok(())
        } else {
            Err(HumanKitError::WrongStep {
                expected,
                current: self.current,
            })
        }
    }

    fn finish<T>(&mut self, result: Result<T, HumanKitError>) -> Result<T, HumanKitError> {
        if let Err(err) = &result {
            self.handle_error(err);
        }
        result
    }

    /// [`Step::WalletConnection`]: connects the wallet and moves it to the selected chain when
    /// it is on an unsupported one.
    ///
    /// # Errors
    /// Wallet errors; the flow is rewound through [`StepSequencer::handle_error`].
    pub async fn connect_wallet(&mut self) -> Result<(), HumanKitError> {
        self.expect_step(Step::WalletConnection)?;
        let result = self.try_connect_wallet().await;
        self.finish(result)?;
        self.next();
        Ok(())
    }

    async fn try_connect_wallet(&mut self) -> Result<(), HumanKitError> {
        self.wallet.connect().await?;
        if !self.is_valid_chain() {
            self.publication
                .ensure_chain(&mut self.wallet, self.selected_chain)
                .await?;
        }
        Ok(())
    }

    /// [`Step::SnapConnection`]: installs the runtime, then enters identity creation.
    ///
    /// # Errors
    /// Runtime errors; the flow is rewound through [`StepSequencer::handle_error`].
    pub async fn connect_snap(&mut self) -> Result<(), HumanKitError> {
        self.expect_step(Step::SnapConnection)?;
        let result = self.snap.connect().await;
        self.finish(result)?;
        self.next();

        let result = self.enter_identity_creation(None).await.map(drop);
        self.finish(result)
    }

    /// [`Step::IdentityCreation`]: creates the identity, or imports `key`, then moves on unless
    /// the identity is already proved.
    ///
    /// # Errors
    /// Runtime errors; the flow is rewound through [`StepSequencer::handle_error`].
    pub async fn create_identity(&mut self, key: Option<IdentityKey>) -> Result<(), HumanKitError> {
        self.expect_step(Step::IdentityCreation)?;
        let result = self.try_create_identity(key).await;
        if self.finish(result)? {
            self.reporter
                .warn("this identity is already proved, nothing left to do");
            self.set_step(Step::ProofSubmitted);
        } else {
            self.next();
        }
        Ok(())
    }

    async fn try_create_identity(&mut self, key: Option<IdentityKey>) -> Result<bool, HumanKitError> {
        self.credentials
            .create_identity(&self.snap, &mut self.session, key)
            .await?;
        Ok(self
            .already_proved()
            .await
            .is_some_and(ProvedStatus::is_proved))
    }

    /// [`Step::KycProviders`]: verifies with `provider`, waits for the claim offer and obtains
    /// the credential.
    ///
    /// # Errors
    /// [`HumanKitError::ClaimOfferNotReady`] when the issuer's polling budget runs out;
    /// issuer, wallet and runtime errors otherwise.
    pub async fn acquire_credentials(
        &mut self,
        provider: KycProvider,
        payload: Value,
    ) -> Result<(), HumanKitError> {
        self.expect_step(Step::KycProviders)?;
        let result = self.try_acquire_credentials(provider, payload).await;
        self.finish(result)?;
        self.next();
        Ok(())
    }

    async fn try_acquire_credentials(
        &mut self,
        provider: KycProvider,
        payload: Value,
    ) -> Result<(), HumanKitError> {
        let identity = self.session.identity()?;
        self.credentials
            .verify_provider(&self.wallet, identity, provider, payload)
            .await?;
        if !self
            .credentials
            .is_claim_offer_exists(identity, provider)
            .await
        {
            return Err(HumanKitError::ClaimOfferNotReady {
                attempts: self.config.claim_offer_max_attempts,
            });
        }
        self.credentials
            .get_verifiable_credentials(&self.snap, &mut self.session, self.selected_chain, provider)
            .await?;
        Ok(())
    }

    /// [`Step::ProofGenerating`]: generates the proof, waiting in
    /// [`Step::ProofGeneratingLoader`] until its state data is loaded. `cancel` aborts the wait.
    ///
    /// A proof of the connected account whose state data is incomplete is resumed rather than
    /// regenerated; a submittable one is kept and the flow moves straight to
    /// [`Step::ProofSubmitting`].
    ///
    /// # Errors
    /// [`HumanKitError::Cancelled`] on cancellation; runtime and oracle errors otherwise.
    pub async fn generate_proof(&mut self, cancel: &CancellationToken) -> Result<(), HumanKitError> {
        self.expect_step(Step::ProofGenerating)?;
        if self.proof_for_wallet() {
            log::info!("reusing the submittable proof");
            self.set_step(Step::ProofSubmitting);
            return Ok(());
        }
        self.next();

        let resumable = self.wallet.address().is_some_and(|address| {
            self.session
                .zk_proof()
                .is_some_and(|proof| proof.is_bound_to(&address))
        });
        let result = if resumable {
            self.proofs
                .reload_states_details(&mut self.session, cancel)
                .await
        } else {
            self.proofs
                .get_zk_proof(
                    &self.snap,
                    &mut self.session,
                    &self.wallet,
                    self.selected_chain,
                    None,
                    cancel,
                )
                .await
        };
        self.finish(result)?;
        self.next();
        Ok(())
    }

    /// [`Step::ProofSubmitting`]: publishes the proof on `chain`, or the selected chain. Also
    /// accepted on [`Step::ProofSubmitted`] to publish on further chains.
    ///
    /// An already-proved identity or address is reported as a warning and returned as
    /// [`PublishOutcome::AlreadyProved`]; the step does not change.
    ///
    /// # Errors
    /// Wallet, oracle and transaction errors.
    pub async fn publish(
        &mut self,
        chain: Option<SupportedChain>,
    ) -> Result<PublishOutcome, HumanKitError> {
        if self.current != Step::ProofSubmitted {
            self.expect_step(Step::ProofSubmitting)?;
        }
        let chain = chain.unwrap_or(self.selected_chain);
        let result = self
            .publication
            .publish(&mut self.wallet, &self.proofs, &mut self.session, chain)
            .await;
        let outcome = self.finish(result)?;

        match &outcome {
            PublishOutcome::AlreadyProved(status) => self.reporter.warn(&format!(
                "cannot publish on {chain}: already proved (identity: {}, address: {})",
                status.by_identity, status.by_address
            )),
            PublishOutcome::Published { .. } => self.set_step(Step::ProofSubmitted),
        }
        Ok(outcome)
    }

    /// Key file of the session identity.
    ///
    /// # Errors
    /// [`HumanKitError::IdentityMissing`] before one is created.
    pub fn export_key_file(&self) -> Result<zeroize::Zeroizing<String>, HumanKitError> {
        self.session.export_key_file()
    }
}
