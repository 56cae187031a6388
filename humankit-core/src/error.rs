use thiserror::Error;

use crate::sequencer::Step;

/// Error outputs from `HumanKit`
#[derive(Debug, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum HumanKitError {
    /// The presented input is not valid for the requested operation
    #[error("invalid_input_{attribute}: {reason}")]
    InvalidInput {
        /// The attribute that was rejected.
        attribute: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The presented data is not a valid 256-bit integer
    #[error("invalid_number")]
    InvalidNumber,
    /// Unexpected error serializing or deserializing information
    #[error("serialization_error: {error}")]
    SerializationError {
        /// Details of the failure.
        error: String,
    },
    /// An HTTP request failed or returned a non-success status
    #[error("network_error ({url}, status {status:?}): {error}")]
    NetworkError {
        /// The requested URL.
        url: String,
        /// The HTTP status, if a response was received.
        status: Option<u16>,
        /// Details of the failure.
        error: String,
    },
    /// The wallet provider rejected an RPC request
    #[error("provider_rpc_error {code}: {message}")]
    ProviderRpc {
        /// EIP-1193 / JSON-RPC error code.
        code: i64,
        /// Message returned by the provider.
        message: String,
    },
    /// A submitted transaction was mined but reverted
    #[error("transaction_reverted: {tx_hash}")]
    TransactionReverted {
        /// Hash of the reverted transaction.
        tx_hash: String,
    },
    /// A transaction receipt did not show up within the polling budget
    #[error("transaction_pending: {tx_hash}")]
    TransactionPending {
        /// Hash of the pending transaction.
        tx_hash: String,
    },
    /// The issuer did not prepare a claim offer within the polling budget
    #[error("claim_offer_not_ready after {attempts} attempts")]
    ClaimOfferNotReady {
        /// Number of polls performed.
        attempts: u32,
    },
    /// The wallet is not connected
    #[error("wallet_not_connected")]
    WalletNotConnected,
    /// The wallet is connected to a chain that has no deployment
    #[error("unsupported_chain: {chain_id}")]
    UnsupportedChain {
        /// The chain id reported by the wallet.
        chain_id: u64,
    },
    /// The identity runtime is not installed in the wallet
    #[error("snap_not_installed")]
    SnapNotInstalled,
    /// No identity has been created for this session
    #[error("identity_missing")]
    IdentityMissing,
    /// No verifiable credential has been obtained for the current identity
    #[error("credential_missing")]
    CredentialMissing,
    /// No zero-knowledge proof has been generated
    #[error("proof_missing")]
    ProofMissing,
    /// The proof lacks on-chain state data required for submission
    #[error("proof_incomplete")]
    ProofIncomplete,
    /// A step action was invoked while a different step is current
    #[error("wrong_step: expected {expected}, current {current}")]
    WrongStep {
        /// The step the action belongs to.
        expected: Step,
        /// The step that is current.
        current: Step,
    },
    /// A polling loop was cancelled before it completed
    #[error("cancelled")]
    Cancelled,
    /// The flow could not be initialized and must be reloaded
    #[error("load_failed: {error}")]
    LoadFailed {
        /// Details of the failure.
        error: String,
    },
    /// Unhandled error
    #[error("generic_error: {error}")]
    Generic {
        /// Details of the failure.
        error: String,
    },
}

/// Broad classes of [`HumanKitError`], deciding how the sequencer reacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A prior step is incomplete. The user is sent back to it; nothing is reported.
    Precondition,
    /// Remote data is not available yet. Retried silently where a retry budget exists.
    Transient,
    /// A genuine remote or input failure. Reported, and the flow rewinds to the previous step
    /// with an action.
    Remote,
    /// The flow cannot continue at all.
    Fatal,
}

impl HumanKitError {
    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::WalletNotConnected
            | Self::UnsupportedChain { .. }
            | Self::SnapNotInstalled
            | Self::IdentityMissing
            | Self::CredentialMissing
            | Self::ProofMissing
            | Self::ProofIncomplete
            | Self::WrongStep { .. } => ErrorKind::Precondition,
            Self::NetworkError {
                status: Some(400), ..
            }
            | Self::TransactionPending { .. } => ErrorKind::Transient,
            Self::LoadFailed { .. } => ErrorKind::Fatal,
            _ => ErrorKind::Remote,
        }
    }

    /// Whether the state oracle signalled that the requested data is not indexed yet.
    #[must_use]
    pub const fn is_not_yet_indexed(&self) -> bool {
        matches!(
            self,
            Self::NetworkError {
                status: Some(400),
                ..
            }
        )
    }

    /// The step a user has to go back to in order to resolve a precondition error.
    #[must_use]
    pub const fn required_step(&self) -> Option<Step> {
        match self {
            Self::WalletNotConnected | Self::UnsupportedChain { .. } => {
                Some(Step::WalletConnection)
            }
            Self::SnapNotInstalled => Some(Step::SnapConnection),
            Self::IdentityMissing => Some(Step::IdentityCreation),
            Self::CredentialMissing => Some(Step::KycProviders),
            Self::ProofMissing | Self::ProofIncomplete => Some(Step::ProofGenerating),
            Self::WrongStep { current, .. } => Some(*current),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for HumanKitError {
    fn from(error: serde_json::Error) -> Self {
        Self::SerializationError {
            error: error.to_string(),
        }
    }
}
