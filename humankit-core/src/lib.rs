#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
//! Identity and zero-knowledge proof orchestration for proof-of-humanity flows.
//!
//! The [`StepSequencer`] drives a user through wallet connection, identity creation, credential
//! acquisition, proof generation and on-chain publication. Every remote collaborator (wallet,
//! identity runtime, issuer, state oracle) sits behind a narrow interface so the flow can be
//! exercised without a browser.
//!
//! ```rust,ignore
//! let config = PipelineConfig::from_environment(&Environment::Staging);
//! let mut sequencer = StepSequencer::new(provider, config, Arc::new(LogReporter));
//! sequencer.bootstrap().await;
//! sequencer.connect_wallet().await?;
//! ```
use strum::{Display, EnumString};

/// Deployment environment of the remote services the pipeline talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    /// Staging services, test networks by default.
    Staging,
    /// Production services.
    Production,
}

mod error;
pub use error::*;

pub mod logger;

mod config;
pub use config::*;

mod chain;
pub use chain::*;

mod field;
pub use field::*;

pub mod provider;
pub use provider::{Eip1193Provider, HttpRpcProvider, ProviderRpcError};

mod wallet;
pub use wallet::*;

mod snap;
pub use snap::*;

mod identity;
pub use identity::*;

pub mod issuer;
pub use issuer::{IssuerClient, KycProvider};

mod credential;
pub use credential::*;

pub mod oracle;
pub use oracle::{OracleClient, StateOracle};

mod proof;
pub use proof::*;

pub mod contracts;

mod publication;
pub use publication::*;

mod session;
pub use session::*;

mod sequencer;
pub use sequencer::*;

// private modules
mod http_request;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!("humankit_core");
