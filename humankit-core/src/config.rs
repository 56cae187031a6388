use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    chain::{ChainDeployment, SupportedChain},
    error::HumanKitError,
    Environment,
};

/// Snap id of the identity runtime installed in the wallet.
pub const DEFAULT_SNAP_ID: &str = "npm:@rarimo/rarime";

/// Runtime configuration of the pipeline.
///
/// Retry counts and delays are plain values here. Only the shape of each retry is fixed:
/// claim-offer polling is bounded, not-yet-indexed polling is not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Base URL of the issuer and KYC services.
    pub api_url: String,
    /// Base URL of the state oracle.
    pub oracle_url: String,
    /// Snap id of the identity runtime.
    pub snap_id: String,
    /// Version requirement passed to `wallet_requestSnaps`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snap_version: Option<String>,
    /// How many times the issuer is asked for a claim offer before giving up.
    pub claim_offer_max_attempts: u32,
    /// Delay between two claim-offer polls.
    pub claim_offer_poll_delay_ms: u64,
    /// Delay between two state-details polls while the oracle has not indexed the state.
    pub states_poll_interval_ms: u64,
    /// Delay between two transaction-receipt polls.
    pub receipt_poll_interval_ms: u64,
    /// How many times a receipt is polled before the transaction is reported as pending.
    pub receipt_max_attempts: u32,
    /// Timeout of a single HTTP request.
    pub http_timeout_ms: u64,
    /// Transport retries for read-only chain RPC. Issuer and oracle calls never retry here.
    pub rpc_max_retries: u32,
    /// Chain selected when the user has not picked one.
    pub default_chain: SupportedChain,
    /// Chains the proof can be published on.
    #[serde(default)]
    pub chains: Vec<ChainDeployment>,
}

impl PipelineConfig {
    /// Default configuration for an environment. Chain deployments are not part of the
    /// defaults and must be added with [`PipelineConfig::with_deployment`] or loaded from JSON.
    #[must_use]
    pub fn from_environment(environment: &Environment) -> Self {
        let (api_url, default_chain) = match environment {
            Environment::Staging => ("https://api.stage.rarimo.com", SupportedChain::PolygonAmoy),
            Environment::Production => ("https://api.mainnet.rarimo.com", SupportedChain::Polygon),
        };

        Self {
            api_url: api_url.to_string(),
            oracle_url: format!("{api_url}/integrations/state-oracle"),
            snap_id: DEFAULT_SNAP_ID.to_string(),
            snap_version: None,
            claim_offer_max_attempts: 10,
            claim_offer_poll_delay_ms: 3_000,
            states_poll_interval_ms: 30_000,
            receipt_poll_interval_ms: 2_000,
            receipt_max_attempts: 90,
            http_timeout_ms: 15_000,
            rpc_max_retries: 3,
            default_chain,
            chains: vec![],
        }
    }

    /// Parses a configuration from JSON and validates it.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or the configuration is invalid.
    pub fn from_json(json: &str) -> Result<Self, HumanKitError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| HumanKitError::InvalidInput {
                attribute: "config".to_string(),
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Adds or replaces the deployment for a chain.
    #[must_use]
    pub fn with_deployment(mut self, deployment: ChainDeployment) -> Self {
        self.chains.retain(|d| d.chain != deployment.chain);
        self.chains.push(deployment);
        self
    }

    /// Checks the invariants the pipeline relies on.
    ///
    /// # Errors
    /// Returns [`HumanKitError::InvalidInput`] naming the offending attribute.
    pub fn validate(&self) -> Result<(), HumanKitError> {
        let invalid = |attribute: &str, reason: &str| HumanKitError::InvalidInput {
            attribute: attribute.to_string(),
            reason: reason.to_string(),
        };

        if self.claim_offer_max_attempts == 0 {
            return Err(invalid("claim_offer_max_attempts", "must be at least 1"));
        }
        if self.receipt_max_attempts == 0 {
            return Err(invalid("receipt_max_attempts", "must be at least 1"));
        }
        for (attribute, url) in [("api_url", &self.api_url), ("oracle_url", &self.oracle_url)] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(invalid(attribute, "must be an http(s) URL"));
            }
        }
        if !self.chains.is_empty() && self.deployment(self.default_chain).is_none() {
            return Err(invalid("default_chain", "has no deployment"));
        }
        Ok(())
    }

    /// Deployment for a chain, if it is configured.
    #[must_use]
    pub fn deployment(&self, chain: SupportedChain) -> Option<&ChainDeployment> {
        self.chains.iter().find(|d| d.chain == chain)
    }

    /// Deployment for an EIP-155 chain id, if it is configured.
    #[must_use]
    pub fn deployment_by_id(&self, chain_id: u64) -> Option<&ChainDeployment> {
        SupportedChain::from_chain_id(chain_id).and_then(|chain| self.deployment(chain))
    }

    /// Delay between two claim-offer polls.
    #[must_use]
    pub const fn claim_offer_poll_delay(&self) -> Duration {
        Duration::from_millis(self.claim_offer_poll_delay_ms)
    }

    /// Delay between two state-details polls.
    #[must_use]
    pub const fn states_poll_interval(&self) -> Duration {
        Duration::from_millis(self.states_poll_interval_ms)
    }

    /// Delay between two receipt polls.
    #[must_use]
    pub const fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    /// Timeout of a single HTTP request.
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}
