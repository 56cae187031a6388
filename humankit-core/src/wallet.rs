use std::{str::FromStr, sync::Arc, time::Duration};

use alloy_primitives::{hex, Address, Bytes, B256};
use backon::{ConstantBuilder, Retryable};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    chain::ChainDeployment,
    error::HumanKitError,
    provider::Eip1193Provider,
    PipelineConfig,
};

/// Events a wallet emits outside of any request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// `accountsChanged`; an empty list means the site lost access.
    AccountsChanged(Vec<String>),
    /// `chainChanged` with the new `0x`-prefixed chain id.
    ChainChanged(String),
    /// `disconnect`.
    Disconnect,
}

/// Connection state to a single wallet: address, chain id and the connected flag.
pub struct WalletSession {
    provider: Arc<dyn Eip1193Provider>,
    address: Option<Address>,
    chain_id: Option<u64>,
    receipt_poll_interval: Duration,
    receipt_max_attempts: u32,
}

#[derive(Deserialize)]
struct TransactionReceipt {
    status: Option<String>,
}

impl WalletSession {
    /// Creates a disconnected session over the given provider.
    #[must_use]
    pub fn new(provider: Arc<dyn Eip1193Provider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            address: None,
            chain_id: None,
            receipt_poll_interval: config.receipt_poll_interval(),
            receipt_max_attempts: config.receipt_max_attempts,
        }
    }

    /// The provider this session talks through.
    #[must_use]
    pub fn provider(&self) -> Arc<dyn Eip1193Provider> {
        Arc::clone(&self.provider)
    }

    /// Whether an account is connected.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.address.is_some()
    }

    /// The connected account.
    #[must_use]
    pub const fn address(&self) -> Option<Address> {
        self.address
    }

    /// The chain the wallet is currently on, if known.
    #[must_use]
    pub const fn chain_id(&self) -> Option<u64> {
        self.chain_id
    }

    /// The connected account, or [`HumanKitError::WalletNotConnected`].
    ///
    /// # Errors
    /// Fails when no account is connected.
    pub fn require_address(&self) -> Result<Address, HumanKitError> {
        self.address.ok_or(HumanKitError::WalletNotConnected)
    }

    /// Asks the wallet for account access and reads the current chain.
    ///
    /// # Errors
    /// Fails when the user rejects the request or the wallet returns no account.
    pub async fn connect(&mut self) -> Result<Address, HumanKitError> {
        let accounts = self.provider.request("eth_requestAccounts", json!([])).await?;
        self.install_accounts(&accounts)?;
        self.refresh_chain_id().await?;
        let address = self.require_address()?;
        log::info!("wallet connected: {address} on chain {:?}", self.chain_id);
        Ok(address)
    }

    /// Picks up an existing authorization without prompting (`eth_accounts`). Returns whether
    /// an account is connected afterwards.
    ///
    /// # Errors
    /// Fails when the provider request fails.
    pub async fn restore(&mut self) -> Result<bool, HumanKitError> {
        let accounts = self.provider.request("eth_accounts", json!([])).await?;
        if accounts.as_array().is_some_and(|a| !a.is_empty()) {
            self.install_accounts(&accounts)?;
            self.refresh_chain_id().await?;
        }
        Ok(self.is_connected())
    }

    /// Forgets the connected account. Wallets have no RPC to revoke access; this is local.
    pub fn disconnect(&mut self) {
        self.address = None;
        self.chain_id = None;
    }

    /// Applies a provider event to the local state.
    pub fn apply_event(&mut self, event: WalletEvent) {
        match event {
            WalletEvent::AccountsChanged(accounts) => {
                self.address = accounts
                    .first()
                    .and_then(|account| Address::from_str(strip_chain_prefix(account)).ok());
                if self.address.is_none() {
                    self.chain_id = None;
                }
            }
            WalletEvent::ChainChanged(chain_id) => {
                self.chain_id = parse_chain_id(&Value::String(chain_id)).ok();
            }
            WalletEvent::Disconnect => self.disconnect(),
        }
    }

    /// Makes the wallet's active chain match `deployment`. A wallet that does not know the
    /// chain is asked to register it first; any other switch error propagates.
    ///
    /// # Errors
    /// Fails when the wallet rejects the switch or the registration.
    pub async fn switch_chain(
        &mut self,
        deployment: &ChainDeployment,
    ) -> Result<(), HumanKitError> {
        let target = deployment.chain.chain_id();
        if self.chain_id == Some(target) {
            return Ok(());
        }

        let switch_params = json!([{ "chainId": deployment.chain.hex_chain_id() }]);
        match self
            .provider
            .request("wallet_switchEthereumChain", switch_params.clone())
            .await
        {
            Ok(_) => {}
            Err(err) if err.is_unrecognized_chain() => {
                log::info!("wallet does not know {}, adding it", deployment.chain);
                self.provider
                    .request("wallet_addEthereumChain", deployment.add_chain_params())
                    .await?;
                self.provider
                    .request("wallet_switchEthereumChain", switch_params)
                    .await?;
            }
            Err(err) => return Err(err.into()),
        }

        self.chain_id = Some(target);
        Ok(())
    }

    /// Signs a UTF-8 message with `personal_sign`.
    ///
    /// # Errors
    /// Fails when no account is connected or the user rejects the signature.
    pub async fn sign_message(&self, message: &str) -> Result<String, HumanKitError> {
        let address = self.require_address()?;
        let signature = self
            .provider
            .request(
                "personal_sign",
                json!([hex::encode_prefixed(message.as_bytes()), address]),
            )
            .await?;
        signature
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| HumanKitError::SerializationError {
                error: format!("personal_sign returned {signature}"),
            })
    }

    /// Sends a transaction from the connected account and returns its hash.
    ///
    /// # Errors
    /// Fails when no account is connected or the wallet rejects the transaction.
    pub async fn send_transaction(
        &self,
        to: Address,
        data: Bytes,
    ) -> Result<B256, HumanKitError> {
        let from = self.require_address()?;
        let hash = self
            .provider
            .request(
                "eth_sendTransaction",
                json!([{ "from": from, "to": to, "data": data }]),
            )
            .await?;
        let hash: B256 = serde_json::from_value(hash)?;
        log::info!("transaction sent: {hash}");
        Ok(hash)
    }

    /// Executes a read-only call against the latest block.
    ///
    /// # Errors
    /// Fails when the call reverts or the provider fails.
    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, HumanKitError> {
        eth_call(self.provider.as_ref(), to, data).await
    }

    /// Polls for the receipt of `tx_hash` until it is mined.
    ///
    /// # Errors
    /// [`HumanKitError::TransactionReverted`] when the transaction failed,
    /// [`HumanKitError::TransactionPending`] when no receipt appeared within the budget.
    pub async fn wait_for_receipt(&self, tx_hash: B256) -> Result<(), HumanKitError> {
        let backoff = ConstantBuilder::default()
            .with_delay(self.receipt_poll_interval)
            .with_max_times(self.receipt_max_attempts.saturating_sub(1) as usize);

        (|| async { self.fetch_receipt(tx_hash).await })
            .retry(backoff)
            .when(|err: &HumanKitError| matches!(err, HumanKitError::TransactionPending { .. }))
            .await
    }

    async fn fetch_receipt(&self, tx_hash: B256) -> Result<(), HumanKitError> {
        let receipt = self
            .provider
            .request("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if receipt.is_null() {
            return Err(HumanKitError::TransactionPending {
                tx_hash: tx_hash.to_string(),
            });
        }

        let receipt: TransactionReceipt = serde_json::from_value(receipt)?;
        match receipt.status.as_deref() {
            Some("0x1") | None => Ok(()),
            Some(_) => Err(HumanKitError::TransactionReverted {
                tx_hash: tx_hash.to_string(),
            }),
        }
    }

    fn install_accounts(&mut self, accounts: &Value) -> Result<(), HumanKitError> {
        let first = accounts
            .as_array()
            .and_then(|accounts| accounts.first())
            .and_then(Value::as_str)
            .ok_or(HumanKitError::WalletNotConnected)?;
        let address = Address::from_str(strip_chain_prefix(first)).map_err(|e| {
            HumanKitError::InvalidInput {
                attribute: "account".to_string(),
                reason: e.to_string(),
            }
        })?;
        self.address = Some(address);
        Ok(())
    }

    async fn refresh_chain_id(&mut self) -> Result<(), HumanKitError> {
        let chain_id = self.provider.request("eth_chainId", json!([])).await?;
        self.chain_id = Some(parse_chain_id(&chain_id)?);
        Ok(())
    }
}

/// `eth_call` through any provider.
pub(crate) async fn eth_call(
    provider: &dyn Eip1193Provider,
    to: Address,
    data: Bytes,
) -> Result<Bytes, HumanKitError> {
    let result = provider
        .request("eth_call", json!([{ "to": to, "data": data }, "latest"]))
        .await?;
    Ok(serde_json::from_value(result)?)
}

fn parse_chain_id(value: &Value) -> Result<u64, HumanKitError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.strip_prefix("0x").map_or_else(
            || s.parse().ok(),
            |hex| u64::from_str_radix(hex, 16).ok(),
        ),
        _ => None,
    };
    parsed.ok_or_else(|| HumanKitError::SerializationError {
        error: format!("invalid chain id: {value}"),
    })
}

/// Strips a CAIP-10 namespace (`eip155:<chain>:`) from an account identifier.
#[must_use]
pub fn strip_chain_prefix(account: &str) -> &str {
    account.rsplit(':').next().unwrap_or(account)
}

/// The proof challenge for an account: its address as lowercase hex without the `0x` prefix.
#[must_use]
pub fn challenge_for(address: &Address) -> String {
    hex::encode(address.as_slice())
}
