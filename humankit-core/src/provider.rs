//! The request/response seam to a wallet provider.
//!
//! Every wallet and identity-runtime interaction is a single EIP-1193 `request` call. A browser
//! host implements [`Eip1193Provider`] over `window.ethereum`; [`HttpRpcProvider`] implements
//! the read-only subset over plain JSON-RPC.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{error::HumanKitError, http_request::Request, PipelineConfig};

/// EIP-1193 code returned by `wallet_switchEthereumChain` when the wallet does not know the chain.
pub const UNRECOGNIZED_CHAIN_CODE: i64 = 4902;

/// EIP-1193 code returned when the user rejects a request.
pub const USER_REJECTED_CODE: i64 = 4001;

/// An error returned by the provider for a single request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderRpcError {
    /// EIP-1193 / JSON-RPC error code.
    pub code: i64,
    /// Provider message.
    pub message: String,
}

impl ProviderRpcError {
    /// Whether the wallet reported an unknown chain.
    #[must_use]
    pub const fn is_unrecognized_chain(&self) -> bool {
        self.code == UNRECOGNIZED_CHAIN_CODE
    }
}

impl From<ProviderRpcError> for HumanKitError {
    fn from(err: ProviderRpcError) -> Self {
        Self::ProviderRpc {
            code: err.code,
            message: err.message,
        }
    }
}

/// An EIP-1193 style provider.
#[async_trait]
pub trait Eip1193Provider: Send + Sync {
    /// Performs one RPC request.
    ///
    /// # Errors
    /// Returns the provider error when the request is rejected or fails.
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderRpcError>;
}

/// Read-only provider speaking JSON-RPC over HTTP to a chain node.
///
/// Transport failures surface as [`ProviderRpcError`] with code `-32603` (internal error) so the
/// caller sees one error type regardless of the provider implementation.
pub struct HttpRpcProvider {
    url: String,
    request: Request,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ProviderRpcError>,
}

impl HttpRpcProvider {
    /// Creates a provider for the given node URL.
    #[must_use]
    pub fn new(url: impl Into<String>, config: &PipelineConfig) -> Self {
        Self {
            url: url.into(),
            request: Request::new(config.http_timeout(), config.rpc_max_retries),
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl Eip1193Provider for HttpRpcProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderRpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        log::trace!("rpc {method} -> {}", self.url);
        let response: JsonRpcResponse = self
            .request
            .json(self.request.post(&self.url).json(&body))
            .await
            .map_err(|err| ProviderRpcError {
                code: -32603,
                message: err.to_string(),
            })?;

        if let Some(error) = response.error {
            return Err(error);
        }
        Ok(response.result.unwrap_or(Value::Null))
    }
}
