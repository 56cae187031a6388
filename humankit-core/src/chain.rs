use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// A target chain on which an identity proof can be published.
///
/// Chain metadata is what a wallet needs to register the chain (`wallet_addEthereumChain`) when
/// it does not know it yet. Contract addresses live in [`ChainDeployment`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SupportedChain {
    /// Ethereum mainnet.
    Ethereum,
    /// Polygon `PoS` mainnet.
    Polygon,
    /// Ethereum Sepolia testnet.
    Sepolia,
    /// Polygon Amoy testnet.
    PolygonAmoy,
}

impl SupportedChain {
    /// EIP-155 chain id.
    #[must_use]
    pub const fn chain_id(self) -> u64 {
        match self {
            Self::Ethereum => 1,
            Self::Polygon => 137,
            Self::Sepolia => 11_155_111,
            Self::PolygonAmoy => 80_002,
        }
    }

    /// Looks a chain up by its EIP-155 id.
    #[must_use]
    pub fn from_chain_id(chain_id: u64) -> Option<Self> {
        Self::iter().find(|chain| chain.chain_id() == chain_id)
    }

    /// Chain id in the `0x`-prefixed form wallets expect.
    #[must_use]
    pub fn hex_chain_id(self) -> String {
        format!("{:#x}", self.chain_id())
    }

    /// Human readable name shown by wallets.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Ethereum => "Ethereum Mainnet",
            Self::Polygon => "Polygon Mainnet",
            Self::Sepolia => "Sepolia",
            Self::PolygonAmoy => "Polygon Amoy",
        }
    }

    const fn native_currency(self) -> (&'static str, &'static str) {
        match self {
            Self::Ethereum | Self::Sepolia => ("Ether", "ETH"),
            Self::Polygon | Self::PolygonAmoy => ("POL", "POL"),
        }
    }

    /// Public RPC endpoint used when a deployment does not override it.
    #[must_use]
    pub const fn default_rpc_url(self) -> &'static str {
        match self {
            Self::Ethereum => "https://ethereum-rpc.publicnode.com",
            Self::Polygon => "https://polygon-rpc.com",
            Self::Sepolia => "https://ethereum-sepolia-rpc.publicnode.com",
            Self::PolygonAmoy => "https://rpc-amoy.polygon.technology",
        }
    }

    /// Block explorer base URL.
    #[must_use]
    pub const fn explorer_url(self) -> &'static str {
        match self {
            Self::Ethereum => "https://etherscan.io",
            Self::Polygon => "https://polygonscan.com",
            Self::Sepolia => "https://sepolia.etherscan.io",
            Self::PolygonAmoy => "https://amoy.polygonscan.com",
        }
    }

    /// Whether this is a test network.
    #[must_use]
    pub const fn is_testnet(self) -> bool {
        matches!(self, Self::Sepolia | Self::PolygonAmoy)
    }
}

/// Addresses of the contracts the pipeline calls on a given chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainDeployment {
    /// The chain these contracts live on.
    pub chain: SupportedChain,
    /// Identity verifier: `proveIdentity` / `isIdentityProved`.
    pub verifier: Address,
    /// Lightweight state contract: `identitiesStatesRoot` / `signedTransitState`.
    pub state_contract: Address,
    /// Overrides [`SupportedChain::default_rpc_url`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
}

impl ChainDeployment {
    /// RPC URL for read-only access to this chain.
    #[must_use]
    pub fn rpc_url(&self) -> &str {
        self.rpc_url
            .as_deref()
            .unwrap_or_else(|| self.chain.default_rpc_url())
    }

    /// Parameters for `wallet_addEthereumChain`.
    #[must_use]
    pub fn add_chain_params(&self) -> Value {
        let (currency_name, currency_symbol) = self.chain.native_currency();
        json!([{
            "chainId": self.chain.hex_chain_id(),
            "chainName": self.chain.display_name(),
            "nativeCurrency": {
                "name": currency_name,
                "symbol": currency_symbol,
                "decimals": 18,
            },
            "rpcUrls": [self.rpc_url()],
            "blockExplorerUrls": [self.chain.explorer_url()],
        }])
    }
}
