//! Common test utilities shared across integration tests: an in-memory wallet hosting the
//! identity runtime and a chain, and an in-memory state oracle.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use alloy_core::sol_types::SolCall;
use alloy_primitives::{hex, Address, Bytes, B256, U256};
use async_trait::async_trait;
use humankit_core::{
    contracts::{IdentityVerifierByAddress, IdentityVerifierById, LightweightState},
    oracle::{
        CoreStateDetails, GistData, MerkleProof, OperationProof, TargetStateDetails,
        TransitionParams,
    },
    ChainDeployment, Eip1193Provider, Environment, FieldValue, HumanKitError, IdentityKey,
    PipelineConfig, ProviderRpcError, StateOracle, SupportedChain, DEFAULT_SNAP_ID,
};
use serde_json::{json, Value};

pub const ACCOUNT: &str = "0x00000000000000000000000000000000000000aa";
pub const OTHER_ACCOUNT: &str = "0x00000000000000000000000000000000000000bb";
pub const SUBJECT_DID: &str = "did:iden3:tQ1xHmsSMGzXvbzPX3T5mnBUEPJH9yCN8Rc3ZmDBR";
pub const ISSUER_DID: &str = "did:iden3:readonly:tJ93RwaVfE1PEMxd5rpZZuPtLCwbEaDCrNBhAy8HM";

pub fn verifier() -> Address {
    Address::repeat_byte(0x0f)
}

pub fn state_contract() -> Address {
    Address::repeat_byte(0x05)
}

pub fn latest_root() -> B256 {
    B256::repeat_byte(0x11)
}

pub fn config(api_url: &str) -> PipelineConfig {
    let mut config = PipelineConfig::from_environment(&Environment::Staging).with_deployment(
        ChainDeployment {
            chain: SupportedChain::PolygonAmoy,
            verifier: verifier(),
            state_contract: state_contract(),
            rpc_url: None,
        },
    );
    config.api_url = api_url.to_string();
    config.claim_offer_max_attempts = 3;
    config.claim_offer_poll_delay_ms = 10;
    config.states_poll_interval_ms = 10;
    config.receipt_poll_interval_ms = 5;
    config
}

/// Identity the runtime derives from a private key: the id string and its field element.
pub fn derived_identity(private_key_hex: &str) -> (String, U256) {
    let tail = &private_key_hex.trim_start_matches("0x")[..16];
    let id = u64::from_str_radix(tail, 16).unwrap();
    (format!("tQ{tail}"), U256::from(id))
}

pub fn identity_of(key: &IdentityKey) -> (String, U256) {
    derived_identity(key.to_key_file().as_str())
}

/// Scriptable wallet state.
#[derive(Debug)]
pub struct WalletState {
    pub authorized: bool,
    pub chain_id: u64,
    pub known_chains: Vec<u64>,
    pub snap_installed: bool,
    pub fail_identity: bool,
    /// Every identity reads as proved.
    pub identity_proved: bool,
    pub proved_identities: Vec<U256>,
    pub address_proved: bool,
    pub states_root: B256,
    /// Number of upcoming transactions the user rejects.
    pub reject_transactions: u32,
    pub sent: Vec<(Address, Bytes)>,
}

impl Default for WalletState {
    fn default() -> Self {
        Self {
            authorized: false,
            chain_id: 1,
            known_chains: vec![1],
            snap_installed: false,
            fail_identity: false,
            identity_proved: false,
            proved_identities: vec![],
            address_proved: false,
            states_root: B256::repeat_byte(0x01),
            reject_transactions: 0,
            sent: vec![],
        }
    }
}

#[derive(Default)]
pub struct FakeWallet {
    pub state: Mutex<WalletState>,
}

impl FakeWallet {
    pub fn new(state: WalletState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    pub fn sent_to(&self) -> Vec<Address> {
        self.state.lock().unwrap().sent.iter().map(|(to, _)| *to).collect()
    }
}

fn word(value: U256) -> Value {
    Value::String(hex::encode_prefixed(value.to_be_bytes::<32>()))
}

fn rpc_error(code: i64, message: &str) -> ProviderRpcError {
    ProviderRpcError {
        code,
        message: message.to_string(),
    }
}

pub fn credential_json() -> Value {
    json!({
        "id": "urn:uuid:3a1b1c2d-0000-4000-8000-000000000001",
        "@context": ["https://www.w3.org/2018/credentials/v1"],
        "type": ["VerifiableCredential", "IdentityProviders"],
        "issuer": ISSUER_DID,
        "credentialSubject": { "id": SUBJECT_DID, "isNatural": 1 },
    })
}

pub fn offer_json() -> Value {
    json!({
        "id": "offer-1",
        "type": "https://iden3-communication.io/credentials/1.0/offer",
        "body": { "url": "https://issuer.example/v1/agent", "credentials": [{ "id": "cred-1" }] },
        "from": ISSUER_DID,
        "to": SUBJECT_DID,
    })
}

impl FakeWallet {
    fn invoke_snap(&self, state: &WalletState, params: &Value) -> Result<Value, ProviderRpcError> {
        if !state.snap_installed {
            return Err(rpc_error(-32603, "snap not installed"));
        }
        match params["request"]["method"].as_str() {
            Some("create_identity") if state.fail_identity => {
                Err(rpc_error(-32603, "failed to derive identity"))
            }
            Some("create_identity") => {
                let key = params["request"]["params"]["privateKeyHex"]
                    .as_str()
                    .ok_or_else(|| rpc_error(-32602, "privateKeyHex is required"))?;
                let (id, id_bigint) = derived_identity(key);
                Ok(json!({
                    "identityIdString": id,
                    "identityIdBigIntString": id_bigint.to_string(),
                }))
            }
            Some("save_credentials") => Ok(json!([credential_json()])),
            Some("create_proof") => Ok(json!({
                "proof": {
                    "pi_a": ["1", "2", "1"],
                    "pi_b": [["3", "4"], ["5", "6"], ["1", "0"]],
                    "pi_c": ["7", "8", "1"],
                    "protocol": "groth16",
                },
                "pub_signals": ["9", "10", "11"],
            })),
            other => Err(rpc_error(-32601, &format!("unknown snap method {other:?}"))),
        }
    }

    fn eth_call(&self, state: &WalletState, params: &Value) -> Result<Value, ProviderRpcError> {
        let to: Address = serde_json::from_value(params[0]["to"].clone()).unwrap();
        let data: Bytes = serde_json::from_value(params[0]["data"].clone()).unwrap();
        let selector: [u8; 4] = data[..4].try_into().unwrap();

        if to == verifier() && selector == IdentityVerifierById::isIdentityProvedCall::SELECTOR {
            let call = IdentityVerifierById::isIdentityProvedCall::abi_decode(&data).unwrap();
            let proved =
                state.identity_proved || state.proved_identities.contains(&call.identityId);
            Ok(word(U256::from(u8::from(proved))))
        } else if to == verifier()
            && selector == IdentityVerifierByAddress::isIdentityProvedCall::SELECTOR
        {
            Ok(word(U256::from(u8::from(state.address_proved))))
        } else if to == state_contract()
            && selector == LightweightState::identitiesStatesRootCall::SELECTOR
        {
            Ok(json!(state.states_root))
        } else {
            Err(rpc_error(-32000, "execution reverted"))
        }
    }
}

#[async_trait]
impl Eip1193Provider for FakeWallet {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderRpcError> {
        let mut state = self.state.lock().unwrap();
        match method {
            "eth_requestAccounts" => {
                state.authorized = true;
                Ok(json!([ACCOUNT]))
            }
            "eth_accounts" => Ok(if state.authorized {
                json!([ACCOUNT])
            } else {
                json!([])
            }),
            "eth_chainId" => Ok(json!(format!("{:#x}", state.chain_id))),
            "wallet_switchEthereumChain" => {
                let hex_id = params[0]["chainId"].as_str().unwrap();
                let chain_id = u64::from_str_radix(hex_id.trim_start_matches("0x"), 16).unwrap();
                if state.known_chains.contains(&chain_id) {
                    state.chain_id = chain_id;
                    Ok(Value::Null)
                } else {
                    Err(rpc_error(4902, "Unrecognized chain ID"))
                }
            }
            "wallet_addEthereumChain" => {
                let hex_id = params[0]["chainId"].as_str().unwrap();
                let chain_id = u64::from_str_radix(hex_id.trim_start_matches("0x"), 16).unwrap();
                state.known_chains.push(chain_id);
                Ok(Value::Null)
            }
            "wallet_getSnaps" => Ok(if state.snap_installed {
                json!({ DEFAULT_SNAP_ID: { "version": "2.1.0", "enabled": true, "blocked": false } })
            } else {
                json!({})
            }),
            "wallet_requestSnaps" => {
                state.snap_installed = true;
                Ok(json!({ DEFAULT_SNAP_ID: { "version": "2.1.0", "enabled": true } }))
            }
            "wallet_invokeSnap" => self.invoke_snap(&state, &params),
            "personal_sign" => Ok(json!("0x5151")),
            "eth_call" => self.eth_call(&state, &params),
            "eth_sendTransaction" if state.reject_transactions > 0 => {
                state.reject_transactions -= 1;
                Err(rpc_error(4001, "User rejected the request"))
            }
            "eth_sendTransaction" => {
                let to: Address = serde_json::from_value(params[0]["to"].clone()).unwrap();
                let data: Bytes = serde_json::from_value(params[0]["data"].clone()).unwrap();
                state.sent.push((to, data));
                let nonce = u8::try_from(state.sent.len()).unwrap();
                Ok(json!(B256::repeat_byte(nonce)))
            }
            "eth_getTransactionReceipt" => Ok(json!({ "status": "0x1" })),
            _ => Err(rpc_error(4200, "unsupported method")),
        }
    }
}

/// Oracle that answers "not indexed" a fixed number of times before serving state data.
pub struct FakeOracle {
    pub not_indexed_left: Mutex<u32>,
    pub core_calls: Mutex<u32>,
}

impl FakeOracle {
    pub fn new(not_indexed: u32) -> Arc<Self> {
        Arc::new(Self {
            not_indexed_left: Mutex::new(not_indexed),
            core_calls: Mutex::new(0),
        })
    }
}

fn field(value: &str) -> FieldValue {
    FieldValue::parse(value).unwrap()
}

#[async_trait]
impl StateOracle for FakeOracle {
    async fn core_state_details(&self, issuer_id: &str) -> Result<CoreStateDetails, HumanKitError> {
        *self.core_calls.lock().unwrap() += 1;
        let mut left = self.not_indexed_left.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            return Err(HumanKitError::NetworkError {
                url: format!("https://oracle.test/v1/states/{issuer_id}"),
                status: Some(400),
                error: "state not indexed".to_string(),
            });
        }
        Ok(CoreStateDetails {
            issuer_id: field("10"),
            state_hash: field("0x2b"),
            created_at_timestamp: field("1718000000"),
            created_at_block: field("512"),
            last_update_operation_index: field("77"),
        })
    }

    async fn merkle_proof(
        &self,
        _issuer_id: &str,
        _state_hash: &FieldValue,
    ) -> Result<MerkleProof, HumanKitError> {
        Ok(MerkleProof {
            proof: vec![B256::repeat_byte(0x22)],
            root: latest_root(),
        })
    }

    async fn operation_proof(
        &self,
        _operation_index: &FieldValue,
    ) -> Result<OperationProof, HumanKitError> {
        Ok(OperationProof {
            path: vec![B256::repeat_byte(0x33)],
            signature: Bytes::from_static(&[0xaa; 65]),
        })
    }

    async fn target_state_details(&self) -> Result<TargetStateDetails, HumanKitError> {
        Ok(TargetStateDetails {
            root: latest_root(),
            gist_root: field("5"),
            created_at_timestamp: field("1718000100"),
        })
    }

    async fn transition_params(&self, root: &B256) -> Result<TransitionParams, HumanKitError> {
        Ok(TransitionParams {
            new_identities_states_root: *root,
            gist_data: GistData {
                root: field("5"),
                created_at_timestamp: field("1718000100"),
            },
            proof: Bytes::from_static(&[0x01, 0x02]),
        })
    }
}
