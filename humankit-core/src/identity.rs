use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretBox};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::{error::HumanKitError, field::FieldValue};

/// Private key material of a decentralized identity.
///
/// The 32 bytes are zeroized on drop. Not `Clone`.
pub struct IdentityKey(SecretBox<[u8; 32]>);

impl IdentityKey {
    /// Generates fresh key material from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = Box::new([0_u8; 32]);
        OsRng.fill_bytes(bytes.as_mut());
        Self(SecretBox::new(bytes))
    }

    /// Parses the contents of an exported key file: 64 hex characters, optionally `0x`-prefixed,
    /// surrounding whitespace ignored.
    ///
    /// # Errors
    /// Returns [`HumanKitError::InvalidInput`] when the contents are not a 32-byte hex key.
    pub fn from_key_file(contents: &str) -> Result<Self, HumanKitError> {
        let trimmed = contents.trim();
        let hex_key = trimmed.strip_prefix("0x").unwrap_or(trimmed);

        let mut bytes = Box::new([0_u8; 32]);
        hex::decode_to_slice(hex_key, bytes.as_mut()).map_err(|e| {
            HumanKitError::InvalidInput {
                attribute: "key_file".to_string(),
                reason: format!("expected 32 bytes of hex: {e}"),
            }
        })?;
        Ok(Self(SecretBox::new(bytes)))
    }

    /// Key file contents: the raw private key as lowercase hex.
    #[must_use]
    pub fn to_key_file(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.0.expose_secret()))
    }

    /// Compares two keys in constant time.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.0
            .expose_secret()
            .ct_eq(other.0.expose_secret())
            .into()
    }
}

impl std::fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IdentityKey([REDACTED])")
    }
}

/// A decentralized identity: the identifier derived by the identity runtime plus its key.
#[derive(Debug)]
pub struct Identity {
    id_string: String,
    id_bigint: FieldValue,
    key: IdentityKey,
}

impl Identity {
    /// Assembles an identity from runtime-derived ids and the key they were derived from.
    ///
    /// # Errors
    /// Returns an error when the numeric id is not a valid 256-bit decimal.
    pub fn new(
        id_string: String,
        id_bigint_string: &str,
        key: IdentityKey,
    ) -> Result<Self, HumanKitError> {
        if id_string.is_empty() {
            return Err(HumanKitError::InvalidInput {
                attribute: "identity_id".to_string(),
                reason: "empty identifier".to_string(),
            });
        }
        Ok(Self {
            id_string,
            id_bigint: FieldValue::parse(id_bigint_string)?,
            key,
        })
    }

    /// Stable identifier (`did:iden3:...` tail or base58 id).
    #[must_use]
    pub fn id_string(&self) -> &str {
        &self.id_string
    }

    /// Numeric encoding of the id, as used on-chain.
    #[must_use]
    pub const fn id_bigint(&self) -> FieldValue {
        self.id_bigint
    }

    /// The key material.
    #[must_use]
    pub const fn key(&self) -> &IdentityKey {
        &self.key
    }
}

/// Owner of the session's identity. Holds at most one; installing another replaces it.
#[derive(Debug, Default)]
pub struct IdentityStore {
    identity: Option<Identity>,
}

impl IdentityStore {
    /// An empty store.
    #[must_use]
    pub const fn new() -> Self {
        Self { identity: None }
    }

    /// The held identity.
    #[must_use]
    pub const fn get(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// The held identity, or [`HumanKitError::IdentityMissing`].
    ///
    /// # Errors
    /// Fails when no identity has been created yet.
    pub fn require(&self) -> Result<&Identity, HumanKitError> {
        self.identity.as_ref().ok_or(HumanKitError::IdentityMissing)
    }

    /// Installs `identity`, dropping (and zeroizing) any previous one.
    pub fn install(&mut self, identity: Identity) -> &Identity {
        if let Some(previous) = &self.identity {
            if previous.id_string != identity.id_string {
                log::info!(
                    "replacing identity {} with {}",
                    previous.id_string,
                    identity.id_string
                );
            }
        }
        self.identity.insert(identity)
    }

    /// Drops the held identity.
    pub fn clear(&mut self) {
        self.identity = None;
    }

    /// Contents of the downloadable key file for the held identity.
    ///
    /// # Errors
    /// Fails when no identity has been created yet.
    pub fn export_key_file(&self) -> Result<Zeroizing<String>, HumanKitError> {
        Ok(self.require()?.key.to_key_file())
    }
}
