//! Seed-derived ed25519 identity for the bridge's presence on the agent network.
//!
//! The bridge is recognised by remote agents through its address, so the
//! address must be a pure function of the seed: restarting with the same seed
//! yields the same address and any allowlisting on the remote side keeps
//! working.
//!
//! Derivation:
//! 1. SHA-256 over a domain-separation tag followed by the seed bytes.
//! 2. The digest is used as the ed25519 secret key (via `ed25519-dalek`).
//! 3. The address is `agent1` + lowercase hex of the 32-byte verifying key.
//!
//! Because the address embeds the verifying key, an envelope signature can be
//! checked against the sender address alone.

use crate::error::{ConfigError, ConfigResult};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Prefix shared by every agent address on the network.
pub const ADDRESS_PREFIX: &str = "agent1";

/// Environment variable consulted when the config carries no seed.
pub const SEED_ENV_VAR: &str = "AGENTLINK_BRIDGE_SEED";

const DERIVATION_TAG: &[u8] = b"agentlink-identity-v1:";

/// Where the seed of a [`BridgeIdentity`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedSource {
    /// The `seed` key of the configuration.
    Config,
    /// The [`SEED_ENV_VAR`] environment variable.
    Environment,
    /// Randomly generated for this process only.
    Generated,
}

impl std::fmt::Display for SeedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config => write!(f, "config"),
            Self::Environment => write!(f, "environment"),
            Self::Generated => write!(f, "generated"),
        }
    }
}

/// The bridge's signing identity. Immutable once constructed.
#[derive(Clone)]
pub struct BridgeIdentity {
    seed: Zeroizing<String>,
    signing_key: SigningKey,
    address: String,
}

impl BridgeIdentity {
    /// Derive an identity from a seed. The same seed always yields the same
    /// address.
    pub fn from_seed(seed: &str) -> ConfigResult<Self> {
        if seed.trim().is_empty() {
            return Err(ConfigError::InvalidSeed("seed must not be empty".into()));
        }
        Ok(Self::derive(Zeroizing::new(seed.to_string())))
    }

    /// Create an identity from a fresh random seed.
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut *bytes);
        Self::derive(Zeroizing::new(hex::encode(&*bytes)))
    }

    fn derive(seed: Zeroizing<String>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(DERIVATION_TAG);
        hasher.update(seed.as_bytes());
        let secret: Zeroizing<[u8; 32]> = Zeroizing::new(hasher.finalize().into());

        let signing_key = SigningKey::from_bytes(&secret);
        let address = address_from_key(&signing_key.verifying_key());

        Self {
            seed,
            signing_key,
            address,
        }
    }

    /// The bridge's network address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The seed this identity was derived from.
    pub fn seed(&self) -> &str {
        &self.seed
    }

    /// The public half of the signing key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Sign `data`, returning the hex-encoded 64-byte signature.
    pub fn sign(&self, data: &[u8]) -> String {
        hex::encode(self.signing_key.sign(data).to_bytes())
    }
}

impl std::fmt::Debug for BridgeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeIdentity")
            .field("address", &self.address)
            .field("seed", &"<redacted>")
            .finish()
    }
}

/// Resolve the bridge identity from the configured seed, the environment, or
/// (when allowed) a generated seed.
///
/// `env_seed` is passed in rather than read here so callers and tests control
/// the environment lookup.
pub fn resolve_identity(
    configured: Option<&str>,
    env_seed: Option<&str>,
    require_seed: bool,
) -> ConfigResult<(BridgeIdentity, SeedSource)> {
    if let Some(seed) = configured.filter(|s| !s.trim().is_empty()) {
        return Ok((BridgeIdentity::from_seed(seed)?, SeedSource::Config));
    }
    if let Some(seed) = env_seed.filter(|s| !s.trim().is_empty()) {
        return Ok((BridgeIdentity::from_seed(seed)?, SeedSource::Environment));
    }
    if require_seed {
        return Err(ConfigError::MissingSeed);
    }
    tracing::warn!(
        "No bridge seed configured; generated an ephemeral identity. \
         The bridge address will change on restart (set {SEED_ENV_VAR} to pin it)"
    );
    Ok((BridgeIdentity::generate(), SeedSource::Generated))
}

/// Compute the network address for a verifying key.
pub fn address_from_key(key: &VerifyingKey) -> String {
    format!("{ADDRESS_PREFIX}{}", hex::encode(key.to_bytes()))
}

/// Recover the verifying key embedded in an address.
pub fn key_from_address(address: &str) -> Option<VerifyingKey> {
    let hex_part = address.strip_prefix(ADDRESS_PREFIX)?;
    let bytes: [u8; 32] = hex::decode(hex_part).ok()?.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

/// Whether `address` is a well-formed agent address.
pub fn is_valid_address(address: &str) -> bool {
    key_from_address(address).is_some()
}

/// Check a hex-encoded signature over `data` against the key embedded in
/// `address`.
pub fn verify_signature(address: &str, data: &[u8], signature_hex: &str) -> bool {
    let Some(key) = key_from_address(address) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    key.verify(data, &Signature::from_bytes(&sig_bytes)).is_ok()
}
