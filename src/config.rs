//! Configuration and provisioning-spec types, loaded from JSON files on
//! disk (`*.keyspec.json`/`*.csrspec.json`).

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// File extension for a batch key-generation spec.
pub const KEYSPEC_EXT: &str = "keyspec.json";
/// File extension for a batch CSR spec.
pub const CSRSPEC_EXT: &str = "csrspec.json";

/// Engine configuration passed to `crypto::Engine::init`.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub use_tpm: bool,
    pub srk_pin: Option<Zeroizing<Vec<u8>>>,
}

/// Hotplug router configuration.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct HotplugConfig {
    /// When true, the daemon does not own physical hardware and the
    /// initial interface rename is skipped.
    pub hosted_mode: bool,
}

/// Padding scheme selector for a generated or loaded keypair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPadding {
    Rsa,
    RsaPss,
}

/// Spec for a single batch key-generation request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeySpec {
    pub label: String,
    pub common_name: String,
    pub padding: KeyPadding,
    pub uid: String,
}

impl KeySpec {
    pub fn from_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

/// Spec for a single batch CSR request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CsrSpec {
    pub label: String,
    pub common_name: String,
    pub uid: String,
    pub padding: KeyPadding,
    pub use_tpm_key: bool,
}

impl CsrSpec {
    pub fn from_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
