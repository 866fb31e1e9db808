//! Crypto Engine (C1): keypair/certificate creation, CSR issuance,
//! self-signing, chain verification, detached-signature verification and
//! hashing. Grounded on `original_source/common/ssl_util.c`.

pub mod cert;
pub mod csr;
pub mod engine;
pub mod hash;
pub mod keys;
pub mod pkcs12;
pub mod sign;

pub use engine::Engine;

/// Signature-padding discriminator for a keypair. Affects only the
/// algorithm identifier stored with the key, never the key bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    Rsa,
    RsaPss,
}

pub const RSA_KEY_SIZE: u32 = 4096;

pub const COUNTRY_C_CSR: &str = "DE";
pub const ORGANIZATION_O_CSR: &str = "Fraunhofer";
pub const ORG_UNIT_OU1_CSR: &str = "AISEC";
pub const KEY_USAGE_CSR: &str = "critical,digitalSignature,keyEncipherment,nonRepudiation";
pub const EXT_KEY_USAGE_CSR: &str = "clientAuth";
pub const REQ_VERSION_CSR: i32 = 0;

pub const TEST_C: &str = "DE";
pub const TEST_ST: &str = "Bayern";
pub const TEST_L: &str = "Muenchen";
pub const TEST_O: &str = "Fraunhofer";
pub const TEST_OU1: &str = "AISEC";
pub const TEST_OU2: &str = "trustme";
pub const TEST_BASIC_CONSTRAINTS: &str = "critical,CA:FALSE";
pub const TEST_KEY_USAGE_CERT: &str = "critical,keyCertSign,cRLSign";
pub const TEST_KEY_IDENTIFIER: &str = "hash";
pub const TEST_NOT_AFTER_SECS: u64 = 60 * 60 * 24 * 365;
pub const TEST_CERT_VERSION: i32 = 2;
pub const TEST_FRIENDLY_NAME: &str = "trust-me test user";

pub const SIGN_HASH_BUFFER_SIZE: usize = 4096;
