use openssl::bn::BigNum;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;

use super::{Padding, RSA_KEY_SIZE};
use crate::error::{CryptoError, CryptoResult};

/// A generated or loaded keypair together with its signature-padding
/// discriminator. Key bytes are identical for `Rsa` and `RsaPss`; only the
/// discriminator differs.
pub struct Keypair {
    pub pkey: PKey<Private>,
    pub padding: Padding,
}

/// Generates a fresh 4096-bit RSA key with public exponent F4 (65537).
pub fn make_keypair(padding: Padding) -> CryptoResult<Keypair> {
    let exponent = BigNum::from_u32(0x10001).map_err(|e| CryptoError::KeyGen(e.to_string()))?;
    let rsa = Rsa::generate_with_e(RSA_KEY_SIZE, &exponent)
        .map_err(|e| CryptoError::KeyGen(e.to_string()))?;
    let pkey = PKey::from_rsa(rsa).map_err(|e| CryptoError::KeyGen(e.to_string()))?;
    Ok(Keypair { pkey, padding })
}
