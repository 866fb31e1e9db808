//! Hybrid asymmetric wrap: a random CEK/IV encrypt the plaintext under
//! AES-256-CBC, and the CEK is itself encrypted under the recipient's RSA
//! public key. `openssl::envelope::{Seal, Open}` wrap
//! `EVP_Seal*`/`EVP_Open*` directly, matching `ssl_wrap_key`/
//! `ssl_unwrap_key`.

use openssl::envelope::{Open, Seal};
use openssl::pkey::{PKey, Private, Public};
use openssl::symm::Cipher;

use crate::error::{CryptoError, CryptoResult};

const HEADER_LEN: usize = 8;

/// `wrap_key(recipient_pk, plain) -> envelope`. Envelope layout per the
/// data model: `i32 ek_len, i32 ct_len, iv, ek, ct`, all host-endian.
pub fn wrap_key(recipient_pk: &PKey<Public>, plain: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = Cipher::aes_256_cbc();
    let (mut seal, eks, iv) =
        Seal::new(cipher, &[recipient_pk]).map_err(|e| CryptoError::MalformedBlob(e.to_string()))?;
    let ek = eks.into_iter().next().ok_or_else(|| {
        CryptoError::MalformedBlob("envelope seal produced no encrypted key".into())
    })?;

    let mut ct = vec![0u8; plain.len() + cipher.block_size()];
    let mut count = seal.update(plain, &mut ct).map_err(CryptoError::Ssl)?;
    count += seal.finalize(&mut ct[count..]).map_err(CryptoError::Ssl)?;
    ct.truncate(count);

    let mut envelope = Vec::with_capacity(HEADER_LEN + iv.len() + ek.len() + ct.len());
    envelope.extend_from_slice(&(ek.len() as i32).to_ne_bytes());
    envelope.extend_from_slice(&(ct.len() as i32).to_ne_bytes());
    envelope.extend_from_slice(&iv);
    envelope.extend_from_slice(&ek);
    envelope.extend_from_slice(&ct);
    Ok(envelope)
}

/// `unwrap_key(recipient_sk, envelope) -> plain`. Rejects malformed
/// envelopes with `Corrupt`.
pub fn unwrap_key(recipient_sk: &PKey<Private>, envelope: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = Cipher::aes_256_cbc();
    let iv_len = cipher.iv_len().unwrap_or(0);

    if envelope.len() < HEADER_LEN + iv_len {
        return Err(CryptoError::Corrupt("envelope shorter than fixed header".into()));
    }
    let ek_len = i32::from_ne_bytes(envelope[0..4].try_into().unwrap());
    let ct_len = i32::from_ne_bytes(envelope[4..8].try_into().unwrap());
    if ek_len < 0 || ct_len < 0 {
        return Err(CryptoError::Corrupt("negative field length in envelope header".into()));
    }
    let (ek_len, ct_len) = (ek_len as usize, ct_len as usize);

    let total = HEADER_LEN
        .checked_add(iv_len)
        .and_then(|n| n.checked_add(ek_len))
        .and_then(|n| n.checked_add(ct_len))
        .ok_or_else(|| CryptoError::Corrupt("envelope length overflow".into()))?;
    if envelope.len() != total {
        return Err(CryptoError::Corrupt(format!(
            "envelope length {} does not match header-declared total {}",
            envelope.len(),
            total
        )));
    }

    let iv = &envelope[HEADER_LEN..HEADER_LEN + iv_len];
    let ek = &envelope[HEADER_LEN + iv_len..HEADER_LEN + iv_len + ek_len];
    let ct = &envelope[HEADER_LEN + iv_len + ek_len..];

    let mut open =
        Open::new(cipher, ek, Some(iv), recipient_sk).map_err(|e| CryptoError::Corrupt(e.to_string()))?;
    let mut plain = vec![0u8; ct.len() + cipher.block_size()];
    let mut count = open
        .update(ct, &mut plain)
        .map_err(|e| CryptoError::Corrupt(e.to_string()))?;
    count += open
        .finalize(&mut plain[count..])
        .map_err(|e| CryptoError::Corrupt(e.to_string()))?;
    plain.truncate(count);
    Ok(plain)
}
