use openssl::symm::{Cipher, Crypter, Mode};

use crate::error::{CryptoError, CryptoResult};

const IV_LEN: usize = 16;

fn pick_cipher(key: &[u8]) -> CryptoResult<Cipher> {
    match key.len() {
        16 => Ok(Cipher::aes_128_ctr()),
        32 => Ok(Cipher::aes_256_ctr()),
        other => Err(CryptoError::BadKeyLen { expected: &[16, 32], got: other }),
    }
}

/// A single-threaded streaming AES-CTR context. Not `Sync`; sharing a
/// context across threads is undefined, matching the C original.
pub struct CtrContext {
    crypter: Crypter,
    block: usize,
}

fn new_context(key: &[u8], iv: &[u8], mode: Mode) -> CryptoResult<CtrContext> {
    let cipher = pick_cipher(key)?;
    if iv.len() != IV_LEN {
        return Err(CryptoError::BadIvLen { expected: IV_LEN, got: iv.len() });
    }
    let mut crypter = Crypter::new(cipher, mode, key, Some(iv)).map_err(CryptoError::Ssl)?;
    crypter.pad(false);
    Ok(CtrContext { crypter, block: cipher.block_size() })
}

pub fn ctr_init_encrypt(key: &[u8], iv: &[u8]) -> CryptoResult<CtrContext> {
    new_context(key, iv, Mode::Encrypt)
}

pub fn ctr_init_decrypt(key: &[u8], iv: &[u8]) -> CryptoResult<CtrContext> {
    new_context(key, iv, Mode::Decrypt)
}

impl CtrContext {
    /// May be called any number of times with arbitrary segmentation.
    pub fn update(&mut self, input: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut out = vec![0u8; input.len() + self.block];
        let count = self.crypter.update(input, &mut out).map_err(CryptoError::Ssl)?;
        out.truncate(count);
        Ok(out)
    }

    /// Flushes any buffered keystream bytes. AES-CTR never pads, so this
    /// is almost always empty, but callers must still invoke it.
    pub fn finalize(mut self) -> CryptoResult<Vec<u8>> {
        let mut out = vec![0u8; self.block];
        let count = self.crypter.finalize(&mut out).map_err(CryptoError::Ssl)?;
        out.truncate(count);
        Ok(out)
    }
}
