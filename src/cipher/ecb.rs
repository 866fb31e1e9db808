use openssl::symm::{Cipher, Crypter, Mode};

use crate::error::{CryptoError, CryptoResult};

const BLOCK: usize = 16;

fn pick_cipher(key: &[u8]) -> CryptoResult<Cipher> {
    match key.len() {
        16 => Ok(Cipher::aes_128_ecb()),
        32 => Ok(Cipher::aes_256_ecb()),
        other => Err(CryptoError::BadKeyLen { expected: &[16, 32], got: other }),
    }
}

/// `ecb_encrypt(in, key, pad)`. `pad=false` requires block-aligned input.
pub fn ecb_encrypt(input: &[u8], key: &[u8], pad: bool) -> CryptoResult<Vec<u8>> {
    let cipher = pick_cipher(key)?;
    if !pad && input.len() % BLOCK != 0 {
        return Err(CryptoError::Corrupt(format!(
            "unpadded ECB input length {} is not block-aligned",
            input.len()
        )));
    }
    let mut crypter = Crypter::new(cipher, Mode::Encrypt, key, None).map_err(CryptoError::Ssl)?;
    crypter.pad(pad);

    let cap = (input.len() / BLOCK + 1) * BLOCK;
    let mut out = vec![0u8; cap];
    let mut count = crypter.update(input, &mut out).map_err(CryptoError::Ssl)?;
    count += crypter.finalize(&mut out[count..]).map_err(CryptoError::Ssl)?;
    out.truncate(count);
    Ok(out)
}

/// `ecb_decrypt(in, key, pad)`.
pub fn ecb_decrypt(input: &[u8], key: &[u8], pad: bool) -> CryptoResult<Vec<u8>> {
    let cipher = pick_cipher(key)?;
    if input.len() % BLOCK != 0 {
        return Err(CryptoError::Corrupt(format!(
            "ECB ciphertext length {} is not block-aligned",
            input.len()
        )));
    }
    let mut crypter = Crypter::new(cipher, Mode::Decrypt, key, None).map_err(CryptoError::Ssl)?;
    crypter.pad(pad);

    let mut out = vec![0u8; input.len() + BLOCK];
    let mut count = crypter.update(input, &mut out).map_err(CryptoError::Ssl)?;
    count += crypter.finalize(&mut out[count..]).map_err(CryptoError::Ssl)?;
    out.truncate(count);
    Ok(out)
}
