//! Symmetric key wrap: AES-256 key wrap (RFC 3394) with the fixed default
//! IV. `openssl::symm::Crypter` offers no way to set the "wrap allow"
//! context flag OpenSSL requires for wrap-mode ciphers, so this module
//! drives `EVP_CIPHER_CTX` directly via `openssl-sys`, mirroring
//! `ssl_wrap_key_sym`/`ssl_unwrap_key_sym`.

use std::os::raw::c_int;
use std::ptr;

use openssl_sys::{
    EVP_CIPHER_CTX_free, EVP_CIPHER_CTX_new, EVP_CIPHER_CTX_set_flags, EVP_DecryptFinal_ex,
    EVP_DecryptInit_ex, EVP_DecryptUpdate, EVP_EncryptFinal_ex, EVP_EncryptInit_ex,
    EVP_EncryptUpdate, EVP_aes_256_wrap,
};

use crate::error::{CryptoError, CryptoResult};

const EVP_CIPHER_CTX_FLAG_WRAP_ALLOW: c_int = 0x1;
const AES_KEY_WRAP_DEFAULT_IV: [u8; 8] = [0xA6; 8];
const KEK_LEN: usize = 32;

fn check_kek_len(kek: &[u8]) -> CryptoResult<()> {
    if kek.len() != KEK_LEN {
        return Err(CryptoError::BadKeyLen { expected: &[KEK_LEN], got: kek.len() });
    }
    Ok(())
}

/// `wrap_sym(kek, plain)`. `kek` must be 32 bytes. Output is always
/// `plain.len() + 8` bytes.
pub fn wrap_sym(kek: &[u8], plain: &[u8]) -> CryptoResult<Vec<u8>> {
    check_kek_len(kek)?;
    unsafe {
        let ctx = EVP_CIPHER_CTX_new();
        if ctx.is_null() {
            return Err(CryptoError::KeyGen("EVP_CIPHER_CTX_new failed".into()));
        }
        let cipher = EVP_aes_256_wrap();
        let rc = EVP_EncryptInit_ex(
            ctx,
            cipher,
            ptr::null_mut(),
            kek.as_ptr(),
            AES_KEY_WRAP_DEFAULT_IV.as_ptr(),
        );
        if rc != 1 {
            EVP_CIPHER_CTX_free(ctx);
            return Err(CryptoError::Unsupported("aes-256 key wrap init failed".into()));
        }
        EVP_CIPHER_CTX_set_flags(ctx, EVP_CIPHER_CTX_FLAG_WRAP_ALLOW);

        let mut out = vec![0u8; plain.len() + KEK_LEN];
        let mut out_len: c_int = 0;
        let rc = EVP_EncryptUpdate(
            ctx,
            out.as_mut_ptr(),
            &mut out_len,
            plain.as_ptr(),
            plain.len() as c_int,
        );
        if rc != 1 {
            EVP_CIPHER_CTX_free(ctx);
            return Err(CryptoError::Unsupported("aes-256 key wrap update failed".into()));
        }
        let mut final_len: c_int = 0;
        let rc = EVP_EncryptFinal_ex(ctx, out.as_mut_ptr().add(out_len as usize), &mut final_len);
        EVP_CIPHER_CTX_free(ctx);
        if rc != 1 {
            return Err(CryptoError::Unsupported("aes-256 key wrap finalize failed".into()));
        }
        out.truncate((out_len + final_len) as usize);
        Ok(out)
    }
}

/// `unwrap_sym(kek, ct)`. Rejects a `ct` shorter than 16 bytes or not
/// 8-byte aligned before calling into OpenSSL.
pub fn unwrap_sym(kek: &[u8], ct: &[u8]) -> CryptoResult<Vec<u8>> {
    check_kek_len(kek)?;
    if ct.len() < 16 || ct.len() % 8 != 0 {
        return Err(CryptoError::Corrupt(format!(
            "wrapped ciphertext length {} is not a valid key-wrap size",
            ct.len()
        )));
    }
    unsafe {
        let ctx = EVP_CIPHER_CTX_new();
        if ctx.is_null() {
            return Err(CryptoError::KeyGen("EVP_CIPHER_CTX_new failed".into()));
        }
        let cipher = EVP_aes_256_wrap();
        let rc = EVP_DecryptInit_ex(
            ctx,
            cipher,
            ptr::null_mut(),
            kek.as_ptr(),
            AES_KEY_WRAP_DEFAULT_IV.as_ptr(),
        );
        if rc != 1 {
            EVP_CIPHER_CTX_free(ctx);
            return Err(CryptoError::Unsupported("aes-256 key unwrap init failed".into()));
        }
        EVP_CIPHER_CTX_set_flags(ctx, EVP_CIPHER_CTX_FLAG_WRAP_ALLOW);

        let mut out = vec![0u8; ct.len()];
        let mut out_len: c_int = 0;
        let rc = EVP_DecryptUpdate(
            ctx,
            out.as_mut_ptr(),
            &mut out_len,
            ct.as_ptr(),
            ct.len() as c_int,
        );
        if rc != 1 {
            EVP_CIPHER_CTX_free(ctx);
            return Err(CryptoError::Corrupt("aes-256 key unwrap failed integrity check".into()));
        }
        let mut final_len: c_int = 0;
        let rc = EVP_DecryptFinal_ex(ctx, out.as_mut_ptr().add(out_len as usize), &mut final_len);
        EVP_CIPHER_CTX_free(ctx);
        if rc != 1 {
            return Err(CryptoError::Corrupt(
                "aes-256 key unwrap failed integrity check on finalize".into(),
            ));
        }
        out.truncate((out_len + final_len) as usize);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concrete_scenario_symmetric_wrap_round_trip() {
        let kek = [0u8; 32];
        let plain = [0x41u8; 16];
        let wrapped = wrap_sym(&kek, &plain).unwrap();
        assert_eq!(wrapped.len(), 24);
        let unwrapped = unwrap_sym(&kek, &wrapped).unwrap();
        assert_eq!(unwrapped, plain);
    }

    #[test]
    fn round_trip_for_varied_lengths() {
        let kek = [7u8; 32];
        for len in [16, 32, 64, 1024] {
            let plain = vec![0xAB; len];
            let wrapped = wrap_sym(&kek, &plain).unwrap();
            assert_eq!(wrapped.len(), len + 8);
            assert_eq!(unwrap_sym(&kek, &wrapped).unwrap(), plain);
        }
    }

    #[test]
    fn bad_kek_len_is_rejected() {
        let kek = [0u8; 16];
        assert!(matches!(
            wrap_sym(&kek, &[0u8; 16]),
            Err(CryptoError::BadKeyLen { .. })
        ));
    }
}
