use std::fs;
use std::path::Path;

use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::Id;
use openssl::pkey_ctx::PkeyCtx;
use openssl::rsa::Padding;
use openssl::sign::RsaPssSaltlen;
use openssl::x509::X509;

use super::hash::{hash_buf, hash_file};
use crate::error::{CryptoError, CryptoResult, Verdict};

/// Maps an X.509 signature-algorithm OID to the digest name used to
/// produce it. Any OID not in the table returns `None`, forcing the
/// caller to name the digest explicitly rather than silently guessing.
pub fn digest_by_sig_oid(sig_alg_nid: Nid) -> Option<&'static str> {
    match sig_alg_nid {
        Nid::SHA224WITHRSAENCRYPTION => Some("sha224"),
        Nid::SHA256WITHRSAENCRYPTION => Some("sha256"),
        Nid::SHA384WITHRSAENCRYPTION => Some("sha384"),
        Nid::SHA512WITHRSAENCRYPTION => Some("sha512"),
        Nid::RSASSAPSS => Some("sha256"),
        _ => None,
    }
}

/// `verify_sig_digest(cert_pem, sig, hash, digest_name) -> Verdict`.
/// Branches on the certificate public key's base type: RSA-PSS gets PSS
/// padding with MGF1 digest and salt length = digest length; classical
/// RSA gets bare digest configuration. Any other key type is
/// `Unsupported`.
pub fn verify_sig_digest(
    cert_pem: &[u8],
    sig: &[u8],
    hash: &[u8],
    digest_name: &str,
) -> CryptoResult<Verdict> {
    let cert = X509::from_pem(cert_pem).map_err(CryptoError::Ssl)?;
    let pubkey = cert.public_key().map_err(CryptoError::Ssl)?;

    let md = MessageDigest::from_name(digest_name)
        .ok_or_else(|| CryptoError::Unsupported(format!("unknown digest {}", digest_name)))?;

    let mut ctx = PkeyCtx::new(&pubkey).map_err(CryptoError::Ssl)?;
    ctx.verify_init().map_err(CryptoError::Ssl)?;

    match pubkey.id() {
        Id::RSA_PSS => {
            ctx.set_rsa_padding(Padding::PKCS1_PSS).map_err(CryptoError::Ssl)?;
            ctx.set_signature_md(md).map_err(CryptoError::Ssl)?;
            ctx.set_rsa_mgf1_md(md).map_err(CryptoError::Ssl)?;
            ctx.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)
                .map_err(CryptoError::Ssl)?;
        }
        Id::RSA => {
            ctx.set_signature_md(md).map_err(CryptoError::Ssl)?;
        }
        other => {
            return Err(CryptoError::Unsupported(format!("unsupported key type {:?}", other)));
        }
    }

    match ctx.verify(hash, sig) {
        Ok(true) => Ok(Verdict::Ok),
        Ok(false) => Ok(Verdict::Invalid),
        Err(e) => {
            log::debug!("verify_sig_digest: verify() returned error: {}", e);
            Ok(Verdict::VerifyError)
        }
    }
}

/// Hashes `buf` with the named digest, then delegates to
/// `verify_sig_digest`.
pub fn verify_sig_buf(
    cert_pem: &[u8],
    sig: &[u8],
    buf: &[u8],
    digest_name: &str,
) -> CryptoResult<Verdict> {
    let md = MessageDigest::from_name(digest_name)
        .ok_or_else(|| CryptoError::Unsupported(format!("unknown digest {}", digest_name)))?;
    let hash = hash_buf(buf, md)?;
    verify_sig_digest(cert_pem, sig, &hash, digest_name)
}

/// Loads cert and signature as bytes, hashes `signed_file` streamingly,
/// and delegates to `verify_sig_digest`.
pub fn verify_sig_files(
    cert_file: &Path,
    sig_file: &Path,
    signed_file: &Path,
    digest_name: &str,
) -> CryptoResult<Verdict> {
    let cert_pem = fs::read(cert_file).map_err(CryptoError::Io)?;
    let sig = fs::read(sig_file).map_err(CryptoError::Io)?;
    let md = MessageDigest::from_name(digest_name)
        .ok_or_else(|| CryptoError::Unsupported(format!("unknown digest {}", digest_name)))?;
    let hash = hash_file(signed_file, md)?;
    verify_sig_digest(&cert_pem, &sig, &hash, digest_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::cert::build_self_signed_user_cert;
    use crate::crypto::keys::make_keypair;
    use crate::crypto::Padding as KeyPadding;
    use openssl::pkey_ctx::PkeyCtx as SignCtx;

    fn sign_digest(pkey: &openssl::pkey::PKey<openssl::pkey::Private>, hash: &[u8]) -> Vec<u8> {
        let mut ctx = SignCtx::new(pkey).unwrap();
        ctx.sign_init().unwrap();
        ctx.set_signature_md(MessageDigest::sha256()).unwrap();
        let mut sig = vec![0; ctx.sign(hash, None).unwrap()];
        let len = ctx.sign(hash, Some(&mut sig)).unwrap();
        sig.truncate(len);
        sig
    }

    #[test]
    fn flipped_byte_is_invalid_not_verify_error() {
        let kp = make_keypair(KeyPadding::Rsa).unwrap();
        let cert = build_self_signed_user_cert(&kp.pkey, "sign-test").unwrap();
        let cert_pem = cert.to_pem().unwrap();

        let hash = hash_buf(b"hello world", MessageDigest::sha256()).unwrap();
        let mut sig = sign_digest(&kp.pkey, &hash);

        let verdict = verify_sig_digest(&cert_pem, &sig, &hash, "sha256").unwrap();
        assert_eq!(verdict, Verdict::Ok);

        let last = sig.len() - 1;
        sig[last] ^= 0xff;
        let verdict = verify_sig_digest(&cert_pem, &sig, &hash, "sha256").unwrap();
        assert_eq!(verdict, Verdict::Invalid);
    }

    #[test]
    fn mismatched_digest_length_is_verify_error_not_invalid() {
        let kp = make_keypair(KeyPadding::Rsa).unwrap();
        let cert = build_self_signed_user_cert(&kp.pkey, "sign-test").unwrap();
        let cert_pem = cert.to_pem().unwrap();

        let hash = hash_buf(b"hello world", MessageDigest::sha256()).unwrap();
        let sig = sign_digest(&kp.pkey, &hash);

        // truncating the digest makes its length disagree with what
        // "sha256" requires, which openssl rejects before it ever gets
        // to compare against the signature.
        let short_hash = &hash[..hash.len() - 1];
        let verdict = verify_sig_digest(&cert_pem, &sig, short_hash, "sha256").unwrap();
        assert_eq!(verdict, Verdict::VerifyError);
    }

    #[test]
    fn unknown_oid_has_no_digest_mapping() {
        assert_eq!(digest_by_sig_oid(Nid::SHA1WITHRSAENCRYPTION), None);
        assert_eq!(digest_by_sig_oid(Nid::SHA256WITHRSAENCRYPTION), Some("sha256"));
    }
}
