use std::fs;
use std::path::Path;

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectKeyIdentifier};
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::{X509Name, X509NameBuilder, X509Req, X509StoreContext, X509};

use super::{TEST_C, TEST_L, TEST_NOT_AFTER_SECS, TEST_O, TEST_OU1, TEST_OU2, TEST_ST};
use crate::error::{CryptoError, CryptoResult, Verdict};

// X509_V_ERR_* values, stable across OpenSSL releases.
const X509_V_ERR_CERT_NOT_YET_VALID: i32 = 9;
const X509_V_ERR_CERT_HAS_EXPIRED: i32 = 10;

fn self_signed_subject(cn: &str) -> CryptoResult<X509Name> {
    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("C", TEST_C)?;
    name.append_entry_by_text("ST", TEST_ST)?;
    name.append_entry_by_text("L", TEST_L)?;
    name.append_entry_by_text("O", TEST_O)?;
    name.append_entry_by_text("OU", TEST_OU1)?;
    name.append_entry_by_text("OU", TEST_OU2)?;
    name.append_entry_by_text("CN", cn)?;
    Ok(name.build())
}

/// Builds the self-signed user certificate packaged into a soft token:
/// basic constraints CA:FALSE (critical), key usage keyCertSign+cRLSign
/// (critical), subject key identifier hash, serial 0, validity
/// now..now+365d.
pub fn build_self_signed_user_cert(pkey: &PKey<Private>, cn: &str) -> CryptoResult<X509> {
    let mut builder = X509::builder()?;
    builder.set_version(super::TEST_CERT_VERSION)?;

    let serial = BigNum::from_u32(0)?.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;

    let subject = self_signed_subject(cn)?;
    builder.set_subject_name(&subject)?;
    builder.set_issuer_name(&subject)?;
    builder.set_pubkey(pkey)?;

    let not_before = Asn1Time::days_from_now(0)?;
    builder.set_not_before(&not_before)?;
    let not_after = Asn1Time::days_from_now((TEST_NOT_AFTER_SECS / 86400) as u32)?;
    builder.set_not_after(&not_after)?;

    builder.append_extension(BasicConstraints::new().critical().build()?)?;
    builder.append_extension(
        KeyUsage::new().critical().key_cert_sign().crl_sign().build()?,
    )?;
    let ctx = builder.x509v3_context(None, None);
    let ski = SubjectKeyIdentifier::new().build(&ctx)?;
    builder.append_extension(ski)?;

    builder.sign(pkey, MessageDigest::sha256())?;
    Ok(builder.build())
}

/// `self_sign_csr(csr_path, out_cert_path, signing_key_path, use_tpm_key)`.
/// Copies the CSR's version, subject, public key and extensions into a
/// freshly built certificate with the fixed validity window; issuer equals
/// subject (self-signed).
pub fn self_sign_csr(
    csr_path: &Path,
    out_cert_path: &Path,
    signing_key_path: &Path,
    _use_tpm_key: bool,
) -> CryptoResult<()> {
    let csr_pem = fs::read(csr_path).map_err(CryptoError::Io)?;
    let csr = X509Req::from_pem(&csr_pem).map_err(CryptoError::Ssl)?;
    let key_pem = fs::read(signing_key_path).map_err(CryptoError::Io)?;
    let signing_key = PKey::private_key_from_pem(&key_pem).map_err(CryptoError::Ssl)?;

    let subject = csr.subject_name();
    let pubkey = csr.public_key().map_err(CryptoError::Ssl)?;

    let mut builder = X509::builder()?;
    builder.set_version(super::TEST_CERT_VERSION)?;
    let serial = BigNum::from_u32(0)?.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(subject)?;
    builder.set_issuer_name(subject)?;
    builder.set_pubkey(&pubkey)?;

    let not_before = Asn1Time::days_from_now(0)?;
    builder.set_not_before(&not_before)?;
    let not_after = Asn1Time::days_from_now((TEST_NOT_AFTER_SECS / 86400) as u32)?;
    builder.set_not_after(&not_after)?;

    if let Ok(exts) = csr.extensions() {
        for ext in exts.iter() {
            builder.append_extension2(ext)?;
        }
    }

    builder.sign(&signing_key, MessageDigest::sha256())?;
    let cert = builder.build();
    fs::write(out_cert_path, cert.to_pem().map_err(CryptoError::Ssl)?)
        .map_err(CryptoError::Io)?;
    Ok(())
}

/// `verify_cert(leaf_path, root_path, ignore_time)`. The leaf file may
/// concatenate additional untrusted chain certificates after the leaf PEM.
/// When `ignore_time` is set, a time-related verification failure
/// (expired or not-yet-valid) is tolerated; every other failure is fatal.
pub fn verify_cert(leaf_path: &Path, root_path: &Path, ignore_time: bool) -> CryptoResult<Verdict> {
    let root_pem = fs::read(root_path).map_err(CryptoError::Io)?;
    let root = X509::from_pem(&root_pem).map_err(CryptoError::Ssl)?;

    let mut store_builder = X509StoreBuilder::new().map_err(CryptoError::Ssl)?;
    store_builder.add_cert(root).map_err(CryptoError::Ssl)?;
    let store = store_builder.build();

    let leaf_pem = fs::read(leaf_path).map_err(CryptoError::Io)?;
    let mut certs = X509::stack_from_pem(&leaf_pem).map_err(CryptoError::Ssl)?;
    if certs.is_empty() {
        return Err(CryptoError::MalformedBlob("empty leaf chain".into()));
    }
    let leaf = certs.remove(0);
    if certs.is_empty() {
        log::warn!("verify_cert: leaf {:?} carries no additional chain", leaf_path);
    }
    let mut chain = Stack::new().map_err(CryptoError::Ssl)?;
    for c in certs {
        chain.push(c).map_err(CryptoError::Ssl)?;
    }

    let mut ctx = X509StoreContext::new().map_err(CryptoError::Ssl)?;
    let result = ctx.init(&store, &leaf, &chain, |c| {
        let ok = c.verify_cert()?;
        Ok((ok, c.error()))
    });

    let (ok, err) = match result {
        Ok(v) => v,
        Err(e) => {
            log::error!("verify_cert: infrastructure error: {}", e);
            return Ok(Verdict::VerifyError);
        }
    };

    if ok {
        return Ok(Verdict::Ok);
    }

    let depth = err.as_raw();
    log::warn!("verify_cert: verification failed at depth error {} ({})", depth, err);
    if ignore_time
        && (depth == X509_V_ERR_CERT_NOT_YET_VALID || depth == X509_V_ERR_CERT_HAS_EXPIRED)
    {
        return Ok(Verdict::Ok);
    }
    Ok(Verdict::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::make_keypair;
    use crate::crypto::Padding;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    fn write_pem(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let p = dir.join(name);
        fs::write(&p, bytes).unwrap();
        p
    }

    #[test]
    fn self_signed_cert_verifies_against_itself() {
        let kp = make_keypair(Padding::Rsa).unwrap();
        let cert = build_self_signed_user_cert(&kp.pkey, "self-test").unwrap();
        assert!(cert.verify(&kp.pkey).unwrap());
    }

    #[test]
    fn verify_cert_respects_ignore_time() {
        let dir = tempdir().unwrap();
        let kp = make_keypair(Padding::Rsa).unwrap();

        // root, valid
        let root = build_self_signed_user_cert(&kp.pkey, "root").unwrap();
        let root_path = write_pem(dir.path(), "root.pem", &root.to_pem().unwrap());

        // leaf signed by root's key but already expired
        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(0).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(root.subject_name()).unwrap();
        builder.set_issuer_name(root.subject_name()).unwrap();
        builder.set_pubkey(&kp.pkey).unwrap();
        let not_before = Asn1Time::days_from_now(0).unwrap();
        builder.set_not_before(&not_before).unwrap();
        let not_after = Asn1Time::from_unix(
            (SystemTime::now() - Duration::from_secs(86400))
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_secs() as i64,
        )
        .unwrap();
        builder.set_not_after(&not_after).unwrap();
        builder.sign(&kp.pkey, MessageDigest::sha256()).unwrap();
        let leaf = builder.build();
        let leaf_path = write_pem(dir.path(), "leaf.pem", &leaf.to_pem().unwrap());

        let strict = verify_cert(&leaf_path, &root_path, false).unwrap();
        assert_eq!(strict, Verdict::Invalid);

        let lenient = verify_cert(&leaf_path, &root_path, true).unwrap();
        assert_eq!(lenient, Verdict::Ok);
    }
}
