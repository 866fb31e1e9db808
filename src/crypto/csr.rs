use std::fs;
use std::path::Path;

use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::symm::Cipher;
use openssl::x509::extension::{ExtendedKeyUsage, KeyUsage, SubjectAlternativeName};
use openssl::x509::{X509Name, X509Req, X509ReqBuilder};

use super::keys::{make_keypair, Keypair};
use super::{COUNTRY_C_CSR, ORGANIZATION_O_CSR, ORG_UNIT_OU1_CSR, Padding};
use crate::error::{CryptoError, CryptoResult};

fn build_subject(cn: &str) -> CryptoResult<X509Name> {
    let mut name = openssl::x509::X509NameBuilder::new()?;
    name.append_entry_by_text("C", COUNTRY_C_CSR)?;
    name.append_entry_by_text("O", ORGANIZATION_O_CSR)?;
    name.append_entry_by_text("OU", ORG_UNIT_OU1_CSR)?;
    name.append_entry_by_text("CN", cn)?;
    Ok(name.build())
}

/// Builds an X.509 certification request per the fixed subject/extension
/// policy and signs it with the given keypair's private key.
fn build_csr(pkey: &PKey<Private>, cn: &str, uid: &str) -> CryptoResult<X509Req> {
    let mut builder = X509ReqBuilder::new()?;
    builder.set_version(super::REQ_VERSION_CSR)?;
    builder.set_subject_name(&build_subject(cn)?)?;
    builder.set_pubkey(pkey)?;

    let ctx = builder.x509v3_context(None);
    let mut exts = openssl::stack::Stack::new()?;

    let key_usage = KeyUsage::new()
        .critical()
        .digital_signature()
        .key_encipherment()
        .non_repudiation()
        .build()?;
    exts.push(key_usage)?;

    let eku = ExtendedKeyUsage::new().critical().client_auth().build()?;
    exts.push(eku)?;

    let san = SubjectAlternativeName::new()
        .uri(&format!("UUID:{}", uid))
        .build(&ctx)?;
    exts.push(san)?;

    builder.add_extensions(&exts)?;
    builder.sign(pkey, MessageDigest::sha256())?;
    Ok(builder.build())
}

/// `create_csr(req_path, key_path, passphrase?, cn, uid, use_tpm_key,
/// padding)`. If `use_tpm_key` is set, `key_path` is expected to already
/// hold the engine-resident key's PEM reference and is loaded rather than
/// generated. Otherwise a fresh keypair is generated and, when `passphrase`
/// is supplied, its PEM serialization is encrypted under AES-256-CBC.
pub fn create_csr(
    req_path: &Path,
    key_path: &Path,
    passphrase: Option<&[u8]>,
    cn: &str,
    uid: &str,
    use_tpm_key: bool,
    padding: Padding,
) -> CryptoResult<()> {
    let keypair = if use_tpm_key {
        let pem = fs::read(key_path).map_err(CryptoError::Io)?;
        let pkey = PKey::private_key_from_pem(&pem)?;
        Keypair { pkey, padding }
    } else {
        make_keypair(padding)?
    };

    let csr = build_csr(&keypair.pkey, cn, uid)?;
    let pem = csr.to_pem().map_err(CryptoError::Ssl)?;
    fs::write(req_path, pem).map_err(|e| CryptoError::CsrWrite(e.to_string()))?;

    if !use_tpm_key {
        let rsa = keypair.pkey.rsa().map_err(CryptoError::Ssl)?;
        let key_pem = match passphrase {
            Some(pass) => rsa
                .private_key_to_pem_passphrase(Cipher::aes_256_cbc(), pass)
                .map_err(CryptoError::Ssl)?,
            None => rsa.private_key_to_pem().map_err(CryptoError::Ssl)?,
        };
        fs::write(key_path, key_pem).map_err(|e| CryptoError::CsrWrite(e.to_string()))?;
    }

    Ok(())
}
