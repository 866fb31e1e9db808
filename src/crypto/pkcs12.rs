use std::fs;
use std::path::Path;

use openssl::pkcs12::{ParsedPkcs12_2, Pkcs12};
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::X509;

use super::cert::build_self_signed_user_cert;
use super::keys::make_keypair;
use super::{Padding, TEST_FRIENDLY_NAME};
use crate::error::{CryptoError, CryptoResult};

/// `create_pkcs12(token_path, cert_path?, passphrase, cn, padding)`.
/// Generates a fresh keypair, builds the self-signed user certificate, and
/// packages both into a MAC'd PKCS#12 object at `token_path`.
pub fn create_pkcs12(
    token_path: &Path,
    cert_path: Option<&Path>,
    passphrase: &[u8],
    cn: &str,
    padding: Padding,
) -> CryptoResult<()> {
    if passphrase.is_empty() {
        return Err(CryptoError::MalformedBlob("passphrase must be non-null".into()));
    }
    let keypair = make_keypair(padding)?;
    let cert = build_self_signed_user_cert(&keypair.pkey, cn)?;

    let der = build_pkcs12_der(&keypair.pkey, &cert, None, passphrase)?;
    fs::write(token_path, der).map_err(CryptoError::Io)?;

    if let Some(path) = cert_path {
        fs::write(path, cert.to_pem().map_err(CryptoError::Ssl)?).map_err(CryptoError::Io)?;
    }
    Ok(())
}

fn build_pkcs12_der(
    pkey: &PKey<Private>,
    cert: &X509,
    ca: Option<&Stack<X509>>,
    passphrase: &[u8],
) -> CryptoResult<Vec<u8>> {
    let password = std::str::from_utf8(passphrase)
        .map_err(|_| CryptoError::MalformedBlob("passphrase must be valid UTF-8".into()))?;
    let mut builder = Pkcs12::builder();
    builder.name(TEST_FRIENDLY_NAME);
    builder.pkey(pkey);
    builder.cert(cert);
    if let Some(ca) = ca {
        builder.ca(ca.clone());
    }
    let pkcs12 = builder.build2(password).map_err(CryptoError::Ssl)?;
    pkcs12.to_der().map_err(CryptoError::Ssl)
}

fn parse_pkcs12(der: &[u8], passphrase: &[u8]) -> CryptoResult<ParsedPkcs12_2> {
    let password = std::str::from_utf8(passphrase)
        .map_err(|_| CryptoError::MalformedBlob("passphrase must be valid UTF-8".into()))?;
    let pkcs12 = Pkcs12::from_der(der).map_err(|e| {
        CryptoError::MalformedBlob(format!("not a valid PKCS#12 structure: {}", e))
    })?;
    pkcs12.parse2(password).map_err(|e| {
        let msg = e.to_string().to_lowercase();
        if msg.contains("mac") {
            CryptoError::BadPassphrase
        } else {
            CryptoError::MalformedBlob(e.to_string())
        }
    })
}

/// `read_pkcs12(token_path, passphrase) -> (key, cert, ca_chain?)`.
pub fn read_pkcs12(
    token_path: &Path,
    passphrase: &[u8],
) -> CryptoResult<(PKey<Private>, X509, Option<Stack<X509>>)> {
    let der = fs::read(token_path).map_err(CryptoError::Io)?;
    let parsed = parse_pkcs12(&der, passphrase)?;
    let pkey = parsed
        .pkey
        .ok_or_else(|| CryptoError::MalformedBlob("token carries no private key".into()))?;
    let cert = parsed
        .cert
        .ok_or_else(|| CryptoError::MalformedBlob("token carries no certificate".into()))?;
    Ok((pkey, cert, parsed.ca))
}

/// `rekey_pkcs12(token_path, old_pass, new_pass)`. Opens with `old_pass`,
/// repackages with `new_pass`, overwrites the file.
pub fn rekey_pkcs12(token_path: &Path, old_pass: &[u8], new_pass: &[u8]) -> CryptoResult<()> {
    let der = fs::read(token_path).map_err(CryptoError::Io)?;
    let parsed = parse_pkcs12(&der, old_pass)?;
    let pkey = parsed
        .pkey
        .ok_or_else(|| CryptoError::MalformedBlob("token carries no private key".into()))?;
    let cert = parsed
        .cert
        .ok_or_else(|| CryptoError::MalformedBlob("token carries no certificate".into()))?;

    let new_der = build_pkcs12_der(&pkey, &cert, parsed.ca.as_ref(), new_pass)?;
    fs::write(token_path, new_der).map_err(CryptoError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn wrong_passphrase_is_distinguishable_from_malformed() {
        let dir = tempdir().unwrap();
        let token_path = dir.path().join("t.p12");
        create_pkcs12(&token_path, None, b"pw", "cn", Padding::Rsa).unwrap();

        match read_pkcs12(&token_path, b"wrong") {
            Err(CryptoError::BadPassphrase) => {}
            other => panic!("expected BadPassphrase, got {:?}", other.err()),
        }

        let (_key, cert, _ca) = read_pkcs12(&token_path, b"pw").unwrap();
        assert!(cert.subject_name().entries().next().is_some());
    }

    #[test]
    fn rekey_then_read_with_new_passphrase() {
        let dir = tempdir().unwrap();
        let token_path = dir.path().join("t.p12");
        create_pkcs12(&token_path, None, b"old", "cn", Padding::Rsa).unwrap();
        rekey_pkcs12(&token_path, b"old", b"new").unwrap();

        assert!(matches!(
            read_pkcs12(&token_path, b"old"),
            Err(CryptoError::BadPassphrase)
        ));
        assert!(read_pkcs12(&token_path, b"new").is_ok());
    }
}
