use std::fs::File;
use std::io::Read;
use std::path::Path;

use openssl::hash::{Hasher, MessageDigest};

use super::SIGN_HASH_BUFFER_SIZE;
use crate::error::{CryptoError, CryptoResult};

/// Hashes an in-memory buffer with the named digest.
pub fn hash_buf(buf: &[u8], digest: MessageDigest) -> CryptoResult<Vec<u8>> {
    let mut hasher = Hasher::new(digest).map_err(CryptoError::Ssl)?;
    hasher.update(buf).map_err(CryptoError::Ssl)?;
    Ok(hasher.finish().map_err(CryptoError::Ssl)?.to_vec())
}

/// Hashes a file's contents streaming through `SIGN_HASH_BUFFER_SIZE`-byte
/// chunks; never buffers the whole file in memory.
pub fn hash_file(path: &Path, digest: MessageDigest) -> CryptoResult<Vec<u8>> {
    let mut file = File::open(path).map_err(CryptoError::Io)?;
    let mut hasher = Hasher::new(digest).map_err(CryptoError::Ssl)?;
    let mut buf = [0u8; SIGN_HASH_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(CryptoError::Io)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]).map_err(CryptoError::Ssl)?;
    }
    Ok(hasher.finish().map_err(CryptoError::Ssl)?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn hash_file_matches_hash_buf() {
        let data = vec![0x5a; SIGN_HASH_BUFFER_SIZE * 3 + 17];
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(&data).unwrap();

        let from_buf = hash_buf(&data, MessageDigest::sha256()).unwrap();
        let from_file = hash_file(f.path(), MessageDigest::sha256()).unwrap();
        assert_eq!(from_buf, from_file);
    }
}
