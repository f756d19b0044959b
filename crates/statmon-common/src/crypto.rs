//! Optional RSA envelope for bulk payloads.
//!
//! PKCS#1 v1.5 bounds a single block's plaintext to `k - 11` bytes, where
//! `k` is the modulus size, so payloads are split into chunks of that size
//! and each chunk is encrypted separately. The ciphertext is the
//! concatenation of `k`-byte blocks.

use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::path::{Path, PathBuf};

const PKCS1_V15_OVERHEAD: usize = 11;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("failed to read key file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid key material: {0}")]
    Key(String),

    #[error("RSA operation failed: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("ciphertext length {len} is not a multiple of the {block}-byte block size")]
    MalformedCiphertext { len: usize, block: usize },
}

fn read_pem(path: &Path) -> Result<String, CryptoError> {
    std::fs::read_to_string(path).map_err(|source| CryptoError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Agent side: encrypts with the server's public key.
#[derive(Debug, Clone)]
pub struct PayloadEncryptor {
    key: RsaPublicKey,
}

impl PayloadEncryptor {
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = RsaPublicKey::from_public_key_pem(pem).map_err(|e| CryptoError::Key(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        Self::from_pem(&read_pem(path.as_ref())?)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let block = self.key.size();
        let chunk = block - PKCS1_V15_OVERHEAD;
        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity(plaintext.len().div_ceil(chunk).max(1) * block);
        if plaintext.is_empty() {
            out.extend(self.key.encrypt(&mut rng, Pkcs1v15Encrypt, &[])?);
            return Ok(out);
        }
        for piece in plaintext.chunks(chunk) {
            out.extend(self.key.encrypt(&mut rng, Pkcs1v15Encrypt, piece)?);
        }
        Ok(out)
    }
}

/// Server side: decrypts with the private key.
#[derive(Debug, Clone)]
pub struct PayloadDecryptor {
    key: RsaPrivateKey,
}

impl PayloadDecryptor {
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| CryptoError::Key(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        Self::from_pem(&read_pem(path.as_ref())?)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let block = self.key.size();
        if ciphertext.is_empty() || ciphertext.len() % block != 0 {
            return Err(CryptoError::MalformedCiphertext {
                len: ciphertext.len(),
                block,
            });
        }
        let mut out = Vec::with_capacity(ciphertext.len());
        for piece in ciphertext.chunks(block) {
            out.extend(self.key.decrypt(Pkcs1v15Encrypt, piece)?);
        }
        Ok(out)
    }
}

/// Generates a key pair and writes `private.pem` (PKCS#8) and `public.pem`
/// (SPKI) into `dir`. Returns the two paths.
pub fn generate_key_pair(dir: impl AsRef<Path>, bits: usize) -> Result<(PathBuf, PathBuf), CryptoError> {
    let dir = dir.as_ref();
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| CryptoError::Io { path, source }
    };
    std::fs::create_dir_all(dir).map_err(io_err(dir))?;

    let private = RsaPrivateKey::new(&mut rand::thread_rng(), bits)?;
    let public = RsaPublicKey::from(&private);
    let private_pem = private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CryptoError::Key(e.to_string()))?;
    let public_pem = public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| CryptoError::Key(e.to_string()))?;

    let private_path = dir.join("private.pem");
    let public_path = dir.join("public.pem");
    std::fs::write(&private_path, private_pem.as_bytes()).map_err(io_err(&private_path))?;
    std::fs::write(&public_path, public_pem.as_bytes()).map_err(io_err(&public_path))?;
    tracing::info!(dir = %dir.display(), bits, "Generated RSA key pair");
    Ok((private_path, public_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunked_roundtrip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let (private, public) = generate_key_pair(dir.path(), 1024).unwrap();
        let enc = PayloadEncryptor::from_pem_file(&public).unwrap();
        let dec = PayloadDecryptor::from_pem_file(&private).unwrap();

        // 1024-bit key: 117-byte chunks, so this needs several blocks.
        let payload: Vec<u8> = (0..500u32).map(|i| (i % 251) as u8).collect();
        let sealed = enc.encrypt(&payload).unwrap();
        assert_eq!(sealed.len(), 5 * 128);
        assert_eq!(dec.decrypt(&sealed).unwrap(), payload);
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (private, public) = generate_key_pair(dir.path(), 1024).unwrap();
        let enc = PayloadEncryptor::from_pem_file(&public).unwrap();
        let dec = PayloadDecryptor::from_pem_file(&private).unwrap();
        let mut sealed = enc.encrypt(b"[]").unwrap();
        sealed.pop();
        assert!(matches!(
            dec.decrypt(&sealed),
            Err(CryptoError::MalformedCiphertext { .. })
        ));
    }

    #[test]
    fn test_missing_key_file() {
        let err = PayloadEncryptor::from_pem_file("/nonexistent/public.pem").unwrap_err();
        assert!(matches!(err, CryptoError::Io { .. }));
    }
}
