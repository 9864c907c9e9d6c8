use crate::cert::keys::load_private_key;
use crate::utils::errors::{CertManagerError, Result};
use rcgen::{Issuer, KeyPair};
use std::fs;
use std::path::{Path, PathBuf};

/// The root CA certificate and key found in the CA directory.
pub struct CaMaterial {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub cert_pem: String,
    key_pair: KeyPair,
}

impl CaMaterial {
    /// Find the single `*.crt` in `ca_dir` and its matching `.key`.
    /// Zero or several certificates make the signing CA ambiguous.
    pub fn locate(ca_dir: &Path) -> Result<Self> {
        let certs = ca_certificate_files(ca_dir)?;
        if certs.len() != 1 {
            return Err(CertManagerError::AmbiguousCa(certs.len()));
        }

        let cert_path = certs[0].clone();
        let key_path = cert_path.with_extension("key");
        let cert_pem = fs::read_to_string(&cert_path)?;
        if !key_path.exists() {
            return Err(CertManagerError::NotFound(format!(
                "CA private key {}",
                key_path.display()
            )));
        }
        let key_pair = load_private_key(&key_path)?;
        tracing::debug!("Using CA certificate {}", cert_path.display());

        Ok(Self {
            cert_path,
            key_path,
            cert_pem,
            key_pair,
        })
    }

    /// Signing handle built from the CA certificate and key
    pub fn into_issuer(self) -> Result<Issuer<'static, KeyPair>> {
        Issuer::from_ca_cert_pem(&self.cert_pem, self.key_pair).map_err(|e| {
            CertManagerError::Codec(format!(
                "Cannot decode CA certificate {}: {e}",
                self.cert_path.display()
            ))
        })
    }
}

/// All `*.crt` files directly inside `ca_dir`, sorted
pub fn ca_certificate_files(ca_dir: &Path) -> Result<Vec<PathBuf>> {
    if !ca_dir.exists() {
        return Ok(Vec::new());
    }
    let mut certs = Vec::new();
    for entry in fs::read_dir(ca_dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("crt") {
            certs.push(path);
        }
    }
    certs.sort();
    Ok(certs)
}
