use crate::cert::descriptor::CertificateDescriptor;
use crate::utils::errors::{CertManagerError, Result};
use clap::ValueEnum;
use rcgen::{
    CertificateParams, CertificateSigningRequest, DistinguishedName, DnType, KeyPair,
    SignatureAlgorithm,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Asymmetric key type used for newly generated keys
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyAlgorithm {
    #[default]
    EcdsaP256,
    EcdsaP384,
    Ed25519,
}

impl KeyAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlgorithm::EcdsaP256 => "ecdsa-p256",
            KeyAlgorithm::EcdsaP384 => "ecdsa-p384",
            KeyAlgorithm::Ed25519 => "ed25519",
        }
    }

    fn signature_algorithm(&self) -> &'static SignatureAlgorithm {
        match self {
            KeyAlgorithm::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            KeyAlgorithm::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
            KeyAlgorithm::Ed25519 => &rcgen::PKCS_ED25519,
        }
    }
}

/// Generate a fresh key pair in memory. Callers persist it with
/// `KeyPair::serialize_pem` through an owner-only write.
pub fn generate_key_pair(algorithm: KeyAlgorithm) -> Result<KeyPair> {
    let key_pair = KeyPair::generate_for(algorithm.signature_algorithm())?;
    tracing::debug!("Generated {} key pair", algorithm.as_str());
    Ok(key_pair)
}

/// Load a PEM private key from disk
pub fn load_private_key(path: &Path) -> Result<KeyPair> {
    let pem = fs::read_to_string(path).map_err(|e| {
        CertManagerError::NotFound(format!("Private key {}: {e}", path.display()))
    })?;
    KeyPair::from_pem(&pem).map_err(|e| {
        CertManagerError::Codec(format!("Cannot decode private key {}: {e}", path.display()))
    })
}

/// Build and sign the certificate request for a leaf descriptor, as PEM.
/// The request carries the common name and organization only; the
/// remaining subject and extensions come from the descriptor at signing time.
pub fn certificate_request(
    descriptor: &CertificateDescriptor,
    key_pair: &KeyPair,
) -> Result<String> {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, descriptor.common_name.as_str());
    if !descriptor.organization.is_empty() {
        dn.push(DnType::OrganizationName, descriptor.organization.as_str());
    }
    params.distinguished_name = dn;

    let csr: CertificateSigningRequest = params.serialize_request(key_pair)?;
    Ok(csr.pem()?)
}
