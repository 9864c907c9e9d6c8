use crate::utils::errors::CertManagerError;
use rcgen::KeyUsagePurpose;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// X.509 key usage flags a descriptor can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyUsage {
    DigitalSignature,
    ContentCommitment,
    KeyEncipherment,
    DataEncipherment,
    KeyAgreement,
    CertSign,
    CrlSign,
    EncipherOnly,
    DecipherOnly,
}

impl KeyUsage {
    pub const ALL: [KeyUsage; 9] = [
        KeyUsage::DigitalSignature,
        KeyUsage::ContentCommitment,
        KeyUsage::KeyEncipherment,
        KeyUsage::DataEncipherment,
        KeyUsage::KeyAgreement,
        KeyUsage::CertSign,
        KeyUsage::CrlSign,
        KeyUsage::EncipherOnly,
        KeyUsage::DecipherOnly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyUsage::DigitalSignature => "digital signature",
            KeyUsage::ContentCommitment => "content commitment",
            KeyUsage::KeyEncipherment => "key encipherment",
            KeyUsage::DataEncipherment => "data encipherment",
            KeyUsage::KeyAgreement => "key agreement",
            KeyUsage::CertSign => "cert sign",
            KeyUsage::CrlSign => "crl sign",
            KeyUsage::EncipherOnly => "encipher only",
            KeyUsage::DecipherOnly => "decipher only",
        }
    }

    pub fn purpose(&self) -> KeyUsagePurpose {
        match self {
            KeyUsage::DigitalSignature => KeyUsagePurpose::DigitalSignature,
            KeyUsage::ContentCommitment => KeyUsagePurpose::ContentCommitment,
            KeyUsage::KeyEncipherment => KeyUsagePurpose::KeyEncipherment,
            KeyUsage::DataEncipherment => KeyUsagePurpose::DataEncipherment,
            KeyUsage::KeyAgreement => KeyUsagePurpose::KeyAgreement,
            KeyUsage::CertSign => KeyUsagePurpose::KeyCertSign,
            KeyUsage::CrlSign => KeyUsagePurpose::CrlSign,
            KeyUsage::EncipherOnly => KeyUsagePurpose::EncipherOnly,
            KeyUsage::DecipherOnly => KeyUsagePurpose::DecipherOnly,
        }
    }
}

/// Map requested usages to rcgen purposes, dropping repeats.
/// CA certificates always carry cert sign, CRL sign and digital signature.
pub fn purposes_for(usages: &[KeyUsage], is_ca: bool) -> Vec<KeyUsagePurpose> {
    let mut wanted: Vec<KeyUsage> = usages.to_vec();
    if is_ca {
        wanted.extend([
            KeyUsage::CertSign,
            KeyUsage::CrlSign,
            KeyUsage::DigitalSignature,
        ]);
    }

    let mut purposes = Vec::new();
    for usage in KeyUsage::ALL {
        if wanted.contains(&usage) {
            purposes.push(usage.purpose());
        }
    }
    purposes
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyUsage {
    type Err = CertManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['_', '-'], " ");
        let usage = match normalized.as_str() {
            "digital signature" | "digitalsignature" => KeyUsage::DigitalSignature,
            "content commitment" | "contentcommitment" | "non repudiation" => {
                KeyUsage::ContentCommitment
            }
            "key encipherment" | "keyencipherment" => KeyUsage::KeyEncipherment,
            "data encipherment" | "dataencipherment" => KeyUsage::DataEncipherment,
            "key agreement" | "keyagreement" => KeyUsage::KeyAgreement,
            "cert sign" | "certificate sign" | "certificate signing" | "certsign" => {
                KeyUsage::CertSign
            }
            "crl sign" | "crl signing" | "crl" | "crlsign" => KeyUsage::CrlSign,
            "encipher only" | "encipheronly" | "encipher" => KeyUsage::EncipherOnly,
            "decipher only" | "decipheronly" | "decipher" => KeyUsage::DecipherOnly,
            _ => {
                return Err(CertManagerError::Codec(format!(
                    "Unknown key usage '{s}' (expected one of: {})",
                    KeyUsage::ALL
                        .iter()
                        .map(|u| u.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )))
            }
        };
        Ok(usage)
    }
}

impl Serialize for KeyUsage {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for KeyUsage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
