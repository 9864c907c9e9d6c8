use crate::cert::key_usage::KeyUsage;
use crate::cert::serial::SerialNumber;
use crate::utils::errors::{CertManagerError, Result};
use crate::utils::files::write_atomic_bytes;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::net::IpAddr;
use std::path::Path;

/// Stand-in email so that the subject signature is always fully populated
pub const EMAIL_SENTINEL: &str = "none";

/// Declarative request for a CA or leaf certificate, persisted as
/// `<certificate_name>.json` in the descriptor store.
///
/// Field names follow the JSON files written by earlier versions of the tool.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CertificateDescriptor {
    #[serde(rename = "Country")]
    pub country: String,
    #[serde(rename = "Province")]
    pub province: String,
    #[serde(rename = "Locality")]
    pub locality: String,
    #[serde(rename = "Organization")]
    pub organization: String,
    #[serde(rename = "OrganizationalUnit", default, skip_serializing_if = "String::is_empty")]
    pub organizational_unit: String,
    #[serde(rename = "CommonName")]
    pub common_name: String,
    #[serde(rename = "IsCA", default)]
    pub is_ca: bool,
    #[serde(rename = "EmailAddresses", default)]
    pub email_addresses: Vec<String>,
    /// Validity in years
    #[serde(rename = "Duration")]
    pub duration: u32,
    #[serde(rename = "KeyUsage", default)]
    pub key_usage: Vec<KeyUsage>,
    #[serde(rename = "DNSNames", default, skip_serializing_if = "Vec::is_empty")]
    pub dns_names: Vec<String>,
    #[serde(rename = "IPAddresses", default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<IpAddr>,
    #[serde(rename = "CertificateName")]
    pub certificate_name: String,
    /// Assigned at issuance, never taken from user input
    #[serde(rename = "SerialNumber", default)]
    pub serial_number: SerialNumber,
    /// Free text kept in the descriptor only, never signed
    #[serde(rename = "Comments", default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<String>,
}

impl CertificateDescriptor {
    /// Load a descriptor file; a missing file is `NotFound`
    pub fn load(path: &Path) -> Result<Self> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CertManagerError::NotFound(format!(
                    "Certificate descriptor {}",
                    path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&data).map_err(|e| {
            CertManagerError::Codec(format!("Malformed descriptor {}: {e}", path.display()))
        })
    }

    /// Write the descriptor, replacing any previous file of the same name
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic_bytes(path, json.as_bytes())?;
        tracing::debug!("Descriptor saved to {}", path.display());
        Ok(())
    }

    /// Replace an empty email list with the sentinel value
    pub fn normalize_emails(&mut self) {
        self.email_addresses.retain(|e| !e.trim().is_empty());
        if self.email_addresses.is_empty() {
            self.email_addresses.push(EMAIL_SENTINEL.to_string());
        }
    }

    /// Email used in the subject signature and ledger entry
    pub fn primary_email(&self) -> &str {
        self.email_addresses
            .first()
            .map(String::as_str)
            .unwrap_or(EMAIL_SENTINEL)
    }

    /// Emails that belong in the certificate's subject alternative names
    pub fn san_emails(&self) -> impl Iterator<Item = &str> {
        self.email_addresses
            .iter()
            .map(String::as_str)
            .filter(|e| *e != EMAIL_SENTINEL)
    }

    /// Canonical identity string used for duplicate detection and revocation lookup
    pub fn subject_signature(&self) -> String {
        format!(
            "/C={}/ST={}/L={}/O={}/OU={}/CN={}/emailAddress={}",
            self.country,
            self.province,
            self.locality,
            self.organization,
            self.organizational_unit,
            self.common_name,
            self.primary_email()
        )
    }

    /// Check the fields issuance cannot proceed without
    pub fn validate(&self) -> Result<()> {
        if self.certificate_name.trim().is_empty() {
            return Err(CertManagerError::InvalidInput(
                "Certificate name is required".to_string(),
            ));
        }
        if self.certificate_name.contains(['/', '\\']) || self.certificate_name.starts_with('.') {
            return Err(CertManagerError::InvalidInput(format!(
                "Certificate name '{}' must be a plain file name",
                self.certificate_name
            )));
        }
        if self.common_name.trim().is_empty() {
            return Err(CertManagerError::InvalidInput(
                "Common name is required".to_string(),
            ));
        }
        if self.duration == 0 {
            return Err(CertManagerError::InvalidInput(
                "Duration must be at least one year".to_string(),
            ));
        }
        if self
            .subject_fields()
            .iter()
            .any(|(_, value)| value.contains(['/', '\t', '\n']))
        {
            return Err(CertManagerError::InvalidInput(
                "Subject fields may not contain '/', tabs or newlines".to_string(),
            ));
        }
        Ok(())
    }

    fn subject_fields(&self) -> [(&'static str, &str); 7] {
        [
            ("C", self.country.as_str()),
            ("ST", self.province.as_str()),
            ("L", self.locality.as_str()),
            ("O", self.organization.as_str()),
            ("OU", self.organizational_unit.as_str()),
            ("CN", self.common_name.as_str()),
            ("emailAddress", self.primary_email()),
        ]
    }

    /// Annotated example descriptor for a root CA
    pub fn sample() -> Self {
        Self {
            country: "CA".to_string(),
            province: "Quebec".to_string(),
            locality: "Blainville".to_string(),
            organization: "myorg.net".to_string(),
            organizational_unit: "myorg".to_string(),
            common_name: "myorg.net root CA".to_string(),
            is_ca: true,
            email_addresses: vec!["cert@myorg.net".to_string()],
            duration: 10,
            key_usage: vec![
                KeyUsage::CertSign,
                KeyUsage::CrlSign,
                KeyUsage::DigitalSignature,
            ],
            dns_names: vec!["myorg.net".to_string(), "lan.myorg.net".to_string()],
            ip_addresses: Vec::new(),
            certificate_name: "sampleCert".to_string(),
            serial_number: SerialNumber::default(),
            comments: vec![
                format!(
                    "KeyUsage accepts: {}",
                    KeyUsage::ALL
                        .iter()
                        .map(|u| u.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                "SerialNumber is assigned by certmgr at issuance; any value here is ignored"
                    .to_string(),
                "Comments are kept in this file only and never appear in the certificate"
                    .to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn leaf() -> CertificateDescriptor {
        CertificateDescriptor {
            country: "CA".to_string(),
            province: "QC".to_string(),
            locality: "Montreal".to_string(),
            organization: "Lab".to_string(),
            common_name: "a.example".to_string(),
            duration: 1,
            key_usage: vec![KeyUsage::DigitalSignature, KeyUsage::KeyEncipherment],
            dns_names: vec!["a.example".to_string()],
            ip_addresses: vec!["10.0.0.1".parse().unwrap()],
            certificate_name: "a".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_subject_signature_canonical_order() {
        let mut d = leaf();
        d.organizational_unit = "Ops".to_string();
        d.email_addresses = vec!["ops@lab".to_string(), "second@lab".to_string()];
        assert_eq!(
            d.subject_signature(),
            "/C=CA/ST=QC/L=Montreal/O=Lab/OU=Ops/CN=a.example/emailAddress=ops@lab"
        );
    }

    #[test]
    fn test_empty_emails_normalize_to_sentinel() {
        let mut d = leaf();
        d.email_addresses = vec![" ".to_string()];
        d.normalize_emails();
        assert_eq!(d.email_addresses, vec![EMAIL_SENTINEL.to_string()]);
        assert!(d.subject_signature().ends_with("/emailAddress=none"));
        assert_eq!(d.san_emails().count(), 0);
    }

    #[test]
    fn test_round_trip_preserves_every_field() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.json");
        let mut d = leaf();
        d.normalize_emails();
        d.serial_number = SerialNumber::new(2);
        d.comments = vec!["lab only".to_string()];

        d.save(&path).unwrap();
        let loaded = CertificateDescriptor::load(&path).unwrap();
        assert_eq!(loaded, d);
        assert_eq!(loaded.email_addresses.len(), 1);
    }

    #[test]
    fn test_reads_original_json_layout() {
        let json = r#"{
  "Country": "CA",
  "Province": "Quebec",
  "Locality": "Blainville",
  "Organization": "myorg.net",
  "OrganizationalUnit": "myorg",
  "CommonName": "myorg.net root CA",
  "IsCA": true,
  "EmailAddresses": ["cert@myorg.net"],
  "Duration": 10,
  "KeyUsage": ["cert sign", "crl sign", "digital signature"],
  "DNSNames": ["myorg.net"],
  "IPAddresses": ["10.0.0.1", "127.0.0.1"],
  "CertificateName": "sampleCert",
  "SerialNumber": 1,
  "Comments": ["note"]
}"#;
        let d: CertificateDescriptor = serde_json::from_str(json).unwrap();
        assert!(d.is_ca);
        assert_eq!(d.serial_number.value(), 1);
        assert_eq!(d.ip_addresses.len(), 2);
        assert_eq!(d.key_usage[0], KeyUsage::CertSign);
    }

    #[test]
    fn test_missing_descriptor_is_not_found() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            CertificateDescriptor::load(&tmp.path().join("nope.json")),
            Err(CertManagerError::NotFound(_))
        ));
    }

    #[test]
    fn test_malformed_descriptor_is_codec_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.json");
        fs::write(&path, r#"{"Country": "CA", "KeyUsage": ["teleport"]}"#).unwrap();
        assert!(matches!(
            CertificateDescriptor::load(&path),
            Err(CertManagerError::Codec(_))
        ));
    }

    #[test]
    fn test_validate() {
        assert!(leaf().validate().is_ok());

        let mut d = leaf();
        d.duration = 0;
        assert!(d.validate().is_err());

        let mut d = leaf();
        d.certificate_name = "../escape".to_string();
        assert!(d.validate().is_err());

        let mut d = leaf();
        d.organization = "A/B".to_string();
        assert!(d.validate().is_err());
    }
}
