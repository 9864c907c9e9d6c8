use crate::cert::key_usage::KeyUsage as Usage;
use crate::utils::errors::{CertManagerError, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use x509_parser::der_parser::oid;
use x509_parser::prelude::*;

const SUBJECT_ALT_NAME_OID: oid::Oid = oid!(2.5.29 .17);
const KEY_USAGE_OID: oid::Oid = oid!(2.5.29 .15);
const BASIC_CONSTRAINTS_OID: oid::Oid = oid!(2.5.29 .19);

/// Decoded view of a PEM certificate, as shown by `cert verify`
#[derive(Debug, Clone)]
pub struct CertificateReport {
    pub is_ca: bool,
    /// Colon-separated uppercase hex
    pub serial: String,
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub email_addresses: Vec<String>,
    pub key_usage: Vec<Usage>,
    pub sha256_fingerprint: String,
    pub pem: String,
}

impl CertificateReport {
    pub fn from_file(path: &Path) -> Result<Self> {
        let pem = fs::read_to_string(path).map_err(|e| {
            CertManagerError::NotFound(format!("Certificate {}: {e}", path.display()))
        })?;
        Self::from_pem(&pem)
    }

    pub fn from_pem(pem_data: &str) -> Result<Self> {
        let body = extract_cert_from_pem(pem_data)?;
        let der_bytes = general_purpose::STANDARD
            .decode(&body)
            .map_err(|e| CertManagerError::Codec(format!("Base64 decode error: {e}")))?;
        let (_, cert) = X509Certificate::from_der(&der_bytes)
            .map_err(|e| CertManagerError::Codec(format!("DER parsing error: {e}")))?;

        let mut report = Self {
            is_ca: false,
            serial: colon_hex(&cert.serial.to_bytes_be()),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            not_before: timestamp(cert.validity().not_before.timestamp())?,
            not_after: timestamp(cert.validity().not_after.timestamp())?,
            dns_names: Vec::new(),
            ip_addresses: Vec::new(),
            email_addresses: Vec::new(),
            key_usage: Vec::new(),
            sha256_fingerprint: colon_hex(&Sha256::digest(&der_bytes)),
            pem: pem_data.trim_end().to_string(),
        };

        for ext in cert.extensions() {
            if ext.oid == SUBJECT_ALT_NAME_OID {
                if let Ok((_, san)) = SubjectAlternativeName::from_der(ext.value) {
                    report.add_names(&san.general_names);
                }
            } else if ext.oid == KEY_USAGE_OID {
                if let Ok((_, ku)) = KeyUsage::from_der(ext.value) {
                    report.key_usage = key_usages(&ku);
                }
            } else if ext.oid == BASIC_CONSTRAINTS_OID {
                if let Ok((_, bc)) = BasicConstraints::from_der(ext.value) {
                    report.is_ca = bc.ca;
                }
            }
        }
        Ok(report)
    }

    fn add_names(&mut self, names: &[GeneralName]) {
        for name in names {
            match name {
                GeneralName::DNSName(dns) => self.dns_names.push(dns.to_string()),
                GeneralName::RFC822Name(email) => self.email_addresses.push(email.to_string()),
                GeneralName::IPAddress(bytes) => {
                    if let Ok(v4) = <[u8; 4]>::try_from(*bytes) {
                        self.ip_addresses.push(Ipv4Addr::from(v4).into());
                    } else if let Ok(v6) = <[u8; 16]>::try_from(*bytes) {
                        self.ip_addresses.push(Ipv6Addr::from(v6).into());
                    }
                }
                _ => {}
            }
        }
    }

    /// Whether the validity window covers `at`
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    /// Label/value pairs in display order
    pub fn summary(&self) -> Vec<(String, String)> {
        let join = |items: Vec<String>| {
            if items.is_empty() {
                "-".to_string()
            } else {
                items.join(", ")
            }
        };
        vec![
            ("CA".to_string(), self.is_ca.to_string()),
            ("Serial".to_string(), self.serial.clone()),
            ("Subject".to_string(), self.subject.clone()),
            ("Issuer".to_string(), self.issuer.clone()),
            ("Not before".to_string(), self.not_before.to_rfc3339()),
            ("Not after".to_string(), self.not_after.to_rfc3339()),
            (
                "Currently valid".to_string(),
                self.is_valid_at(Utc::now()).to_string(),
            ),
            ("DNS names".to_string(), join(self.dns_names.clone())),
            (
                "IP addresses".to_string(),
                join(self.ip_addresses.iter().map(|ip| ip.to_string()).collect()),
            ),
            ("Emails".to_string(), join(self.email_addresses.clone())),
            (
                "Key usage".to_string(),
                join(self.key_usage.iter().map(|u| u.to_string()).collect()),
            ),
            ("SHA-256".to_string(), self.sha256_fingerprint.clone()),
        ]
    }
}

/// Base64 body of the first certificate block
fn extract_cert_from_pem(pem_data: &str) -> Result<String> {
    let mut in_cert = false;
    let mut cert_lines = Vec::new();

    for line in pem_data.lines() {
        let line = line.trim();
        if line == "-----BEGIN CERTIFICATE-----" {
            in_cert = true;
        } else if line == "-----END CERTIFICATE-----" {
            break;
        } else if in_cert {
            cert_lines.push(line);
        }
    }

    if cert_lines.is_empty() {
        return Err(CertManagerError::Codec(
            "No certificate data found in PEM".to_string(),
        ));
    }
    Ok(cert_lines.concat())
}

fn key_usages(ku: &KeyUsage) -> Vec<Usage> {
    [
        (ku.digital_signature(), Usage::DigitalSignature),
        (ku.non_repudiation(), Usage::ContentCommitment),
        (ku.key_encipherment(), Usage::KeyEncipherment),
        (ku.data_encipherment(), Usage::DataEncipherment),
        (ku.key_agreement(), Usage::KeyAgreement),
        (ku.key_cert_sign(), Usage::CertSign),
        (ku.crl_sign(), Usage::CrlSign),
        (ku.encipher_only(), Usage::EncipherOnly),
        (ku.decipher_only(), Usage::DecipherOnly),
    ]
    .into_iter()
    .filter_map(|(set, usage)| set.then_some(usage))
    .collect()
}

fn colon_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join(":")
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| CertManagerError::Codec(format!("Certificate time {secs} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{
        BasicConstraints as CaConstraints, CertificateParams, IsCa, KeyPair, KeyUsagePurpose,
        SanType,
    };

    fn sample_pem() -> String {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec!["a.example".to_string()]).unwrap();
        params
            .subject_alt_names
            .push(SanType::IpAddress("10.1.2.3".parse().unwrap()));
        params
            .subject_alt_names
            .push(SanType::Rfc822Name("ops@a.example".try_into().unwrap()));
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        params.is_ca = IsCa::Ca(CaConstraints::Unconstrained);
        params.serial_number = Some(rcgen::SerialNumber::from(0x2Au64));
        params.self_signed(&key).unwrap().pem()
    }

    #[test]
    fn test_report_fields() {
        let report = CertificateReport::from_pem(&sample_pem()).unwrap();
        assert!(report.is_ca);
        assert!(report.serial.ends_with("2A"));
        assert_eq!(report.dns_names, vec!["a.example".to_string()]);
        assert_eq!(report.ip_addresses, vec!["10.1.2.3".parse::<IpAddr>().unwrap()]);
        assert_eq!(report.email_addresses, vec!["ops@a.example".to_string()]);
        assert_eq!(report.key_usage, vec![Usage::CertSign, Usage::CrlSign]);
        assert_eq!(report.sha256_fingerprint.split(':').count(), 32);
        assert!(report.is_valid_at(Utc::now()));
    }

    #[test]
    fn test_not_a_certificate() {
        assert!(matches!(
            CertificateReport::from_pem("hello"),
            Err(CertManagerError::Codec(_))
        ));
    }

    #[test]
    fn test_corrupt_body() {
        let pem = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        assert!(matches!(
            CertificateReport::from_pem(pem),
            Err(CertManagerError::Codec(_))
        ));
    }
}
