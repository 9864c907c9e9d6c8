//! Issuance of root CA and leaf certificates.
//!
//! One issuance walks descriptor -> serial -> key -> (request) -> signed
//! certificate -> ledger -> persisted descriptor. Key, request and
//! certificate are produced in memory and staged next to their targets;
//! the serial is committed once they are durably written, and only then do
//! they replace any files of a previous issuance under the same name. A
//! failed run therefore leaves existing certificates untouched.

use crate::cert::authority::CaMaterial;
use crate::cert::descriptor::CertificateDescriptor;
use crate::cert::key_usage::purposes_for;
use crate::cert::keys::{certificate_request, generate_key_pair, KeyAlgorithm};
use crate::cert::recover::highest_issued_serial;
use crate::cert::serial::{SerialAllocator, SerialNumber};
use crate::storage::ledger::{Ledger, LedgerEntry};
use crate::utils::errors::{CertManagerError, Result};
use crate::utils::files::{PkiLock, StagedFiles};
use crate::utils::keystore::{export_java_keystore, KeystoreFiles, KeystoreRequest};
use crate::utils::paths::PkiLayout;
use chrono::{DateTime, Months, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, DistinguishedName,
    DnType, IsCa, SanType,
};
use rcgen::string::Ia5String;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Per-run issuance settings
#[derive(Debug, Clone, Default)]
pub struct IssueOptions {
    /// Reject a subject that already has a valid ledger entry
    pub check_duplicates: bool,
    pub key_algorithm: KeyAlgorithm,
    /// Password for the optional PKCS#12/JKS export
    pub java_password: Option<String>,
}

/// What a successful issuance produced
#[derive(Debug)]
pub struct IssuedCertificate {
    pub name: String,
    pub serial: SerialNumber,
    pub is_ca: bool,
    pub subject: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub key_path: PathBuf,
    pub csr_path: Option<PathBuf>,
    pub certificate_path: PathBuf,
    pub newcert_path: Option<PathBuf>,
    pub descriptor_path: PathBuf,
    /// Outcome of the keystore export, when one was requested.
    /// A failure here leaves the issuance itself in place.
    pub keystore: Option<Result<KeystoreFiles>>,
}

/// Drives issuances against one PKI root
pub struct IssuanceEngine {
    layout: PkiLayout,
    serials: SerialAllocator,
    ledger: Ledger,
}

impl IssuanceEngine {
    pub fn new(layout: PkiLayout) -> Self {
        Self {
            serials: SerialAllocator::new(layout.serial_file()),
            ledger: Ledger::new(layout.index_file(), layout.index_attr_file()),
            layout,
        }
    }

    pub fn layout(&self) -> &PkiLayout {
        &self.layout
    }

    pub fn issue(
        &self,
        mut descriptor: CertificateDescriptor,
        options: &IssueOptions,
    ) -> Result<IssuedCertificate> {
        descriptor.validate()?;
        descriptor.normalize_emails();
        self.layout.ensure_dirs()?;

        let lock = PkiLock::acquire(&self.layout.lock_file())?;

        let subject = descriptor.subject_signature();
        if options.check_duplicates && self.ledger.is_duplicate(&subject)? {
            return Err(CertManagerError::Duplicate(format!(
                "A valid certificate already exists for {subject}"
            )));
        }

        let serial = self.next_serial()?;
        descriptor.serial_number = serial;
        tracing::info!(
            "Issuing {} '{}' with serial {serial}",
            if descriptor.is_ca { "CA" } else { "certificate" },
            descriptor.certificate_name
        );

        let signed = self.sign(&descriptor, serial, options.key_algorithm)?;

        let name = descriptor.certificate_name.as_str();
        let key_path = self.layout.key_file(name, descriptor.is_ca);
        let certificate_path = self.layout.cert_file(name, descriptor.is_ca);
        let csr_path = signed.csr_pem.as_ref().map(|_| self.layout.csr_file(name));
        let newcert_path = (!descriptor.is_ca).then(|| self.layout.newcert_file(&serial.as_hex()));

        let mut staged = StagedFiles::default();
        staged.stage(&key_path, signed.key_pem.as_bytes(), true)?;
        if let (Some(path), Some(pem)) = (&csr_path, &signed.csr_pem) {
            staged.stage(path, pem.as_bytes(), false)?;
        }
        if let Some(path) = &newcert_path {
            staged.stage(path, signed.cert_pem.as_bytes(), false)?;
        }
        staged.stage(&certificate_path, signed.cert_pem.as_bytes(), false)?;

        self.serials.commit(serial)?;
        staged.promote()?;
        tracing::info!("Certificate written to {}", certificate_path.display());

        self.ledger.write_attribute_file()?;
        if !descriptor.is_ca {
            let entry = LedgerEntry::valid(serial, subject.clone(), signed.not_before);
            self.ledger.append(&entry)?;
        }

        let descriptor_path = self.layout.descriptor_file(name);
        descriptor.save(&descriptor_path)?;
        drop(lock);

        let mut issued = IssuedCertificate {
            name: descriptor.certificate_name.clone(),
            serial,
            is_ca: descriptor.is_ca,
            subject,
            not_before: signed.not_before,
            not_after: signed.not_after,
            key_path,
            csr_path,
            certificate_path,
            newcert_path,
            descriptor_path,
            keystore: None,
        };

        if let Some(password) = options.java_password.as_deref() {
            if let Some(ca_certificate) = &signed.ca_certificate_path {
                let result = self.export_keystore(&issued, ca_certificate, password);
                if let Err(e) = &result {
                    tracing::warn!("Keystore export failed: {e}");
                }
                issued.keystore = Some(result);
            }
        }

        tracing::info!("Issued serial {serial} for {}", issued.subject);
        Ok(issued)
    }

    /// Next free serial. The stored counter is trusted only as far as it is
    /// ahead of every serial already recorded, so an emptied or corrupted
    /// counter never hands out a serial twice.
    fn next_serial(&self) -> Result<SerialNumber> {
        let counter = self.serials.current()?;
        let highest = highest_issued_serial(&self.layout)?;
        if highest > counter {
            tracing::warn!(
                "Serial counter {counter} lags behind issued serial {highest}, continuing from there"
            );
        }
        counter.max(highest).next()
    }

    /// Key, request and certificate in memory; nothing touches the disk
    fn sign(
        &self,
        descriptor: &CertificateDescriptor,
        serial: SerialNumber,
        algorithm: KeyAlgorithm,
    ) -> Result<Signed> {
        let (params, (not_before, not_after)) =
            certificate_params(descriptor, serial, Utc::now())?;

        // Resolve the CA before generating anything for a leaf
        let ca = if descriptor.is_ca {
            None
        } else {
            Some(CaMaterial::locate(&self.layout.ca_dir)?)
        };

        let key_pair = generate_key_pair(algorithm)?;
        let key_pem = key_pair.serialize_pem();

        let Some(ca) = ca else {
            let cert = params.self_signed(&key_pair)?;
            tracing::debug!("Self-signed CA certificate built");
            return Ok(Signed {
                not_before,
                not_after,
                key_pem,
                csr_pem: None,
                cert_pem: cert.pem(),
                ca_certificate_path: None,
            });
        };

        let csr_pem = certificate_request(descriptor, &key_pair)?;
        let ca_certificate_path = ca.cert_path.clone();
        let issuer = ca.into_issuer()?;
        let mut request = CertificateSigningRequestParams::from_pem(&csr_pem)?;
        request.params = params;
        let cert = request.signed_by(&issuer)?;
        tracing::debug!("Certificate signed by {}", ca_certificate_path.display());

        Ok(Signed {
            not_before,
            not_after,
            key_pem,
            csr_pem: Some(csr_pem),
            cert_pem: cert.pem(),
            ca_certificate_path: Some(ca_certificate_path),
        })
    }

    fn export_keystore(
        &self,
        issued: &IssuedCertificate,
        ca_certificate: &Path,
        password: &str,
    ) -> Result<KeystoreFiles> {
        let name = issued.name.as_str();
        export_java_keystore(&KeystoreRequest {
            alias: name,
            private_key: &issued.key_path,
            certificate: &issued.certificate_path,
            ca_certificate,
            p12_path: self.layout.p12_file(name),
            jks_path: self.layout.jks_file(name),
            password,
        })
    }
}

struct Signed {
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    key_pem: String,
    csr_pem: Option<String>,
    cert_pem: String,
    ca_certificate_path: Option<PathBuf>,
}

fn to_offset(at: DateTime<Utc>) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(at.timestamp())
        .map_err(|e| CertManagerError::InvalidInput(format!("Timestamp out of range: {e}")))
}

/// Certificate template for `descriptor`, valid from `now` for its duration in years
fn certificate_params(
    descriptor: &CertificateDescriptor,
    serial: SerialNumber,
    now: DateTime<Utc>,
) -> Result<(CertificateParams, (DateTime<Utc>, DateTime<Utc>))> {
    let not_after = now
        .checked_add_months(Months::new(descriptor.duration.saturating_mul(12)))
        .ok_or_else(|| {
            CertManagerError::InvalidInput(format!(
                "Duration of {} years is out of range",
                descriptor.duration
            ))
        })?;

    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    for (kind, value) in [
        (DnType::CountryName, &descriptor.country),
        (DnType::StateOrProvinceName, &descriptor.province),
        (DnType::LocalityName, &descriptor.locality),
        (DnType::OrganizationName, &descriptor.organization),
        (DnType::OrganizationalUnitName, &descriptor.organizational_unit),
        (DnType::CommonName, &descriptor.common_name),
    ] {
        if !value.is_empty() {
            dn.push(kind, value.as_str());
        }
    }
    params.distinguished_name = dn;

    let mut sans = Vec::new();
    for dns in &descriptor.dns_names {
        let name = Ia5String::try_from(dns.as_str()).map_err(|e| {
            CertManagerError::InvalidInput(format!("Invalid DNS name '{dns}': {e}"))
        })?;
        sans.push(SanType::DnsName(name));
    }
    sans.extend(descriptor.ip_addresses.iter().copied().map(SanType::IpAddress));
    for email in descriptor.san_emails() {
        let name = Ia5String::try_from(email).map_err(|e| {
            CertManagerError::InvalidInput(format!("Invalid email address '{email}': {e}"))
        })?;
        sans.push(SanType::Rfc822Name(name));
    }
    params.subject_alt_names = sans;

    params.not_before = to_offset(now)?;
    params.not_after = to_offset(not_after)?;
    params.serial_number = Some(rcgen::SerialNumber::from(serial.value()));
    params.key_usages = purposes_for(&descriptor.key_usage, descriptor.is_ca);
    if descriptor.is_ca {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    } else {
        params.is_ca = IsCa::ExplicitNoCa;
        params.use_authority_key_identifier_extension = true;
    }

    Ok((params, (now, not_after)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::key_usage::KeyUsage;
    use crate::storage::ledger::EntryStatus;
    use std::fs;
    use tempfile::TempDir;
    use x509_parser::pem::parse_x509_pem;

    fn ca() -> CertificateDescriptor {
        CertificateDescriptor {
            country: "CA".to_string(),
            organization: "Lab".to_string(),
            common_name: "root".to_string(),
            is_ca: true,
            duration: 10,
            certificate_name: "root".to_string(),
            ..Default::default()
        }
    }

    fn leaf(name: &str) -> CertificateDescriptor {
        CertificateDescriptor {
            country: "CA".to_string(),
            organization: "Lab".to_string(),
            common_name: format!("{name}.example"),
            duration: 1,
            key_usage: vec![KeyUsage::DigitalSignature, KeyUsage::KeyEncipherment],
            dns_names: vec![format!("{name}.example")],
            ip_addresses: vec!["10.0.0.5".parse().unwrap()],
            email_addresses: vec![format!("ops@{name}.example")],
            certificate_name: name.to_string(),
            ..Default::default()
        }
    }

    fn options() -> IssueOptions {
        IssueOptions {
            check_duplicates: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_ca_issuance_has_no_ledger_entry() {
        let tmp = TempDir::new().unwrap();
        let engine = IssuanceEngine::new(PkiLayout::under(tmp.path()));
        let issued = engine.issue(ca(), &options()).unwrap();

        let layout = engine.layout();
        assert_eq!(issued.serial, SerialNumber::new(1));
        assert_eq!(fs::read_to_string(layout.serial_file()).unwrap(), "0001\n");
        assert!(layout.cert_file("root", true).exists());
        assert!(layout.key_file("root", true).exists());
        assert!(!layout.index_file().exists());
        assert_eq!(
            fs::read_to_string(layout.index_attr_file()).unwrap(),
            "unique_subject = yes\n"
        );
        assert!(!layout.lock_file().exists());
    }

    #[test]
    fn test_leaf_issuance() {
        let tmp = TempDir::new().unwrap();
        let engine = IssuanceEngine::new(PkiLayout::under(tmp.path()));
        engine.issue(ca(), &options()).unwrap();
        let issued = engine.issue(leaf("web"), &options()).unwrap();

        assert_eq!(issued.serial.as_hex(), "0002");
        assert!(issued.csr_path.as_ref().unwrap().exists());
        let newcert = issued.newcert_path.as_ref().unwrap();
        assert_eq!(newcert, &engine.layout().newcert_file("0002"));
        assert_eq!(
            fs::read(newcert).unwrap(),
            fs::read(&issued.certificate_path).unwrap()
        );

        let pem = fs::read(&issued.certificate_path).unwrap();
        let (_, pem) = parse_x509_pem(&pem).unwrap();
        let cert = pem.parse_x509().unwrap();
        assert_eq!(cert.serial.to_string(), "2");
        assert!(!cert.is_ca());
        assert!(cert.issuer().to_string().contains("CN=root"));
        let lifetime =
            cert.validity().not_after.timestamp() - cert.validity().not_before.timestamp();
        assert!((365 * 86400..=366 * 86400).contains(&lifetime));

        let ledger = Ledger::new(
            engine.layout().index_file(),
            engine.layout().index_attr_file(),
        );
        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, EntryStatus::Valid);
        assert_eq!(entries[0].serial, "0002");
        assert_eq!(entries[0].subject, issued.subject);

        let saved = CertificateDescriptor::load(&issued.descriptor_path).unwrap();
        assert_eq!(saved.serial_number, SerialNumber::new(2));
    }

    #[test]
    fn test_duplicate_is_rejected_without_mutation() {
        let tmp = TempDir::new().unwrap();
        let engine = IssuanceEngine::new(PkiLayout::under(tmp.path()));
        engine.issue(ca(), &options()).unwrap();
        engine.issue(leaf("web"), &options()).unwrap();

        let layout = engine.layout();
        let ledger_before = fs::read(layout.index_file()).unwrap();
        let serial_before = fs::read(layout.serial_file()).unwrap();

        let mut again = leaf("web");
        again.certificate_name = "web2".to_string();
        let err = engine.issue(again, &options()).unwrap_err();
        assert!(matches!(err, CertManagerError::Duplicate(_)));

        assert_eq!(fs::read(layout.index_file()).unwrap(), ledger_before);
        assert_eq!(fs::read(layout.serial_file()).unwrap(), serial_before);
        assert!(!layout.key_file("web2", false).exists());
    }

    #[test]
    fn test_reissue_without_duplicate_check_upserts() {
        let tmp = TempDir::new().unwrap();
        let engine = IssuanceEngine::new(PkiLayout::under(tmp.path()));
        engine.issue(ca(), &options()).unwrap();
        engine.issue(leaf("web"), &options()).unwrap();

        let relaxed = IssueOptions::default();
        let issued = engine.issue(leaf("web"), &relaxed).unwrap();
        assert_eq!(issued.serial, SerialNumber::new(3));

        let ledger = Ledger::new(
            engine.layout().index_file(),
            engine.layout().index_attr_file(),
        );
        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].serial, "0003");
    }

    #[test]
    fn test_leaf_without_ca_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let engine = IssuanceEngine::new(PkiLayout::under(tmp.path()));
        let err = engine.issue(leaf("web"), &options()).unwrap_err();
        assert!(matches!(err, CertManagerError::AmbiguousCa(0)));

        let layout = engine.layout();
        assert!(!layout.key_file("web", false).exists());
        assert!(!layout.serial_file().exists());
        assert!(!layout.index_file().exists());
        assert!(!layout.lock_file().exists());
    }

    #[test]
    fn test_bad_dns_name_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let engine = IssuanceEngine::new(PkiLayout::under(tmp.path()));
        engine.issue(ca(), &options()).unwrap();

        let mut bad = leaf("web");
        bad.dns_names = vec!["bad name ü".to_string()];
        assert!(engine.issue(bad, &options()).is_err());

        let layout = engine.layout();
        assert!(!layout.key_file("web", false).exists());
        assert!(!layout.csr_file("web").exists());
        assert_eq!(fs::read_to_string(layout.serial_file()).unwrap(), "0001\n");
    }

    #[test]
    fn test_failed_reissue_keeps_existing_certificate() {
        let tmp = TempDir::new().unwrap();
        let engine = IssuanceEngine::new(PkiLayout::under(tmp.path()));
        engine.issue(ca(), &options()).unwrap();
        let first = engine.issue(leaf("web"), &options()).unwrap();

        let layout = engine.layout();
        let kept = [
            first.key_path.clone(),
            first.certificate_path.clone(),
            first.csr_path.clone().unwrap(),
            first.newcert_path.clone().unwrap(),
            first.descriptor_path.clone(),
            layout.index_file(),
            layout.serial_file(),
        ];
        let before: Vec<Vec<u8>> = kept.iter().map(|p| fs::read(p).unwrap()).collect();

        let mut bad = leaf("web");
        bad.dns_names = vec!["bad name ü".to_string()];
        let err = engine.issue(bad, &IssueOptions::default()).unwrap_err();
        assert!(matches!(err, CertManagerError::InvalidInput(_)));

        for (path, content) in kept.iter().zip(&before) {
            assert_eq!(&fs::read(path).unwrap(), content, "{} changed", path.display());
        }
        for dir in [layout.private_key_dir(), layout.csr_dir(), layout.cert_dir()] {
            let leftovers: Vec<_> = fs::read_dir(dir)
                .unwrap()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().ends_with(".pending"))
                .collect();
            assert!(leftovers.is_empty());
        }
    }

    #[test]
    fn test_corrupted_counter_never_reuses_serials() {
        let tmp = TempDir::new().unwrap();
        let engine = IssuanceEngine::new(PkiLayout::under(tmp.path()));
        engine.issue(ca(), &options()).unwrap();
        engine.issue(leaf("a"), &options()).unwrap();
        engine.issue(leaf("b"), &options()).unwrap();

        let layout = engine.layout();
        let copy_of_a = fs::read(layout.newcert_file("0002")).unwrap();
        fs::write(layout.serial_file(), "garbage").unwrap();

        let c = engine.issue(leaf("c"), &options()).unwrap();
        let d = engine.issue(leaf("d"), &options()).unwrap();
        assert_eq!(c.serial, SerialNumber::new(4));
        assert_eq!(d.serial, SerialNumber::new(5));
        assert_eq!(fs::read_to_string(layout.serial_file()).unwrap(), "0005\n");
        assert_eq!(fs::read(layout.newcert_file("0002")).unwrap(), copy_of_a);

        let ledger = Ledger::new(layout.index_file(), layout.index_attr_file());
        let mut serials: Vec<String> = ledger
            .entries()
            .unwrap()
            .into_iter()
            .map(|e| e.serial)
            .collect();
        serials.sort();
        assert_eq!(serials, vec!["0002", "0003", "0004", "0005"]);
    }

    #[test]
    fn test_empty_counter_continues_after_ca() {
        let tmp = TempDir::new().unwrap();
        let engine = IssuanceEngine::new(PkiLayout::under(tmp.path()));
        engine.issue(ca(), &options()).unwrap();
        fs::write(engine.layout().serial_file(), "").unwrap();

        // The CA serial is only recorded by its descriptor
        let issued = engine.issue(leaf("web"), &options()).unwrap();
        assert_eq!(issued.serial, SerialNumber::new(2));
    }

    #[cfg(unix)]
    #[test]
    fn test_issued_key_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let engine = IssuanceEngine::new(PkiLayout::under(tmp.path()));
        let issued = engine.issue(ca(), &options()).unwrap();
        let mode = fs::metadata(&issued.key_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_invalid_descriptor_touches_nothing() {
        let tmp = TempDir::new().unwrap();
        let engine = IssuanceEngine::new(PkiLayout::under(tmp.path()));
        let mut d = ca();
        d.duration = 0;
        assert!(matches!(
            engine.issue(d, &options()),
            Err(CertManagerError::InvalidInput(_))
        ));
        assert!(!tmp.path().join("rootCA").exists());
    }

    #[test]
    fn test_held_lock_blocks_issuance() {
        let tmp = TempDir::new().unwrap();
        let engine = IssuanceEngine::new(PkiLayout::under(tmp.path()));
        engine.layout().ensure_dirs().unwrap();
        let _held = PkiLock::acquire(&engine.layout().lock_file()).unwrap();
        assert!(matches!(
            engine.issue(ca(), &options()),
            Err(CertManagerError::Config(_))
        ));
    }
}
