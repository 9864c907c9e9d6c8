use crate::cert::descriptor::CertificateDescriptor;
use crate::cert::serial::SerialNumber;
use crate::storage::ledger::Ledger;
use crate::utils::errors::{CertManagerError, Result};
use crate::utils::files::{remove_if_exists, PkiLock};
use crate::utils::paths::PkiLayout;
use std::path::PathBuf;

pub struct RevokeRequest {
    /// Descriptor name the certificate was issued under
    pub name: String,
    /// Also delete the certificate, key, request, descriptor and keystores
    pub remove_artifacts: bool,
}

#[derive(Debug)]
pub struct RevokedCertificate {
    pub name: String,
    pub serial: SerialNumber,
    pub subject: String,
    /// Files actually deleted; already-absent ones are not listed
    pub removed: Vec<PathBuf>,
}

/// Mark the ledger entry of a certificate revoked, optionally removing its
/// files. The serial counter is never touched.
pub fn revoke_certificate(layout: &PkiLayout, request: &RevokeRequest) -> Result<RevokedCertificate> {
    let descriptor_path = layout.descriptor_file(&request.name);
    let mut descriptor = CertificateDescriptor::load(&descriptor_path)?;
    // Artifacts are named after the certificate, so a renamed descriptor
    // would point the cleanup at someone else's files
    if descriptor.certificate_name != request.name {
        return Err(CertManagerError::InvalidInput(format!(
            "Descriptor {} is for certificate '{}', not '{}'",
            descriptor_path.display(),
            descriptor.certificate_name,
            request.name
        )));
    }
    descriptor.normalize_emails();
    let subject = descriptor.subject_signature();

    let _lock = PkiLock::acquire(&layout.lock_file())?;
    let ledger = Ledger::new(layout.index_file(), layout.index_attr_file());
    tracing::debug!("Revoking {subject}");
    let serial = ledger.revoke(&subject)?;

    let mut removed = Vec::new();
    if request.remove_artifacts {
        let name = request.name.as_str();
        let artifacts = [
            layout.newcert_file(&serial.as_hex()),
            layout.cert_file(name, descriptor.is_ca),
            layout.key_file(name, descriptor.is_ca),
            layout.csr_file(name),
            layout.p12_file(name),
            layout.jks_file(name),
            descriptor_path,
        ];
        for path in artifacts {
            if remove_if_exists(&path)? {
                removed.push(path);
            }
        }
    }

    tracing::info!("Certificate '{}' (serial {serial}) revoked", request.name);
    Ok(RevokedCertificate {
        name: request.name.clone(),
        serial,
        subject,
        removed,
    })
}
