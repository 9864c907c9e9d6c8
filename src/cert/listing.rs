use crate::cert::descriptor::CertificateDescriptor;
use crate::cert::serial::SerialNumber;
use crate::storage::ledger::{EntryStatus, Ledger};
use crate::utils::errors::Result;
use crate::utils::paths::PkiLayout;
use std::fs;
use std::path::PathBuf;

/// A stored descriptor joined with its ledger state
#[derive(Debug, Clone)]
pub struct ListedCertificate {
    pub name: String,
    pub common_name: String,
    pub is_ca: bool,
    pub serial: SerialNumber,
    /// None for CAs and for descriptors the ledger does not know
    pub status: Option<EntryStatus>,
    pub issued_at: Option<String>,
}

impl ListedCertificate {
    pub fn status_label(&self) -> String {
        match (self.is_ca, self.status) {
            (true, _) => "ca".to_string(),
            (false, Some(status)) => status.to_string(),
            (false, None) => "unknown".to_string(),
        }
    }

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.serial.to_string(),
            self.status_label(),
            self.name.clone(),
            self.common_name.clone(),
            self.issued_at.clone().unwrap_or_else(|| "-".to_string()),
        ]
    }
}

pub const LIST_HEADER: [&str; 5] = ["SERIAL", "STATUS", "NAME", "CN", "ISSUED"];

fn descriptor_files(layout: &PkiLayout) -> Result<Vec<PathBuf>> {
    if !layout.descriptor_dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(&layout.descriptor_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            files.push(path);
        }
    }
    Ok(files)
}

/// Every readable descriptor of the store; malformed files are skipped with a warning
pub fn load_descriptors(layout: &PkiLayout) -> Result<Vec<CertificateDescriptor>> {
    let mut descriptors = Vec::new();
    for path in descriptor_files(layout)? {
        match CertificateDescriptor::load(&path) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(e) => tracing::warn!("Skipping {}: {e}", path.display()),
        }
    }
    Ok(descriptors)
}

/// Descriptors of the store with their ledger status, ordered by serial
pub fn list_certificates(layout: &PkiLayout) -> Result<Vec<ListedCertificate>> {
    let ledger = Ledger::new(layout.index_file(), layout.index_attr_file());
    let entries = ledger.entries()?;

    let mut listed: Vec<ListedCertificate> = load_descriptors(layout)?
        .into_iter()
        .map(|mut descriptor| {
            descriptor.normalize_emails();
            let subject = descriptor.subject_signature();
            let entry = entries.iter().filter(|e| e.subject == subject).last();
            ListedCertificate {
                status: entry.map(|e| e.status),
                issued_at: entry.map(|e| e.expiry.clone()),
                serial: descriptor.serial_number,
                is_ca: descriptor.is_ca,
                common_name: descriptor.common_name,
                name: descriptor.certificate_name,
            }
        })
        .collect();

    listed.sort_by(|a, b| a.serial.cmp(&b.serial).then_with(|| a.name.cmp(&b.name)));
    Ok(listed)
}
