use certmgr::cert::revoke::{revoke_certificate, RevokeRequest};
use certmgr::errors::CertManagerError;
use certmgr::paths::PkiLayout;
use certmgr::{
    CertificateDescriptor, EntryStatus, IssuanceEngine, IssueOptions, KeyUsage, Ledger,
    SerialNumber,
};
use std::collections::HashSet;
use std::fs;
use tempfile::TempDir;

fn options() -> IssueOptions {
    IssueOptions {
        check_duplicates: true,
        ..Default::default()
    }
}

fn root_ca() -> CertificateDescriptor {
    CertificateDescriptor {
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
        province: "QC".to_string(),
        locality: "Montreal".to_string(),
        organization: "Lab".to_string(),
        common_name: format!("{name}.example"),
        duration: 1,
        key_usage: vec![KeyUsage::DigitalSignature],
        dns_names: vec![format!("{name}.example")],
        certificate_name: name.to_string(),
        ..Default::default()
    }
}

fn ledger(layout: &PkiLayout) -> Ledger {
    Ledger::new(layout.index_file(), layout.index_attr_file())
}

#[test]
fn fresh_root_then_leaf_then_revoke() {
    let tmp = TempDir::new().unwrap();
    let layout = PkiLayout::under(tmp.path());
    let engine = IssuanceEngine::new(layout.clone());

    // CA: serial 0001, one CA certificate, no ledger entry
    engine.issue(root_ca(), &options()).unwrap();
    assert_eq!(fs::read_to_string(layout.serial_file()).unwrap(), "0001\n");
    let ca_certs: Vec<_> = fs::read_dir(&layout.ca_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "crt"))
        .collect();
    assert_eq!(ca_certs.len(), 1);
    assert!(ledger(&layout).entries().unwrap().is_empty());

    // Leaf: request, signed certificate, newcerts copy, V line with serial 0002
    let mut descriptor = leaf("a");
    descriptor.dns_names = vec!["a.example".to_string()];
    let issued = engine.issue(descriptor, &options()).unwrap();
    assert!(layout.csr_file("a").exists());
    assert!(layout.cert_file("a", false).exists());
    assert!(layout.newcert_file("0002").exists());
    let span = issued.not_after - issued.not_before;
    assert!((365..=366).contains(&span.num_days()));

    let entries = ledger(&layout).entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, EntryStatus::Valid);
    assert_eq!(entries[0].serial, "0002");

    // Revoke with removal
    let revoked = revoke_certificate(
        &layout,
        &RevokeRequest {
            name: "a".to_string(),
            remove_artifacts: true,
        },
    )
    .unwrap();
    assert_eq!(revoked.serial, SerialNumber::new(2));
    let entries = ledger(&layout).entries().unwrap();
    assert_eq!(entries[0].status, EntryStatus::Revoked);
    for path in [
        layout.cert_file("a", false),
        layout.key_file("a", false),
        layout.csr_file("a"),
        layout.descriptor_file("a"),
    ] {
        assert!(!path.exists(), "{} still exists", path.display());
    }
    // Counter is never decremented
    assert_eq!(fs::read_to_string(layout.serial_file()).unwrap(), "0002\n");
}

#[test]
fn counter_advances_once_per_issuance() {
    let tmp = TempDir::new().unwrap();
    let layout = PkiLayout::under(tmp.path());
    let engine = IssuanceEngine::new(layout.clone());
    engine.issue(root_ca(), &options()).unwrap();

    let n = 5;
    for i in 0..n {
        engine.issue(leaf(&format!("host{i}")), &options()).unwrap();
    }
    assert_eq!(
        fs::read_to_string(layout.serial_file()).unwrap(),
        format!("{:04X}\n", 1 + n)
    );

    let serials: HashSet<String> = ledger(&layout)
        .entries()
        .unwrap()
        .into_iter()
        .map(|e| e.serial)
        .collect();
    assert_eq!(serials.len(), n);
}

#[test]
fn duplicate_subject_is_a_conflict() {
    let tmp = TempDir::new().unwrap();
    let layout = PkiLayout::under(tmp.path());
    let engine = IssuanceEngine::new(layout.clone());
    engine.issue(root_ca(), &options()).unwrap();
    engine.issue(leaf("web"), &options()).unwrap();
    let before = fs::read(layout.index_file()).unwrap();

    let err = engine.issue(leaf("web"), &options()).unwrap_err();
    assert!(matches!(err, CertManagerError::Duplicate(_)));
    assert_eq!(fs::read(layout.index_file()).unwrap(), before);
}

#[test]
fn reissue_after_revocation_keeps_one_valid_line() {
    let tmp = TempDir::new().unwrap();
    let layout = PkiLayout::under(tmp.path());
    let engine = IssuanceEngine::new(layout.clone());
    engine.issue(root_ca(), &options()).unwrap();
    engine.issue(leaf("web"), &options()).unwrap();
    revoke_certificate(
        &layout,
        &RevokeRequest {
            name: "web".to_string(),
            remove_artifacts: false,
        },
    )
    .unwrap();

    // A revoked subject no longer blocks issuance
    let issued = engine.issue(leaf("web"), &options()).unwrap();
    assert_eq!(issued.serial, SerialNumber::new(3));

    let entries = ledger(&layout).entries().unwrap();
    let valid: Vec<_> = entries.iter().filter(|e| e.is_valid()).collect();
    assert_eq!(valid.len(), 1);
    assert_eq!(valid[0].serial, "0003");
}

#[test]
fn revoking_unknown_subject_leaves_ledger_untouched() {
    let tmp = TempDir::new().unwrap();
    let layout = PkiLayout::under(tmp.path());
    let engine = IssuanceEngine::new(layout.clone());
    engine.issue(root_ca(), &options()).unwrap();
    engine.issue(leaf("web"), &options()).unwrap();
    let before = fs::read(layout.index_file()).unwrap();

    // Descriptor exists but its subject was never issued
    let mut stray = leaf("stray");
    stray.normalize_emails();
    stray.save(&layout.descriptor_file("stray")).unwrap();

    let err = revoke_certificate(
        &layout,
        &RevokeRequest {
            name: "stray".to_string(),
            remove_artifacts: true,
        },
    )
    .unwrap_err();
    assert!(matches!(err, CertManagerError::NotFound(_)));
    assert_eq!(fs::read(layout.index_file()).unwrap(), before);
    assert!(layout.descriptor_file("stray").exists());
}

#[test]
fn two_cas_make_leaf_issuance_ambiguous() {
    let tmp = TempDir::new().unwrap();
    let layout = PkiLayout::under(tmp.path());
    let engine = IssuanceEngine::new(layout.clone());
    engine.issue(root_ca(), &options()).unwrap();
    let mut second = root_ca();
    second.certificate_name = "root2".to_string();
    second.common_name = "root2".to_string();
    engine.issue(second, &options()).unwrap();

    let err = engine.issue(leaf("web"), &options()).unwrap_err();
    assert!(matches!(err, CertManagerError::AmbiguousCa(2)));
    assert_eq!(fs::read_to_string(layout.serial_file()).unwrap(), "0002\n");
}

#[test]
fn corrupted_counter_keeps_ledger_serials_distinct() {
    let tmp = TempDir::new().unwrap();
    let layout = PkiLayout::under(tmp.path());
    let engine = IssuanceEngine::new(layout.clone());
    engine.issue(root_ca(), &options()).unwrap();
    engine.issue(leaf("a"), &options()).unwrap();
    engine.issue(leaf("b"), &options()).unwrap();

    fs::write(layout.serial_file(), "garbage").unwrap();
    engine.issue(leaf("c"), &options()).unwrap();
    engine.issue(leaf("d"), &options()).unwrap();

    let entries = ledger(&layout).entries().unwrap();
    let serials: HashSet<String> = entries.iter().map(|e| e.serial.clone()).collect();
    assert_eq!(entries.len(), 4);
    assert_eq!(serials.len(), 4);
}
