pub mod authority;
pub mod descriptor;
pub mod issue;
pub mod key_usage;
pub mod keys;
pub mod listing;
pub mod recover;
pub mod revoke;
pub mod serial;
pub mod verify;

pub use authority::CaMaterial;
pub use descriptor::CertificateDescriptor;
pub use issue::{IssuanceEngine, IssueOptions, IssuedCertificate};
pub use key_usage::KeyUsage;
pub use keys::KeyAlgorithm;
pub use listing::{list_certificates, ListedCertificate};
pub use recover::{highest_issued_serial, recover_serial, SerialRecovery};
pub use revoke::{revoke_certificate, RevokeRequest, RevokedCertificate};
pub use serial::{SerialAllocator, SerialNumber};
pub use verify::CertificateReport;
