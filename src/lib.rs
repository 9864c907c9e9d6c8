pub mod cert;
pub mod cli;
pub mod storage;
pub mod utils;

// Re-export specific items to avoid conflicts
pub use cert::{
    CertificateDescriptor, IssuanceEngine, IssueOptions, IssuedCertificate, KeyAlgorithm,
    KeyUsage, SerialAllocator, SerialNumber,
};
pub use storage::{EntryStatus, Ledger, LedgerEntry};
pub use utils::{errors, paths};
