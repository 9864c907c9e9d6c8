pub mod ledger;

pub use ledger::{EntryStatus, Ledger, LedgerEntry};
