//! OpenSSL-style `index.txt` database of issued certificates.
//!
//! One tab-separated line per certificate:
//! `STATUS \t EXPIRY \t SERIAL \t (reserved) \t FILENAME \t SUBJECT`.
//! Every mutation streams the whole file into a temp sibling and renames it
//! over the original, so the ledger is never observed half-written.

use crate::cert::serial::SerialNumber;
use crate::utils::errors::{CertManagerError, Result};
use crate::utils::files::{write_atomic, write_atomic_bytes};
use chrono::{DateTime, Utc};
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const ATTRIBUTE_CONTENT: &str = "unique_subject = yes\n";
const UNKNOWN_FILENAME: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Valid,
    Revoked,
    /// Never written by certmgr; only read back from indexes that
    /// `openssl ca -updatedb` has rewritten
    Expired,
}

impl EntryStatus {
    pub fn flag(&self) -> &'static str {
        match self {
            EntryStatus::Valid => "V",
            EntryStatus::Revoked => "R",
            EntryStatus::Expired => "E",
        }
    }

    fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "V" => Some(EntryStatus::Valid),
            "R" => Some(EntryStatus::Revoked),
            "E" => Some(EntryStatus::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryStatus::Valid => "valid",
            EntryStatus::Revoked => "revoked",
            EntryStatus::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// One certificate record of the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub status: EntryStatus,
    /// `YYMMDDHHMMSSZ`
    pub expiry: String,
    /// Serial as written in the file (hex)
    pub serial: String,
    pub reserved: String,
    pub filename: String,
    pub subject: String,
}

impl LedgerEntry {
    /// Fresh valid entry stamped with `issued_at`
    pub fn valid(serial: SerialNumber, subject: String, issued_at: DateTime<Utc>) -> Self {
        Self {
            status: EntryStatus::Valid,
            expiry: format_timestamp(issued_at),
            serial: serial.as_hex(),
            reserved: String::new(),
            filename: UNKNOWN_FILENAME.to_string(),
            subject,
        }
    }

    /// Parse one line. Both the six-field layout and the older five-field
    /// layout without the reserved column are accepted.
    pub fn parse(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split('\t').collect();
        let (reserved, filename) = match fields.len() {
            6 => (fields[3], fields[4]),
            5 => ("", fields[3]),
            _ => return None,
        };
        Some(Self {
            status: EntryStatus::from_flag(fields[0])?,
            expiry: fields[1].to_string(),
            serial: fields[2].to_string(),
            reserved: reserved.to_string(),
            filename: filename.to_string(),
            subject: fields[fields.len() - 1].to_string(),
        })
    }

    pub fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            self.status.flag(),
            self.expiry,
            self.serial,
            self.reserved,
            self.filename,
            self.subject
        )
    }

    pub fn serial_number(&self) -> Option<SerialNumber> {
        SerialNumber::parse(&self.serial).ok()
    }

    pub fn is_valid(&self) -> bool {
        self.status == EntryStatus::Valid
    }
}

/// `YYMMDDHHMMSSZ`, the UTCTime form used by OpenSSL index files
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%y%m%d%H%M%SZ").to_string()
}

#[derive(Debug, Clone)]
pub struct Ledger {
    index_path: PathBuf,
    attr_path: PathBuf,
}

impl Ledger {
    pub fn new(index_path: impl Into<PathBuf>, attr_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            attr_path: attr_path.into(),
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Raw lines of the ledger; a missing file has none
    fn read_lines(&self) -> Result<Option<Vec<String>>> {
        match fs::read_to_string(&self.index_path) {
            Ok(content) => Ok(Some(
                content
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All parseable entries, in file order
    pub fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let Some(lines) = self.read_lines()? else {
            return Ok(Vec::new());
        };
        let mut entries = Vec::with_capacity(lines.len());
        for line in &lines {
            match LedgerEntry::parse(line) {
                Some(entry) => entries.push(entry),
                None => tracing::warn!(
                    "Skipping malformed line in {}: {line:?}",
                    self.index_path.display()
                ),
            }
        }
        Ok(entries)
    }

    /// Whether a valid entry already carries `subject`
    pub fn is_duplicate(&self, subject: &str) -> Result<bool> {
        Ok(self
            .entries()?
            .iter()
            .any(|e| e.is_valid() && e.subject == subject))
    }

    /// Most recent entry for `subject`, whatever its status
    pub fn find(&self, subject: &str) -> Result<Option<LedgerEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.subject == subject)
            .last())
    }

    /// Highest serial recorded in the ledger
    pub fn highest_serial(&self) -> Result<Option<SerialNumber>> {
        Ok(self
            .entries()?
            .iter()
            .filter_map(LedgerEntry::serial_number)
            .max())
    }

    /// Insert `entry`, replacing any line with the same subject
    pub fn append(&self, entry: &LedgerEntry) -> Result<()> {
        let Some(lines) = self.read_lines()? else {
            write_atomic_bytes(&self.index_path, format!("{}\n", entry.to_line()).as_bytes())?;
            tracing::info!(
                "Created ledger {} with serial {}",
                self.index_path.display(),
                entry.serial
            );
            return Ok(());
        };

        let mut replaced = 0;
        write_atomic(&self.index_path, |w| {
            for line in &lines {
                let same_subject = LedgerEntry::parse(line)
                    .map(|e| e.subject == entry.subject)
                    .unwrap_or(false);
                if same_subject {
                    replaced += 1;
                    continue;
                }
                writeln!(w, "{line}")?;
            }
            writeln!(w, "{}", entry.to_line())?;
            Ok(())
        })?;

        if replaced > 0 {
            tracing::info!(
                "Replaced {replaced} ledger line(s) for {} with serial {}",
                entry.subject,
                entry.serial
            );
        } else {
            tracing::info!("Appended ledger entry with serial {}", entry.serial);
        }
        Ok(())
    }

    /// Flip the valid entry for `subject` to revoked, keeping every other
    /// field and line untouched. Returns the revoked serial.
    pub fn revoke(&self, subject: &str) -> Result<SerialNumber> {
        let not_found = || {
            CertManagerError::NotFound(format!("No valid ledger entry for subject {subject}"))
        };
        let lines = self.read_lines()?.ok_or_else(not_found)?;

        let targets: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| {
                LedgerEntry::parse(line)
                    .map(|e| e.is_valid() && e.subject == subject)
                    .unwrap_or(false)
            })
            .map(|(i, _)| i)
            .collect();

        let first = *targets.first().ok_or_else(not_found)?;
        if targets.len() > 1 {
            tracing::warn!(
                "{} valid ledger entries share subject {subject}, revoking all",
                targets.len()
            );
        }

        let serial_field = lines[first]
            .split('\t')
            .nth(2)
            .unwrap_or_default()
            .to_string();
        let serial = SerialNumber::parse(&serial_field).map_err(|e| {
            CertManagerError::Codec(format!("Ledger serial {serial_field:?} is invalid: {e}"))
        })?;

        write_atomic(&self.index_path, |w| {
            for (i, line) in lines.iter().enumerate() {
                if targets.contains(&i) {
                    let mut fields: Vec<&str> = line.split('\t').collect();
                    fields[0] = EntryStatus::Revoked.flag();
                    writeln!(w, "{}", fields.join("\t"))?;
                } else {
                    writeln!(w, "{line}")?;
                }
            }
            Ok(())
        })?;

        tracing::info!("Ledger entry {serial} revoked");
        Ok(serial)
    }

    /// Rewrite the `index.txt.attr` companion file
    pub fn write_attribute_file(&self) -> Result<()> {
        write_atomic_bytes(&self.attr_path, ATTRIBUTE_CONTENT.as_bytes())
    }
}
