use crate::utils::errors::{CertManagerError, Result};
use crate::utils::files::write_atomic_bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Certificate serial number as allocated by this CA.
///
/// Rendered as uppercase hex, zero-padded to at least four digits (`0001`),
/// which is the form used by the `serial` file, the ledger and `newcerts/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SerialNumber(u64);

#[derive(Error, Debug, PartialEq)]
pub enum SerialNumberParseError {
    #[error("Invalid hex character: {0}")]
    InvalidHexCharacter(char),

    #[error("Empty string provided")]
    EmptyString,

    #[error("Serial number does not fit in 64 bits")]
    Overflow,
}

impl SerialNumber {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Parse a hex serial, with or without colons
    pub fn parse(identifier: &str) -> std::result::Result<Self, SerialNumberParseError> {
        let cleaned = identifier.trim().replace(':', "");
        if cleaned.is_empty() {
            return Err(SerialNumberParseError::EmptyString);
        }

        if let Some(ch) = cleaned.chars().find(|ch| !ch.is_ascii_hexdigit()) {
            return Err(SerialNumberParseError::InvalidHexCharacter(ch));
        }

        u64::from_str_radix(&cleaned, 16)
            .map(Self)
            .map_err(|_| SerialNumberParseError::Overflow)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// The serial that follows this one
    pub fn next(&self) -> Result<Self> {
        self.0
            .checked_add(1)
            .map(Self)
            .ok_or_else(|| CertManagerError::InvalidInput("Serial counter exhausted".to_string()))
    }

    /// Uppercase, zero-padded hex (e.g. "002A")
    pub fn as_hex(&self) -> String {
        format!("{:04X}", self.0)
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

impl From<u64> for SerialNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for SerialNumber {
    type Err = SerialNumberParseError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// Descriptors store the serial as a plain integer
impl Serialize for SerialNumber {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for SerialNumber {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Self)
    }
}

/// Reads and commits the CA's monotonically increasing serial counter.
#[derive(Debug, Clone)]
pub struct SerialAllocator {
    path: PathBuf,
}

impl SerialAllocator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current counter value.
    ///
    /// A missing file means nothing was issued yet. An empty or unparsable
    /// file also reads as zero; `recover` can rebuild it from the ledger.
    pub fn current(&self) -> Result<SerialNumber> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("No serial file at {}, starting at 0", self.path.display());
                return Ok(SerialNumber::default());
            }
            Err(e) => return Err(e.into()),
        };

        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(SerialNumber::default());
        }

        match SerialNumber::parse(trimmed) {
            Ok(serial) => Ok(serial),
            Err(e) => {
                tracing::warn!(
                    "Serial file {} is unreadable ({e}), treating it as 0",
                    self.path.display()
                );
                Ok(SerialNumber::default())
            }
        }
    }

    /// Serial to assign to the next certificate; nothing is written
    pub fn peek_next(&self) -> Result<SerialNumber> {
        self.current()?.next()
    }

    /// Persist `serial` as the counter value
    pub fn commit(&self, serial: SerialNumber) -> Result<()> {
        write_atomic_bytes(&self.path, format!("{}\n", serial.as_hex()).as_bytes())?;
        tracing::info!("Serial counter committed at {serial}");
        Ok(())
    }

    /// Raise the counter to `highest_issued` when it lags behind.
    /// Returns the counter value after recovery.
    pub fn recover(&self, highest_issued: SerialNumber) -> Result<SerialNumber> {
        let current = self.current()?;
        if highest_issued > current {
            tracing::warn!("Serial counter {current} lags behind issued serial {highest_issued}");
            self.commit(highest_issued)?;
            return Ok(highest_issued);
        }
        Ok(current)
    }
}
