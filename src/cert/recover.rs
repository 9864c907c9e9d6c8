use crate::cert::listing::load_descriptors;
use crate::cert::serial::{SerialAllocator, SerialNumber};
use crate::storage::ledger::Ledger;
use crate::utils::errors::Result;
use crate::utils::files::PkiLock;
use crate::utils::paths::PkiLayout;
use std::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialRecovery {
    /// Counter value before recovery
    pub stored: SerialNumber,
    /// Highest serial found in the ledger, `newcerts/` or the descriptors
    pub highest_issued: SerialNumber,
    /// Counter value after recovery
    pub counter: SerialNumber,
}

impl SerialRecovery {
    pub fn changed(&self) -> bool {
        self.counter != self.stored
    }
}

/// Highest serial named by a `newcerts/<HEX>.pem` file
fn highest_newcert(layout: &PkiLayout) -> Result<Option<SerialNumber>> {
    let dir = layout.newcerts_dir();
    if !dir.exists() {
        return Ok(None);
    }
    let mut highest = None;
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pem") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match SerialNumber::parse(stem) {
            Ok(serial) => highest = highest.max(Some(serial)),
            Err(e) => tracing::debug!("Ignoring {}: {e}", path.display()),
        }
    }
    Ok(highest)
}

/// Highest serial recorded by the ledger, a `newcerts/` file or a stored
/// descriptor. Zero when nothing was issued yet.
pub fn highest_issued_serial(layout: &PkiLayout) -> Result<SerialNumber> {
    let ledger = Ledger::new(layout.index_file(), layout.index_attr_file());
    let from_descriptors = load_descriptors(layout)?
        .iter()
        .map(|d| d.serial_number)
        .max();
    Ok([
        ledger.highest_serial()?,
        highest_newcert(layout)?,
        from_descriptors,
    ]
    .into_iter()
    .flatten()
    .max()
    .unwrap_or_default())
}

/// Rebuild the serial counter from everything that records an issued serial.
/// The counter only ever moves forward.
pub fn recover_serial(layout: &PkiLayout) -> Result<SerialRecovery> {
    layout.ensure_dirs()?;
    let _lock = PkiLock::acquire(&layout.lock_file())?;
    let serials = SerialAllocator::new(layout.serial_file());

    let stored = serials.current()?;
    let highest_issued = highest_issued_serial(layout)?;
    let counter = serials.recover(highest_issued)?;
    tracing::info!("Serial counter at {counter} (highest issued {highest_issued})");
    Ok(SerialRecovery {
        stored,
        highest_issued,
        counter,
    })
}
