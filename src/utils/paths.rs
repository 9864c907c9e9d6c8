use crate::utils::environment::Environment;
use crate::utils::errors::{CertManagerError, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub struct CertMgrPaths;
pub const PROGRAM_NAME: &str = "certmgr";

impl CertMgrPaths {
    /// Get the base data directory: ~/.local/share/certmgr/
    pub fn data_dir() -> Result<PathBuf> {
        dirs::data_local_dir()
            .map(|dir| dir.join(PROGRAM_NAME))
            .ok_or_else(|| {
                CertManagerError::Config("Cannot determine local data directory".to_string())
            })
    }

    /// Get the config directory: ~/.config/certmgr/
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(PROGRAM_NAME))
            .ok_or_else(|| {
                CertManagerError::Config("Cannot determine config directory".to_string())
            })
    }

    /// Get the default PKI root: ~/.local/share/certmgr/certificates/
    pub fn default_pki_root() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("certificates"))
    }

    /// Get the path of a named environment file: ~/.config/certmgr/<name>.json
    pub fn environment_file(name: &str) -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(with_extension(name, "json")))
    }

    /// Ensure a directory exists with proper permissions
    pub fn ensure_dir_exists(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;

            // Set restrictive permissions on PKI directories (700)
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mut perms = fs::metadata(path)?.permissions();
                perms.set_mode(0o700);
                fs::set_permissions(path, perms)?;
            }
        }
        Ok(())
    }
}

/// Append `.ext` to a name unless it already carries it
pub fn with_extension(name: &str, ext: &str) -> String {
    let suffix = format!(".{ext}");
    if name.ends_with(&suffix) {
        name.to_string()
    } else {
        format!("{name}{suffix}")
    }
}

/// Resolved on-disk layout of one PKI root.
#[derive(Debug, Clone)]
pub struct PkiLayout {
    pub root: PathBuf,
    pub ca_dir: PathBuf,
    pub server_dir: PathBuf,
    pub descriptor_dir: PathBuf,
}

impl PkiLayout {
    pub fn from_environment(env: &Environment) -> Self {
        let root = env.certificate_root_dir.clone();
        Self {
            ca_dir: root.join(&env.root_ca_dir),
            server_dir: root.join(&env.server_certs_dir),
            descriptor_dir: root.join(&env.certificates_config_dir),
            root,
        }
    }

    /// Layout with the default sub-directory names under `root`
    pub fn under(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            ca_dir: root.join("rootCA"),
            server_dir: root.join("servers"),
            descriptor_dir: root.join("conf"),
        }
    }

    pub fn serial_file(&self) -> PathBuf {
        self.ca_dir.join("serial")
    }

    pub fn index_file(&self) -> PathBuf {
        self.ca_dir.join("index.txt")
    }

    pub fn index_attr_file(&self) -> PathBuf {
        self.ca_dir.join("index.txt.attr")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.ca_dir.join(".certmgr.lock")
    }

    pub fn newcerts_dir(&self) -> PathBuf {
        self.ca_dir.join("newcerts")
    }

    pub fn newcert_file(&self, serial_hex: &str) -> PathBuf {
        self.newcerts_dir().join(format!("{serial_hex}.pem"))
    }

    pub fn private_key_dir(&self) -> PathBuf {
        self.server_dir.join("private")
    }

    pub fn csr_dir(&self) -> PathBuf {
        self.server_dir.join("csr")
    }

    pub fn cert_dir(&self) -> PathBuf {
        self.server_dir.join("certs")
    }

    pub fn java_dir(&self) -> PathBuf {
        self.server_dir.join("java")
    }

    pub fn descriptor_file(&self, name: &str) -> PathBuf {
        self.descriptor_dir.join(with_extension(name, "json"))
    }

    /// Key path: CA keys live next to the CA certificate, leaf keys under `private/`
    pub fn key_file(&self, name: &str, is_ca: bool) -> PathBuf {
        let file = format!("{name}.key");
        if is_ca {
            self.ca_dir.join(file)
        } else {
            self.private_key_dir().join(file)
        }
    }

    pub fn csr_file(&self, name: &str) -> PathBuf {
        self.csr_dir().join(format!("{name}.csr"))
    }

    /// Certificate path: CA certificates live in the CA directory, leaves under `certs/`
    pub fn cert_file(&self, name: &str, is_ca: bool) -> PathBuf {
        let file = format!("{name}.crt");
        if is_ca {
            self.ca_dir.join(file)
        } else {
            self.cert_dir().join(file)
        }
    }

    pub fn p12_file(&self, name: &str) -> PathBuf {
        self.java_dir().join(format!("{name}.p12"))
    }

    pub fn jks_file(&self, name: &str) -> PathBuf {
        self.java_dir().join(format!("{name}.jks"))
    }

    /// Ensure every directory of the layout exists
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.ca_dir.clone(),
            self.newcerts_dir(),
            self.descriptor_dir.clone(),
            self.private_key_dir(),
            self.csr_dir(),
            self.cert_dir(),
            self.java_dir(),
        ] {
            CertMgrPaths::ensure_dir_exists(&dir)?;
        }
        Ok(())
    }
}
