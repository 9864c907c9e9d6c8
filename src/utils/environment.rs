use crate::cert::keys::KeyAlgorithm;
use crate::utils::errors::{CertManagerError, Result};
use crate::utils::paths::{with_extension, CertMgrPaths};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_ENVIRONMENT: &str = "defaultEnv";

/// Per-user description of where a PKI lives and how it behaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(rename = "CertificateRootDir")]
    pub certificate_root_dir: PathBuf,
    #[serde(rename = "RootCAdir")]
    pub root_ca_dir: String,
    #[serde(rename = "ServerCertsDir")]
    pub server_certs_dir: String,
    #[serde(rename = "CertificatesConfigDir")]
    pub certificates_config_dir: String,
    /// Reject a new certificate whose subject is already valid in the ledger
    #[serde(rename = "RemoveDuplicates", default = "default_true")]
    pub remove_duplicates: bool,
    #[serde(rename = "KeyAlgorithm", default)]
    pub key_algorithm: KeyAlgorithm,
}

fn default_true() -> bool {
    true
}

impl Environment {
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            certificate_root_dir: root,
            root_ca_dir: "rootCA".to_string(),
            server_certs_dir: "servers".to_string(),
            certificates_config_dir: "conf".to_string(),
            remove_duplicates: true,
            key_algorithm: KeyAlgorithm::default(),
        }
    }

    pub fn default_for_user() -> Result<Self> {
        Ok(Self::with_root(CertMgrPaths::default_pki_root()?))
    }

    /// Load a named environment from the user's config directory.
    /// A missing file yields the built-in defaults.
    pub fn load(name: &str) -> Result<Self> {
        let path = CertMgrPaths::environment_file(name)?;
        if !path.exists() {
            tracing::debug!(
                "Environment file {} not found, using defaults",
                path.display()
            );
            return Self::default_for_user();
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| {
            CertManagerError::Config(format!(
                "Cannot read environment file {}: {e}",
                path.display()
            ))
        })?;
        let env: Environment = serde_json::from_str(&data)?;
        if !env.certificate_root_dir.is_absolute() {
            return Err(CertManagerError::Config(format!(
                "CertificateRootDir must be an absolute path, got {}",
                env.certificate_root_dir.display()
            )));
        }
        Ok(env)
    }

    pub fn save(&self, name: &str) -> Result<PathBuf> {
        let dir = CertMgrPaths::config_dir()?;
        CertMgrPaths::ensure_dir_exists(&dir)?;
        let path = dir.join(with_extension(name, "json"));
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        crate::utils::set_secure_file_permissions(path)?;
        Ok(())
    }

    /// Names of every environment stored in the user's config directory
    pub fn list() -> Result<Vec<String>> {
        let dir = CertMgrPaths::config_dir()?;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // Only files that actually parse as environments
            if Self::load_from(&path).is_ok() {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn remove(name: &str) -> Result<()> {
        let path = CertMgrPaths::environment_file(name)?;
        if !path.exists() {
            return Err(CertManagerError::NotFound(format!(
                "Environment {name} does not exist"
            )));
        }
        fs::remove_file(&path)?;
        tracing::info!("Removed environment file {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_environment_round_trip() {
        let tmp = TempDir::new().unwrap();
        let mut env = Environment::with_root(tmp.path().join("pki"));
        env.remove_duplicates = false;
        env.key_algorithm = KeyAlgorithm::EcdsaP384;

        let path = tmp.path().join("lab.json");
        env.save_to(&path).unwrap();
        let loaded = Environment::load_from(&path).unwrap();
        assert_eq!(loaded, env);
    }

    #[test]
    fn test_environment_reads_legacy_fields() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("legacy.json");
        let json = format!(
            r#"{{
  "CertificateRootDir": "{}",
  "RootCAdir": "rootCA",
  "ServerCertsDir": "servers",
  "CertificatesConfigDir": "conf"
}}"#,
            tmp.path().display()
        );
        fs::write(&path, json).unwrap();

        let env = Environment::load_from(&path).unwrap();
        assert!(env.remove_duplicates);
        assert_eq!(env.key_algorithm, KeyAlgorithm::EcdsaP256);
        assert_eq!(env.root_ca_dir, "rootCA");
    }

    #[test]
    fn test_relative_root_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.json");
        let env = Environment::with_root(PathBuf::from("relative/pki"));
        env.save_to(&path).unwrap();
        assert!(matches!(
            Environment::load_from(&path),
            Err(CertManagerError::Config(_))
        ));
    }
}
