use crate::utils::errors::{CertManagerError, Result};
use crate::utils::files::{remove_if_exists, set_secure_file_permissions};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Environment variable the store password is handed over in, so it never
/// shows up in the process list.
const PASSWORD_ENV: &str = "CERTMGR_KEYSTORE_PASSWORD";

/// Inputs of a legacy keystore export
pub struct KeystoreRequest<'a> {
    pub alias: &'a str,
    pub private_key: &'a Path,
    pub certificate: &'a Path,
    pub ca_certificate: &'a Path,
    pub p12_path: PathBuf,
    pub jks_path: PathBuf,
    pub password: &'a str,
}

/// Files produced by a successful export
#[derive(Debug, Clone, PartialEq)]
pub struct KeystoreFiles {
    pub p12: PathBuf,
    pub jks: PathBuf,
}

fn locate_tool(name: &str) -> Result<PathBuf> {
    which::which(name)
        .map_err(|e| CertManagerError::Keystore(format!("'{name}' not found in PATH: {e}")))
}

fn run(mut command: Command, password: &str) -> Result<()> {
    let program = command.get_program().to_string_lossy().into_owned();
    let output = command
        .env(PASSWORD_ENV, password)
        .output()
        .map_err(|e| CertManagerError::Keystore(format!("Failed to run {program}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CertManagerError::Keystore(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

/// Bundle key, certificate and CA into a PKCS#12 file with `openssl`, then
/// convert it to a JKS store with `keytool`. Both stores share one password.
pub fn export_java_keystore(request: &KeystoreRequest) -> Result<KeystoreFiles> {
    let openssl = locate_tool("openssl")?;
    let keytool = locate_tool("keytool")?;

    // keytool refuses to import into an existing store with another password
    remove_if_exists(&request.p12_path)?;
    remove_if_exists(&request.jks_path)?;

    let pass_out = format!("env:{PASSWORD_ENV}");
    let mut pkcs12 = Command::new(openssl);
    pkcs12
        .args(["pkcs12", "-export", "-name", request.alias])
        .arg("-out")
        .arg(&request.p12_path)
        .arg("-inkey")
        .arg(request.private_key)
        .arg("-in")
        .arg(request.certificate)
        .arg("-certfile")
        .arg(request.ca_certificate)
        .args(["-passout", pass_out.as_str()]);
    run(pkcs12, request.password)?;
    set_secure_file_permissions(&request.p12_path)?;
    tracing::info!("PKCS#12 bundle written to {}", request.p12_path.display());

    let mut import = Command::new(keytool);
    import
        .args(["-importkeystore", "-noprompt", "-srckeystore"])
        .arg(&request.p12_path)
        .args(["-srcstoretype", "PKCS12", "-srcstorepass:env", PASSWORD_ENV])
        .arg("-destkeystore")
        .arg(&request.jks_path)
        .args(["-deststoretype", "JKS", "-deststorepass:env", PASSWORD_ENV]);
    run(import, request.password)?;
    set_secure_file_permissions(&request.jks_path)?;
    tracing::info!("Java keystore written to {}", request.jks_path.display());

    Ok(KeystoreFiles {
        p12: request.p12_path.clone(),
        jks: request.jks_path.clone(),
    })
}
