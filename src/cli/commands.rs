use crate::cert::descriptor::CertificateDescriptor;
use crate::cert::issue::{IssuanceEngine, IssueOptions, IssuedCertificate};
use crate::cert::listing::{list_certificates, LIST_HEADER};
use crate::cert::recover::recover_serial;
use crate::cert::revoke::{revoke_certificate, RevokeRequest};
use crate::cert::verify::CertificateReport;
use crate::cli::args::*;
use crate::cli::completions::{handle_completion_command, handle_completion_helper_command};
use crate::utils::environment::Environment;
use crate::utils::errors::{CertManagerError, Result};
use crate::utils::output::OutputFormat;
use crate::utils::paths::{CertMgrPaths, PkiLayout};
use crate::utils::prompt::{read_keystore_password, Prompter};
use std::io;
use std::path::Path;

pub fn handle_command(cli: Cli) -> Result<()> {
    // Initialize logging - always to stderr
    if !cli.quiet {
        let log_level = match cli.verbose {
            0 => "certmgr=warn",  // Default: warnings only
            1 => "certmgr=info",  // -v: info level
            2 => "certmgr=debug", // -vv: debug level
            _ => "certmgr=trace", // -vvv+: trace level
        };

        tracing_subscriber::fmt()
            .with_writer(io::stderr)
            .with_env_filter(log_level)
            .init();
    }

    let output = OutputFormat::new(cli.raw);

    match cli.command {
        Commands::Cert { command } => handle_cert_command(command, &cli.env, &output),
        Commands::Ca { command } => handle_ca_command(command, &cli.env),
        Commands::Env { command } => handle_env_command(command, &cli.env, &output),
        Commands::Completion { ref command } => handle_completion_command(command),
        Commands::CompletionHelper { ref command } => {
            handle_completion_helper_command(command, &cli.env, &output)
        }
    }
}

fn load_layout(env_name: &str) -> Result<(Environment, PkiLayout)> {
    let env = Environment::load(env_name)?;
    let layout = PkiLayout::from_environment(&env);
    tracing::debug!("Using PKI root {}", layout.root.display());
    Ok((env, layout))
}

fn handle_cert_command(command: CertCommands, env_name: &str, output: &OutputFormat) -> Result<()> {
    match command {
        CertCommands::Create {
            name,
            file,
            java,
            key_algorithm,
            allow_duplicates,
        } => {
            let (env, layout) = load_layout(env_name)?;
            let descriptor = match (name, file) {
                (Some(name), _) => CertificateDescriptor::load(&layout.descriptor_file(&name))?,
                (None, Some(path)) => CertificateDescriptor::load(&path)?,
                (None, None) => Prompter::stdio().collect_descriptor()?,
            };

            let java_password = if java && descriptor.is_ca {
                eprintln!("Keystore export only applies to leaf certificates, skipping it");
                None
            } else if java {
                Some(read_keystore_password()?)
            } else {
                None
            };

            let options = IssueOptions {
                check_duplicates: env.remove_duplicates && !allow_duplicates,
                key_algorithm: key_algorithm.unwrap_or(env.key_algorithm),
                java_password,
            };
            let issued = IssuanceEngine::new(layout).issue(descriptor, &options)?;
            report_issued(&issued, output);
            Ok(())
        }
        CertCommands::Revoke { name, remove } => {
            let (_, layout) = load_layout(env_name)?;
            let revoked = revoke_certificate(
                &layout,
                &RevokeRequest {
                    name,
                    remove_artifacts: remove,
                },
            )?;
            eprintln!(
                "✓ Certificate '{}' revoked (serial {})",
                revoked.name, revoked.serial
            );
            for path in &revoked.removed {
                eprintln!("  removed {}", path.display());
            }
            Ok(())
        }
        CertCommands::List => {
            let (_, layout) = load_layout(env_name)?;
            let rows: Vec<Vec<String>> = list_certificates(&layout)?
                .iter()
                .map(|c| c.to_row())
                .collect();
            output.print_table_with_header(&LIST_HEADER, &rows);
            Ok(())
        }
        CertCommands::Verify {
            files,
            verbose,
            comments,
        } => {
            let layout = if comments {
                Some(load_layout(env_name)?.1)
            } else {
                None
            };
            for (i, path) in files.iter().enumerate() {
                if files.len() > 1 {
                    if i > 0 {
                        println!();
                    }
                    println!("== {} ==", path.display());
                }
                let report = CertificateReport::from_file(path)?;
                output.print_key_value(&report.summary());
                if let Some(layout) = &layout {
                    print_comments(layout, path);
                }
                if verbose {
                    println!("{}", report.pem);
                }
            }
            Ok(())
        }
        CertCommands::Sample { stdout } => {
            let sample = CertificateDescriptor::sample();
            if stdout {
                println!("{}", serde_json::to_string_pretty(&sample)?);
                return Ok(());
            }
            let (_, layout) = load_layout(env_name)?;
            CertMgrPaths::ensure_dir_exists(&layout.descriptor_dir)?;
            let path = layout.descriptor_file(&sample.certificate_name);
            sample.save(&path)?;
            eprintln!("✓ Sample descriptor written to {}", path.display());
            Ok(())
        }
    }
}

fn report_issued(issued: &IssuedCertificate, output: &OutputFormat) {
    eprintln!(
        "✓ {} '{}' issued with serial {}",
        if issued.is_ca { "CA certificate" } else { "Certificate" },
        issued.name,
        issued.serial
    );

    let mut pairs = vec![
        ("Subject", issued.subject.clone()),
        ("Valid until", issued.not_after.to_rfc3339()),
        ("Certificate", issued.certificate_path.display().to_string()),
        ("Private key", issued.key_path.display().to_string()),
    ];
    if let Some(csr) = &issued.csr_path {
        pairs.push(("Request", csr.display().to_string()));
    }
    if let Some(copy) = &issued.newcert_path {
        pairs.push(("CA copy", copy.display().to_string()));
    }
    pairs.push(("Descriptor", issued.descriptor_path.display().to_string()));
    output.print_key_value(&pairs);

    match &issued.keystore {
        Some(Ok(files)) => {
            eprintln!("✓ PKCS#12 bundle: {}", files.p12.display());
            eprintln!("✓ Java keystore: {}", files.jks.display());
        }
        Some(Err(e)) => eprintln!("✗ Keystore export failed, certificate kept: {e}"),
        None => {}
    }
}

/// Comments of the descriptor named like the certificate file
fn print_comments(layout: &PkiLayout, cert_path: &Path) {
    let Some(stem) = cert_path.file_stem().and_then(|s| s.to_str()) else {
        return;
    };
    match CertificateDescriptor::load(&layout.descriptor_file(stem)) {
        Ok(descriptor) if descriptor.comments.is_empty() => println!("Comments: -"),
        Ok(descriptor) => {
            println!("Comments:");
            for comment in &descriptor.comments {
                println!("  {comment}");
            }
        }
        Err(e) => eprintln!("No comments available: {e}"),
    }
}

fn handle_ca_command(command: CaCommands, env_name: &str) -> Result<()> {
    match command {
        CaCommands::RecoverSerial => {
            let (_, layout) = load_layout(env_name)?;
            let recovery = recover_serial(&layout)?;
            if recovery.changed() {
                eprintln!(
                    "✓ Serial counter moved from {} to {}",
                    recovery.stored, recovery.counter
                );
            } else {
                eprintln!(
                    "Serial counter {} is already at or past the highest issued serial {}",
                    recovery.counter, recovery.highest_issued
                );
            }
            Ok(())
        }
    }
}

fn handle_env_command(command: EnvCommands, env_name: &str, output: &OutputFormat) -> Result<()> {
    match command {
        EnvCommands::List => {
            let names = Environment::list()?;
            if names.is_empty() {
                eprintln!("No stored environments; '{env_name}' uses built-in defaults");
            }
            output.print_list(&names);
            Ok(())
        }
        EnvCommands::Info { name } => {
            let name = name.as_deref().unwrap_or(env_name);
            let env = Environment::load(name)?;
            let layout = PkiLayout::from_environment(&env);
            let file = CertMgrPaths::environment_file(name)?;
            let stored = if file.exists() {
                file.display().to_string()
            } else {
                format!("{} (not stored, defaults)", file.display())
            };
            let pairs = vec![
                ("Environment", name.to_string()),
                ("File", stored),
                ("PKI root", layout.root.display().to_string()),
                ("CA directory", layout.ca_dir.display().to_string()),
                ("Server directory", layout.server_dir.display().to_string()),
                ("Descriptors", layout.descriptor_dir.display().to_string()),
                ("Serial file", layout.serial_file().display().to_string()),
                ("Ledger", layout.index_file().display().to_string()),
                ("Reject duplicates", env.remove_duplicates.to_string()),
                ("Key algorithm", env.key_algorithm.as_str().to_string()),
            ];
            output.print_key_value(&pairs);
            Ok(())
        }
        EnvCommands::Add {
            name,
            root,
            allow_duplicates,
            key_algorithm,
        } => {
            let root = match root {
                Some(root) => root,
                None => CertMgrPaths::default_pki_root()?,
            };
            if !root.is_absolute() {
                return Err(CertManagerError::Config(format!(
                    "PKI root must be an absolute path, got {}",
                    root.display()
                )));
            }
            let mut env = Environment::with_root(root);
            env.remove_duplicates = !allow_duplicates;
            env.key_algorithm = key_algorithm;
            let path = env.save(&name)?;
            eprintln!("✓ Environment '{name}' saved to {}", path.display());
            Ok(())
        }
        EnvCommands::Rm { name } => {
            Environment::remove(&name)?;
            eprintln!("✓ Environment '{name}' removed");
            Ok(())
        }
    }
}
