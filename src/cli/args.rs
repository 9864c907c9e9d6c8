use crate::cert::keys::KeyAlgorithm;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "certmgr")]
#[command(version = "1.0.0")]
#[command(about = "A small file-backed certificate authority for labs and internal services")]
#[command(long_about = None)]
pub struct Cli {
    /// Environment to use (stored under the user's config directory)
    #[arg(long, short = 'e', env = "CERTMGR_ENV", default_value = crate::utils::DEFAULT_ENVIRONMENT)]
    pub env: String,

    /// Enable verbose logging (repeat for more verbosity: -v INFO, -vv DEBUG, -vvv TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Output raw tab-separated values (no formatting)
    #[arg(short, long)]
    pub raw: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Certificate operations
    Cert {
        #[command(subcommand)]
        command: CertCommands,
    },
    /// Root CA maintenance
    Ca {
        #[command(subcommand)]
        command: CaCommands,
    },
    /// Environment (PKI location) management
    Env {
        #[command(subcommand)]
        command: EnvCommands,
    },
    /// Generate shell completion scripts
    Completion {
        #[command(subcommand)]
        command: CompletionCommands,
    },
    /// Internal completion helpers (hidden)
    #[command(hide = true)]
    CompletionHelper {
        #[command(subcommand)]
        command: CompletionHelperCommands,
    },
}

#[derive(Subcommand)]
pub enum CertCommands {
    /// Issue a certificate from a stored descriptor, or interactively without one
    Create {
        /// Descriptor name in the environment's config directory
        #[arg(value_hint = clap::ValueHint::Other)]
        name: Option<String>,
        /// Read the descriptor from this JSON file instead
        #[arg(long, short = 'f', conflicts_with = "name", value_hint = clap::ValueHint::FilePath)]
        file: Option<PathBuf>,
        /// Also export PKCS#12 and Java keystores (prompts for a password)
        #[arg(long)]
        java: bool,
        /// Key algorithm (defaults to the environment's setting)
        #[arg(long)]
        key_algorithm: Option<KeyAlgorithm>,
        /// Allow a subject that already has a valid certificate
        #[arg(long)]
        allow_duplicates: bool,
    },
    /// Revoke a certificate in the ledger
    Revoke {
        /// Descriptor name the certificate was issued under
        #[arg(value_hint = clap::ValueHint::Other)]
        name: String,
        /// Also delete its certificate, key, request, descriptor and keystores
        #[arg(long)]
        remove: bool,
    },
    /// List issued certificates with their ledger status
    List,
    /// Show the content of PEM certificate files
    Verify {
        /// Certificate files
        #[arg(required = true, value_hint = clap::ValueHint::FilePath)]
        files: Vec<PathBuf>,
        /// Also print the PEM data
        #[arg(long)]
        verbose: bool,
        /// Also print the comments of the matching descriptor
        #[arg(long)]
        comments: bool,
    },
    /// Write an annotated sample descriptor to the config directory
    Sample {
        /// Print to stdout instead of writing the file
        #[arg(long)]
        stdout: bool,
    },
}

#[derive(Subcommand)]
pub enum CaCommands {
    /// Rebuild the serial counter from the ledger and issued certificates
    RecoverSerial,
}

#[derive(Subcommand)]
pub enum EnvCommands {
    /// List stored environments
    List,
    /// Show the paths an environment resolves to
    Info {
        /// Environment name (defaults to --env)
        name: Option<String>,
    },
    /// Create or replace an environment
    Add {
        /// Environment name
        name: String,
        /// PKI root directory (absolute)
        #[arg(long, value_hint = clap::ValueHint::DirPath)]
        root: Option<PathBuf>,
        /// Accept subjects that already have a valid certificate
        #[arg(long)]
        allow_duplicates: bool,
        /// Key algorithm for new keys
        #[arg(long, default_value = "ecdsa-p256")]
        key_algorithm: KeyAlgorithm,
    },
    /// Delete a stored environment (the PKI files stay untouched)
    Rm {
        /// Environment name
        name: String,
    },
}

#[derive(Subcommand)]
pub enum CompletionCommands {
    /// Generate bash completion script
    Bash,
    /// Generate zsh completion script
    Zsh,
    /// Generate fish completion script
    Fish,
    /// Generate PowerShell completion script
    PowerShell,
}

impl CompletionCommands {
    pub fn shell(&self) -> Shell {
        match self {
            CompletionCommands::Bash => Shell::Bash,
            CompletionCommands::Zsh => Shell::Zsh,
            CompletionCommands::Fish => Shell::Fish,
            CompletionCommands::PowerShell => Shell::PowerShell,
        }
    }
}

#[derive(Subcommand)]
pub enum CompletionHelperCommands {
    /// List descriptor names for completion
    Certificates,
    /// List environment names for completion
    Environments,
}
