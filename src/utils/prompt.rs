use crate::cert::descriptor::CertificateDescriptor;
use crate::cert::key_usage::KeyUsage;
use crate::utils::errors::{CertManagerError, Result};
use std::io::{self, BufRead, Write};
use std::net::IpAddr;

/// Line-oriented questions on an input/output pair. Multi-value answers
/// end with an empty line.
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl Prompter<io::StdinLock<'static>, io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(CertManagerError::InvalidInput(
                "Unexpected end of input".to_string(),
            ));
        }
        Ok(line.trim().to_string())
    }

    pub fn ask(&mut self, label: &str, default: Option<&str>) -> Result<String> {
        match default {
            Some(default) => write!(self.output, "{label} [{default}]: ")?,
            None => write!(self.output, "{label}: ")?,
        }
        self.output.flush()?;
        let answer = self.read_line()?;
        if answer.is_empty() {
            return Ok(default.unwrap_or_default().to_string());
        }
        Ok(answer)
    }

    /// Ask until a non-empty answer is given
    pub fn ask_required(&mut self, label: &str) -> Result<String> {
        loop {
            let answer = self.ask(label, None)?;
            if !answer.is_empty() {
                return Ok(answer);
            }
            writeln!(self.output, "{label} is required")?;
        }
    }

    pub fn ask_list(&mut self, label: &str) -> Result<Vec<String>> {
        writeln!(self.output, "{label} (one per line, empty line to finish):")?;
        let mut items = Vec::new();
        loop {
            write!(self.output, "> ")?;
            self.output.flush()?;
            let line = self.read_line()?;
            if line.is_empty() {
                return Ok(items);
            }
            items.push(line);
        }
    }

    pub fn ask_bool(&mut self, label: &str, default: bool) -> Result<bool> {
        let hint = if default { "Y/n" } else { "y/N" };
        loop {
            let answer = self.ask(label, Some(hint))?;
            if answer == hint {
                return Ok(default);
            }
            match answer.to_lowercase().as_str() {
                "y" | "yes" | "true" => return Ok(true),
                "n" | "no" | "false" => return Ok(false),
                _ => writeln!(self.output, "Please answer yes or no")?,
            }
        }
    }

    /// Ask for values accepted by `parse`, repeating the question on bad input
    fn ask_parsed_list<T, E: std::fmt::Display>(
        &mut self,
        label: &str,
        parse: impl Fn(&str) -> std::result::Result<T, E>,
    ) -> Result<Vec<T>> {
        loop {
            let raw = self.ask_list(label)?;
            let parsed: std::result::Result<Vec<T>, E> = raw.iter().map(|s| parse(s)).collect();
            match parsed {
                Ok(values) => return Ok(values),
                Err(e) => writeln!(self.output, "{e}; please enter the list again")?,
            }
        }
    }

    /// Collect a full descriptor field by field
    pub fn collect_descriptor(&mut self) -> Result<CertificateDescriptor> {
        let certificate_name = self.ask_required("Certificate name (file base name)")?;
        let country = self.ask("Country (2 letters)", None)?;
        let province = self.ask("State or province", None)?;
        let locality = self.ask("Locality", None)?;
        let organization = self.ask("Organization", None)?;
        let organizational_unit = self.ask("Organizational unit", None)?;
        let common_name = self.ask_required("Common name")?;
        let is_ca = self.ask_bool("Is this a CA certificate", false)?;
        let email_addresses = self.ask_list("Email addresses")?;

        let duration = loop {
            let answer = self.ask("Duration in years", Some(if is_ca { "10" } else { "1" }))?;
            match answer.parse::<u32>() {
                Ok(years) if years > 0 => break years,
                _ => writeln!(self.output, "Duration must be a positive number of years")?,
            }
        };

        let key_usage = self.ask_parsed_list("Key usages", |s| s.parse::<KeyUsage>())?;
        let dns_names = self.ask_list("DNS names")?;
        let ip_addresses = self.ask_parsed_list("IP addresses", |s| s.parse::<IpAddr>())?;
        let comments = self.ask_list("Comments")?;

        Ok(CertificateDescriptor {
            country,
            province,
            locality,
            organization,
            organizational_unit,
            common_name,
            is_ca,
            email_addresses,
            duration,
            key_usage,
            dns_names,
            ip_addresses,
            certificate_name,
            comments,
            ..Default::default()
        })
    }
}

/// Read the keystore password twice from the terminal
pub fn read_keystore_password() -> Result<String> {
    let password = rpassword::prompt_password("Keystore password: ")?;
    if password.is_empty() {
        return Err(CertManagerError::InvalidInput(
            "Keystore password may not be empty".to_string(),
        ));
    }
    let confirm = rpassword::prompt_password("Confirm keystore password: ")?;
    if password != confirm {
        return Err(CertManagerError::InvalidInput(
            "Passwords do not match".to_string(),
        ));
    }
    Ok(password)
}
