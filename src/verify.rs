//! Detached signature verification.

use crate::runner::{CommandRunner, CommandSpec, RunError};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("Signature check could not be run: {0}")]
    Run(#[from] RunError),
}

/// Result of checking one (content, signature) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub valid: bool,
    /// Text output of the checker, used to tell the user who signed.
    pub report: String,
}

impl Verification {
    /// The `Good signature from ...` line of the report, if any.
    pub fn signer(&self) -> Option<&str> {
        self.report
            .lines()
            .map(str::trim)
            .find(|line| line.contains("Good signature from"))
    }
}

pub trait SignatureVerifier {
    fn verify(&self, content: &Path, signature: &Path) -> Result<Verification, VerifyError>;
}

/// Checks signatures with `gpgv` against a fixed keyring.
///
/// `--ignore-time-conflict` is always passed: a signature made on a host
/// whose clock is ahead of ours must still verify.
pub struct GpgvVerifier<'a> {
    runner: &'a dyn CommandRunner,
    gpgv: PathBuf,
    keyring: PathBuf,
}

impl<'a> GpgvVerifier<'a> {
    pub fn new(runner: &'a dyn CommandRunner, gpgv: PathBuf, keyring: PathBuf) -> Self {
        GpgvVerifier {
            runner,
            gpgv,
            keyring,
        }
    }

    fn command(&self, content: &Path, signature: &Path) -> CommandSpec {
        CommandSpec::new(&self.gpgv)
            .arg("--ignore-time-conflict")
            .arg("--keyring")
            .arg(self.keyring.as_os_str())
            .arg(signature.as_os_str())
            .arg(content.as_os_str())
    }
}

impl SignatureVerifier for GpgvVerifier<'_> {
    fn verify(&self, content: &Path, signature: &Path) -> Result<Verification, VerifyError> {
        debug!(
            "Verifying {} against {}",
            content.display(),
            signature.display()
        );

        let output = self.runner.run(&self.command(content, signature))?;
        let verification = Verification {
            valid: output.success(),
            report: output.text(),
        };

        if verification.valid {
            info!("Signature of {} is valid", content.display());
        } else {
            warn!(
                "Bad or missing signature for {} (exit code {})",
                content.display(),
                output.exit_code
            );
        }

        Ok(verification)
    }
}
