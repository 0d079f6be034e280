use secrecy::ExposeSecret;
use std::io;
use std::path::PathBuf;

use super::prompt::{UpPrompt, account_creation_prompt, account_login_prompt};
use super::HostCallbacks;

/// Passphrase can be supplied non-interactively for headless setups.
pub const PASSPHRASE_ENV: &str = "VFIDO_PASSPHRASE";

const APPROVAL_TIMEOUT_SECS: u16 = 30;

/// Host callbacks for the command-line deployment: approval and passphrase
/// prompts via pinentry, sealed state in a single file.
pub struct CliHost {
    state_path: PathBuf,
    pinentry_bin: String,
}

impl CliHost {
    pub fn new(state_path: PathBuf, pinentry_bin: String) -> Self {
        Self { state_path, pinentry_bin }
    }

    fn confirm(&self, prompt: &UpPrompt) -> bool {
        let Some(mut dialog) = pinentry::ConfirmationDialog::with_binary(&self.pinentry_bin)
        else {
            tracing::error!(bin = %self.pinentry_bin, "pinentry binary not found, denying");
            return false;
        };
        match dialog
            .with_ok("Confirm")
            .with_cancel("Deny")
            .with_timeout(APPROVAL_TIMEOUT_SECS)
            .confirm(&prompt.description)
        {
            Ok(confirmed) => confirmed,
            Err(e) => {
                tracing::debug!("approval dialog dismissed: {e}");
                false
            }
        }
    }
}

impl HostCallbacks for CliHost {
    fn approve_account_creation(&self, rp_id: &str) -> bool {
        self.confirm(&account_creation_prompt(rp_id))
    }

    fn approve_account_login(&self, rp_id: &str) -> bool {
        self.confirm(&account_login_prompt(rp_id))
    }

    fn load_state(&self) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(&self.state_path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn save_state(&self, data: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.state_path, data)
    }

    fn passphrase(&self) -> io::Result<String> {
        if let Ok(passphrase) = std::env::var(PASSPHRASE_ENV) {
            return Ok(passphrase);
        }
        let Some(mut input) = pinentry::PassphraseInput::with_binary(&self.pinentry_bin) else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "pinentry binary not found",
            ));
        };
        input
            .with_title("vfido")
            .with_description("Passphrase for the vfido device state")
            .interact()
            .map(|secret| secret.expose_secret().to_string())
            .map_err(|e| io::Error::other(e.to_string()))
    }
}
