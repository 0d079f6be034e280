use std::path::Path;

use crate::config::Config;
use crate::host::pinentry::PASSPHRASE_ENV;

pub fn check(cfg: &Config, state_path: &Path) -> anyhow::Result<()> {
    let mut errors: Vec<String> = Vec::new();

    // Check 1: pinentry binary found. Approval prompts always need it; the
    // passphrase alone can come from the environment.
    match std::process::Command::new(&cfg.pinentry)
        .arg("--version")
        .output()
    {
        Ok(_) => {}
        Err(e) => errors.push(format!(
            "pinentry binary not found: '{}': {e}\n  \
             → install pinentry, or point --pinentry at the binary",
            cfg.pinentry
        )),
    }

    if std::env::var(PASSPHRASE_ENV).is_err() {
        tracing::debug!("{PASSPHRASE_ENV} not set, passphrase will be prompted");
    }

    // Check 2: fresh device needs attestation inputs.
    if !state_path.exists() {
        match (&cfg.attestation_cert, &cfg.attestation_key) {
            (Some(cert), Some(key)) => {
                for path in [cert, key] {
                    if let Err(e) = std::fs::metadata(path) {
                        errors.push(format!("cannot read {}: {e}", path.display()));
                    }
                }
            }
            _ => errors.push(format!(
                "no device state at {} and no attestation material\n  \
                 → pass --attestation-cert <der> and --attestation-key <pkcs8 pem> \
                 for the first run",
                state_path.display()
            )),
        }
    }

    // Check 3: state directory writable.
    if let Some(parent) = state_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            errors.push(format!("cannot create state dir {}: {e}", parent.display()));
        }
    }

    if errors.is_empty() {
        return Ok(());
    }

    for err in &errors {
        eprintln!("ERROR: {err}");
    }
    anyhow::bail!("{} preflight check(s) failed", errors.len());
}
