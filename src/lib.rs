pub mod authenticator;
pub mod config;
pub mod crypto;
pub mod ctaphid;
pub mod diagnostics;
pub mod error;
pub mod host;
pub mod store;
pub mod u2f;
pub mod usb;
pub mod usbip;

pub(crate) mod ctap2;

use std::path::PathBuf;
use std::sync::Arc;

use authenticator::{AttestationSource, Authenticator};
use host::HostCallbacks;
use p256::pkcs8::DecodePrivateKey;

pub async fn wipe(cfg: config::Config) -> anyhow::Result<()> {
    let state_path = resolve_state_path(&cfg)?;
    match std::fs::remove_file(&state_path) {
        Ok(()) => println!("Deleted device state at {}", state_path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("No device state at {}", state_path.display());
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

pub async fn run(cfg: config::Config) -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;
    let level = match cfg.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .init();

    tracing::info!("Starting vfido");

    let state_path = resolve_state_path(&cfg)?;

    // Preflight checks
    diagnostics::check(&cfg, &state_path)?;

    // Single-instance lock
    let data_dir = default_data_dir()?;
    std::fs::create_dir_all(&data_dir)?;
    let lock_dir = std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.clone());
    let lock_path = lock_dir.join("vfido.lock");
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)?;
    let mut lock = fd_lock::RwLock::new(lock_file);
    let _guard = lock
        .try_write()
        .map_err(|_| anyhow::anyhow!("vfido is already running (lock: {})", lock_path.display()))?;

    let attestation = load_attestation(&cfg)?;
    let callbacks: Arc<dyn HostCallbacks> =
        Arc::new(host::CliHost::new(state_path, cfg.pinentry.clone()));

    // scrypt and the passphrase prompt are blocking work.
    let authenticator = Arc::new(
        tokio::task::spawn_blocking(move || Authenticator::load(callbacks, attestation)).await??,
    );
    tracing::info!("Authenticator ready");

    let (device, from_host_rx, to_host_tx) = usb::start_usb_device();
    tokio::spawn(ctaphid::run_ctaphid_loop(from_host_rx, to_host_tx, authenticator));

    let server = usbip::UsbIpServer::bind(("127.0.0.1", cfg.port), device).await?;
    tracing::info!(addr = %server.local_addr()?, "USB/IP server listening");
    server.serve().await?;
    Ok(())
}

pub fn resolve_state_path(cfg: &config::Config) -> anyhow::Result<PathBuf> {
    match &cfg.state {
        Some(path) => Ok(path.clone()),
        None => Ok(default_data_dir()?.join("state.json")),
    }
}

fn default_data_dir() -> anyhow::Result<PathBuf> {
    Ok(directories::ProjectDirs::from("", "", "vfido")
        .ok_or_else(|| anyhow::anyhow!("cannot determine XDG data dir"))?
        .data_dir()
        .to_path_buf())
}

/// Attestation material is only consulted when no device state exists yet.
fn load_attestation(cfg: &config::Config) -> anyhow::Result<Option<AttestationSource>> {
    match (&cfg.attestation_cert, &cfg.attestation_key) {
        (Some(cert_path), Some(key_path)) => {
            let certificate_der = std::fs::read(cert_path)?;
            let pem = std::fs::read_to_string(key_path)?;
            let signing_key = p256::ecdsa::SigningKey::from_pkcs8_pem(&pem)
                .map_err(|e| anyhow::anyhow!("invalid attestation key: {e}"))?;
            Ok(Some(AttestationSource {
                certificate_der,
                private_key: signing_key.to_bytes().to_vec(),
            }))
        }
        (None, None) => Ok(None),
        _ => anyhow::bail!("--attestation-cert and --attestation-key must be given together"),
    }
}
