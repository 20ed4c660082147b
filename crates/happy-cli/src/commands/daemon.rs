//! `happy daemon start|stop|start-sync` (§4.7, §4.8, §6.1).

use happy_core::config::Settings;
use happy_core::dirs::HappyHome;
use happy_core::model::{DaemonStateFile, EncryptionDescriptor};
use happy_daemon::DaemonContext;
use happy_daemon::rpc::LoopbackRpcClient;
use happy_daemon::spawn::SpawnConfig;
use jsonrpsee::http_client::HttpClientBuilder;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::credentials;
use crate::error::{CliError, CliResult};

/// `happy daemon start`: spawn a detached `happy daemon start-sync` child
/// and return immediately.
///
/// # Errors
///
/// Returns an error if the home directory cannot be resolved or the
/// child process cannot be spawned.
pub async fn start() -> CliResult<()> {
    let home = resolve_home()?;
    home.ensure().ok();

    if let Some(state) = happy_core::read_json_tolerant::<DaemonStateFile>(&home.daemon_state_path())
        && happy_daemon::process::is_alive(state.pid)
    {
        println!("daemon already running (pid {}, port {})", state.pid, state.http_port);
        return Ok(());
    }

    let log_path = home.logs_dir().join("daemon.log");
    std::fs::create_dir_all(home.logs_dir()).ok();
    let cli_exe = std::env::current_exe().unwrap_or_else(|_| std::path::PathBuf::from("happy"));
    let mut command = tokio::process::Command::new(&cli_exe);
    command
        .arg("daemon")
        .arg("start-sync")
        .stdin(std::process::Stdio::null())
        .kill_on_drop(false);
    if let Ok(log) = std::fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        let log_err = log.try_clone().map_err(|e| CliError::HomeUnavailable(e.to_string()))?;
        command.stdout(std::process::Stdio::from(log)).stderr(std::process::Stdio::from(log_err));
    } else {
        command.stdout(std::process::Stdio::null()).stderr(std::process::Stdio::null());
    }
    command.spawn().map_err(|e| CliError::HomeUnavailable(format!("failed to spawn daemon: {e}")))?;
    println!("daemon starting (log: {})", log_path.display());
    Ok(())
}

/// `happy daemon stop`: ask a running daemon to shut down gracefully via
/// its loopback control surface.
///
/// # Errors
///
/// Returns an error if the home directory cannot be resolved.
pub async fn stop() -> CliResult<()> {
    let home = resolve_home()?;
    let Some(state) = happy_core::read_json_tolerant::<DaemonStateFile>(&home.daemon_state_path()) else {
        println!("no daemon state found; nothing to stop");
        return Ok(());
    };

    let url = format!("http://127.0.0.1:{}", state.http_port);
    let Ok(client) = HttpClientBuilder::default().build(&url) else {
        println!("could not reach daemon at {url}");
        return Ok(());
    };
    match LoopbackRpcClient::stop(&client).await {
        Ok(()) => println!("daemon (pid {}) asked to stop", state.pid),
        Err(err) => warn!(error = %err, "daemon did not answer /stop cleanly"),
    }
    Ok(())
}

/// `happy daemon start-sync`: run the daemon to completion in the
/// foreground. Signal handling and the loopback `/stop` RPC are both
/// wired up inside [`happy_daemon::run`] itself.
///
/// # Errors
///
/// Returns an error if the daemon cannot start (already running on the
/// same version, lock contention, or a bind failure).
pub async fn start_sync() -> CliResult<()> {
    let home = resolve_home()?;
    home.ensure().ok();
    let credentials = credentials::load(&home)?;

    let settings = Settings::load(&home.settings_path());
    let machine_id = settings.machine_id.ok_or_else(|| {
        CliError::HomeUnavailable("no machineId in settings.json; run onboarding first".into())
    })?;
    let machine_key = machine_symmetric_key(&credentials.encryption);

    let cli_exe = std::env::current_exe().unwrap_or_else(|_| std::path::PathBuf::from("happy"));
    let session_log_path = home.logs_dir().join("sessions.log");
    let ctx = DaemonContext {
        home,
        server_url: happy_core::env::server_url().unwrap_or_default(),
        token: credentials.token,
        machine_id,
        machine_key,
        spawn_config: SpawnConfig {
            cli_exe,
            log_path: Some(session_log_path),
        },
    };

    info!("starting daemon");
    happy_daemon::run(ctx, CancellationToken::new()).await?;
    Ok(())
}

fn resolve_home() -> CliResult<HappyHome> {
    HappyHome::resolve().map_err(|e| CliError::HomeUnavailable(e.to_string()))
}

/// Mirror of the session-scoped key derivation in `happy-session`, but
/// for the machine-scoped key the daemon's RPC handlers decrypt
/// `params_encrypted` with (§4.7 step 7).
fn machine_symmetric_key(encryption: &EncryptionDescriptor) -> [u8; 32] {
    let bytes = match encryption {
        EncryptionDescriptor::Legacy { key } => key.as_bytes(),
        EncryptionDescriptor::DataKey { machine_key, .. } => machine_key.as_bytes(),
    };
    let mut out = [0u8; 32];
    let len = bytes.len().min(32);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use happy_core::model::SecretBytes;

    #[test]
    fn legacy_machine_key_matches_shared_key() {
        let key_bytes = [5u8; 32];
        let descriptor = EncryptionDescriptor::Legacy { key: SecretBytes::new(key_bytes.to_vec()) };
        assert_eq!(machine_symmetric_key(&descriptor), key_bytes);
    }

    #[test]
    fn data_key_machine_key_uses_machine_key_not_content_key() {
        let machine_key = [4u8; 32];
        let descriptor = EncryptionDescriptor::DataKey {
            machine_key: SecretBytes::new(machine_key.to_vec()),
            content_key: SecretBytes::new([1u8; 32].to_vec()),
            backend_public_key: SecretBytes::new([0u8; 32].to_vec()),
        };
        assert_eq!(machine_symmetric_key(&descriptor), machine_key);
    }
}
