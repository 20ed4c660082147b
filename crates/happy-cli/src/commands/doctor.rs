//! `happy doctor [--clean]` (§10.5): diagnostics for the local
//! installation, with an optional conservative cleanup pass.

use colored::Colorize;
use happy_core::dirs::HappyHome;
use happy_core::model::DaemonStateFile;
use happy_daemon::rpc::LoopbackRpcClient;
use jsonrpsee::http_client::HttpClientBuilder;

use crate::error::{CliError, CliResult};

/// Run the diagnostic checks, optionally cleaning up stale state.
///
/// # Errors
///
/// Returns an error only if the Happy home directory cannot be resolved.
pub async fn run(clean: bool) -> CliResult<()> {
    println!("{}", "Happy Doctor".cyan().bold());
    println!();

    let home = HappyHome::resolve().map_err(|e| CliError::HomeUnavailable(e.to_string()))?;

    print!("  Happy home ({})... ", home.root().display());
    if home.root().is_dir() {
        println!("{}", "OK".green());
    } else {
        println!("{}", "WARN".yellow());
        println!("    directory does not exist yet");
    }

    print!("  credentials.json... ");
    match crate::credentials::load(&home) {
        Ok(_) => println!("{}", "OK".green()),
        Err(CliError::CredentialsMissing { .. }) => {
            println!("{}", "WARN".yellow());
            println!("    not enrolled yet");
        }
        Err(err) => {
            println!("{}", "FAIL".red());
            println!("    {err}");
        }
    }

    print!("  daemon... ");
    let state = happy_core::read_json_tolerant::<DaemonStateFile>(&home.daemon_state_path());
    match &state {
        Some(state) if happy_daemon::process::is_alive(state.pid) => {
            println!("{}", "OK".green());
            println!("    pid {} listening on 127.0.0.1:{}", state.pid, state.http_port);
        }
        Some(state) => {
            println!("{}", "WARN".yellow());
            println!("    state file names pid {} but it is not alive", state.pid);
            if clean {
                println!("    removing stale state file");
                let _ = std::fs::remove_file(home.daemon_state_path());
            }
        }
        None => {
            println!("{}", "WARN".yellow());
            println!("    not running");
        }
    }

    if clean
        && let Some(state) = &state
        && happy_daemon::process::is_alive(state.pid)
    {
        print!("  requesting daemon shutdown for cleanup... ");
        let url = format!("http://127.0.0.1:{}", state.http_port);
        match HttpClientBuilder::default().build(&url) {
            Ok(client) if LoopbackRpcClient::stop(&client).await.is_ok() => println!("{}", "OK".green()),
            _ => println!("{}", "FAIL".red()),
        }
    }

    println!();
    println!("{}", "done".bold());
    Ok(())
}
