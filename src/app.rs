use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use dialoguer::Confirm;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::auth::{Credential, CredentialStore, EncryptedFileStore, TokenManager};
use crate::cli::{Cli, Commands};
use crate::config::{Config, ConfigHandle};
use crate::error::{BridgeError, Result};
use crate::gmail::GmailClient;
use crate::ledger::Ledger;
use crate::net::NetworkMonitor;
use crate::notes::BearSink;
#[cfg(target_os = "macos")]
use crate::notify::DesktopNotifier;
#[cfg(not(target_os = "macos"))]
use crate::notify::LogNotifier;
use crate::notify::Notifier;
use crate::service::{CycleOutcome, Service, ServiceHandle};

pub async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Run => run_service(config).await,
        Commands::Once => run_once(config).await,
        Commands::Auth {
            refresh_token,
            access_token,
            expires_in,
        } => store_credentials(&config, refresh_token, access_token, expires_in),
        Commands::Status => show_status(&config),
        Commands::ResetState { yes } => reset_state(&config, yes),
        Commands::Pause => Ok(send_control_signal(&config, "USR1", "pause")?),
        Commands::Resume => Ok(send_control_signal(&config, "USR2", "resume")?),
        Commands::Reload => Ok(send_control_signal(&config, "HUP", "reload")?),
        Commands::Poke => Ok(send_control_signal(&config, "ALRM", "poke")?),
    }
}

fn build_service(config: Config) -> Result<(Service, ServiceHandle)> {
    #[cfg(target_os = "macos")]
    let notifier: Arc<dyn Notifier> =
        Arc::new(DesktopNotifier::new(config.notifications.enabled));
    #[cfg(not(target_os = "macos"))]
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    // A corrupt ledger is the one startup error we refuse to work around.
    let ledger = Ledger::open(&config.ledger_path()).map_err(BridgeError::Ledger)?;
    let monitor = NetworkMonitor::new(&config.network, Arc::clone(&notifier));
    let store = EncryptedFileStore::new(&config.credential_path());
    let tokens = TokenManager::new(
        Box::new(store),
        config.gmail.client_id.clone(),
        config.gmail.client_secret.clone(),
        Arc::clone(&notifier),
    );
    let handle = ConfigHandle::new(config);

    Ok(Service::new(
        handle,
        ledger,
        monitor,
        tokens,
        Box::new(GmailClient::new()),
        Box::new(BearSink::new()),
        notifier,
    ))
}

async fn run_service(config: Config) -> Result<()> {
    if config.gmail.senders.is_empty() {
        tracing::warn!("no senders configured; the service will poll but match nothing");
    }

    let data_dir = config.data_dir.clone();
    let (service, handle) = build_service(config)?;

    write_pidfile(&data_dir)?;
    forward_signals(handle)?;

    let result = service.run().await;
    let _ = fs::remove_file(pid_path(&data_dir));
    Ok(result?)
}

async fn run_once(config: Config) -> Result<()> {
    let (mut service, _handle) = build_service(config)?;
    match service.run_cycle().await {
        CycleOutcome::Completed { processed, failed } => {
            println!("cycle complete: {processed} processed, {failed} failed");
        }
        CycleOutcome::Offline => println!("cycle skipped: network offline"),
        CycleOutcome::AuthSkipped => println!("cycle skipped: no valid credential"),
        CycleOutcome::FetchFailed => println!("cycle failed: could not list messages"),
    }
    Ok(())
}

fn store_credentials(
    config: &Config,
    refresh_token: String,
    access_token: Option<String>,
    expires_in: Option<i64>,
) -> Result<()> {
    let store = EncryptedFileStore::new(&config.credential_path());
    let credential = Credential {
        access_token: access_token.unwrap_or_default(),
        refresh_token,
        expires_at: expires_in.map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        needs_reauth: false,
    };
    store.save(&credential)?;
    println!(
        "credentials stored at {}",
        config.credential_path().display()
    );
    Ok(())
}

fn show_status(config: &Config) -> Result<()> {
    match read_pidfile(&config.data_dir) {
        Some(pid) if process_alive(pid) => println!("service: running (pid {pid})"),
        Some(_) => println!("service: not running (stale pidfile)"),
        None => println!("service: not running"),
    }

    println!("config: {}", config.config_path.display());
    println!("senders: {}", config.gmail.senders.join(", "));
    println!("poll interval: {}s", config.gmail.poll_interval_secs);

    let store = EncryptedFileStore::new(&config.credential_path());
    match store.load() {
        Ok(Some(credential)) if credential.needs_reauth => {
            println!("credentials: present, reauthorization required");
        }
        Ok(Some(_)) => println!("credentials: present"),
        Ok(None) => println!("credentials: missing (run `mailbear auth`)"),
        Err(e) => println!("credentials: unreadable ({e})"),
    }

    let ledger = Ledger::open(&config.ledger_path())?;
    println!("ledger: {} processed message(s)", ledger.len());
    Ok(())
}

fn reset_state(config: &Config, yes: bool) -> Result<()> {
    // The running service holds its own in-memory ledger index; resetting
    // underneath it would desynchronize the two.
    if let Some(pid) = read_pidfile(&config.data_dir) {
        if process_alive(pid) {
            return Err(BridgeError::Other(anyhow::anyhow!(
                "stop the service before resetting state (running as pid {pid})"
            )));
        }
    }
    if !yes && !confirm("Forget all processed message ids? Matching mail will be re-bridged.")? {
        println!("aborted");
        return Ok(());
    }
    let mut ledger = Ledger::open(&config.ledger_path())?;
    let count = ledger.len();
    ledger.reset()?;
    println!("ledger reset ({count} record(s) removed)");
    Ok(())
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    Ok(Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?)
}

// ─── Pidfile & signal plumbing ──────────────────────────────────────────────

fn pid_path(data_dir: &Path) -> PathBuf {
    data_dir.join("mailbear.pid")
}

fn write_pidfile(data_dir: &Path) -> anyhow::Result<()> {
    if let Some(pid) = read_pidfile(data_dir) {
        if process_alive(pid) {
            anyhow::bail!("another mailbear instance is already running (pid {pid})");
        }
    }
    fs::create_dir_all(data_dir)?;
    fs::write(pid_path(data_dir), std::process::id().to_string())
        .context("failed to write pidfile")?;
    Ok(())
}

fn read_pidfile(data_dir: &Path) -> Option<u32> {
    fs::read_to_string(pid_path(data_dir))
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Deliver a control signal to the running service process.
fn send_control_signal(config: &Config, signal: &str, action: &str) -> anyhow::Result<()> {
    let Some(pid) = read_pidfile(&config.data_dir) else {
        anyhow::bail!("service is not running (no pidfile in {})", config.data_dir.display());
    };
    if !process_alive(pid) {
        anyhow::bail!("service is not running (stale pidfile, pid {pid})");
    }

    let status = std::process::Command::new("kill")
        .args([&format!("-{signal}"), &pid.to_string()])
        .status()
        .context("failed to invoke kill")?;
    if !status.success() {
        anyhow::bail!("failed to signal pid {pid}");
    }
    println!("{action} signal sent to pid {pid}");
    Ok(())
}

/// Map Unix signals onto the control channel: SIGUSR1 pause, SIGUSR2 resume,
/// SIGHUP reload, SIGALRM wake (`mailbear poke`), SIGTERM/Ctrl-C shutdown.
#[cfg(unix)]
fn forward_signals(handle: ServiceHandle) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut alarm = signal(SignalKind::alarm())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = usr1.recv() => handle.pause(),
                _ = usr2.recv() => handle.resume(),
                _ = hangup.recv() => handle.reload_config(),
                _ = alarm.recv() => handle.wake(),
                _ = terminate.recv() => handle.request_shutdown(),
                _ = tokio::signal::ctrl_c() => handle.request_shutdown(),
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn forward_signals(handle: ServiceHandle) -> anyhow::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.request_shutdown();
        }
    });
    Ok(())
}
