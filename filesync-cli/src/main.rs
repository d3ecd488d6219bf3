mod logging;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use filesync_core::{AppContext, Config, Dispatcher, RemoteSession};
use filesync_remote_ssh::SshSession;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "filesync", version, about = "filesync – mirror local directories onto SSH hosts")]
struct Cli {
    /// Path to config file (JSON / YAML). Defaults to `<executable>.json`
    /// next to the executable.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(p) => p,
        None => default_config_path()?,
    };

    let cfg = Config::load(&config_path)
        .with_context(|| format!("config {} rejected", config_path.display()))?;

    let log_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    logging::init(&cfg.log, log_dir);
    info!("filesync starting, config={}", config_path.display());

    // Connect every server up front
    let mut sessions: Vec<Arc<dyn RemoteSession>> = Vec::with_capacity(cfg.ssh.len());
    for (i, ssh) in cfg.ssh.iter().enumerate() {
        let session = SshSession::connect(ssh)
            .await
            .with_context(|| format!("ssh[{i}] {}:{} unavailable", ssh.addr, ssh.port))?;
        sessions.push(Arc::new(session));
    }
    info!("{} session(s) ready", sessions.len());

    let (ctx, receiver) = AppContext::new(&cfg)?;
    let dispatcher = Dispatcher::new(ctx.monitors(), sessions, cfg.dispatch.clone());
    let watchers = ctx.start_watchers()?;
    let mut dispatch = tokio::spawn(dispatcher.run(receiver));

    let ctx = Arc::new(ctx);
    let scan_ctx = ctx.clone();
    tokio::task::spawn_blocking(move || match scan_ctx.initial_sync() {
        Ok(0) => {}
        Ok(n) => info!("initial sync queued {n} event(s)"),
        Err(e) => error!("initial sync stopped: {e}"),
    });

    println!("filesync running... press Ctrl+C to stop");
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("interrupted, stopping");
        }
        res = &mut dispatch => {
            let stats = res?;
            info!(?stats, "dispatcher finished");
        }
    }
    drop(watchers);
    println!("Stopping");
    Ok(())
}

fn default_config_path() -> Result<PathBuf> {
    let exe = std::env::current_exe().map_err(|e| anyhow!("cannot locate executable: {e}"))?;
    Ok(exe.with_extension("json"))
}
