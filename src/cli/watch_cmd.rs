use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use colored::Colorize;
use tracing::info;

use crate::cli::output::{OutputFormat, OutputOptions};
use crate::cli::usage_cmd;
use crate::core::notify::TerminalNotifier;
use crate::core::providers::{registry, ProviderContext};
use crate::core::scheduler::{file_loader, Scheduler, SchedulerHandle};
use crate::core::store::UsageStore;

/// Treat SIGHUP as "stored credentials changed".
#[cfg(unix)]
fn forward_hangups(handle: SchedulerHandle) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            info!("SIGHUP received, reloading credentials");
            if !handle.credentials_changed().await {
                break;
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn forward_hangups(_handle: SchedulerHandle) -> Result<()> {
    Ok(())
}

pub async fn run(ctx: ProviderContext, opts: &OutputOptions) -> Result<()> {
    let store = UsageStore::new(registry(&ctx), Arc::new(TerminalNotifier));
    let (scheduler, handle) = Scheduler::new(store, file_loader());
    let task = tokio::spawn(scheduler.run());
    forward_hangups(handle.clone())?;

    let mut reports = handle.reports();
    loop {
        tokio::select! {
            changed = reports.changed() => {
                if changed.is_err() {
                    break;
                }
                let rows = reports.borrow_and_update().clone();
                if opts.format == OutputFormat::Text {
                    let stamp = format!("── {} ──", Local::now().format("%H:%M:%S"));
                    println!("{}", if opts.use_color { stamp.dimmed().to_string() } else { stamp });
                }
                if rows.is_empty() {
                    eprintln!("No providers enabled. Run `umon config init` to set up providers.");
                } else {
                    println!("{}\n", usage_cmd::render(&rows, opts)?);
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                handle.stop().await;
                break;
            }
        }
    }

    task.await.context("scheduler task failed")?;
    Ok(())
}
