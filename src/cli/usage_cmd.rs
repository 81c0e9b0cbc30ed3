use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;

use crate::cli::output::{OutputFormat, OutputOptions};
use crate::cli::renderer;
use crate::core::config::{AppConfig, ProviderConfig};
use crate::core::notify::TerminalNotifier;
use crate::core::providers::{registry, Provider, ProviderContext};
use crate::core::store::{ProviderReport, UsageStore};

/// Narrow the configured provider list to the one named on the command line.
fn select_providers(config: &mut AppConfig, filter: Option<&str>) -> Result<Vec<Provider>> {
    match filter {
        None | Some("all") => Ok(config.enabled_providers()),
        Some(id) => {
            let Some(provider) = Provider::from_id(id) else {
                bail!("Unknown provider: '{}'", id);
            };
            config.providers = vec![ProviderConfig {
                id: provider.id().to_string(),
                enabled: true,
            }];
            Ok(vec![provider])
        }
    }
}

pub fn render(reports: &[ProviderReport], opts: &OutputOptions) -> Result<String> {
    match opts.format {
        OutputFormat::Text => {
            let now = Utc::now();
            let sections: Vec<String> = reports
                .iter()
                .map(|r| renderer::render_report(r, now, opts.use_color))
                .collect();
            Ok(sections.join("\n\n"))
        }
        OutputFormat::Json => Ok(if opts.pretty {
            serde_json::to_string_pretty(reports)?
        } else {
            serde_json::to_string(reports)?
        }),
    }
}

pub async fn run(
    provider_filter: Option<String>,
    mut config: AppConfig,
    ctx: ProviderContext,
    opts: &OutputOptions,
) -> Result<()> {
    let providers = select_providers(&mut config, provider_filter.as_deref())?;
    if providers.is_empty() {
        eprintln!("No providers enabled. Run `umon config init` to set up providers.");
        return Ok(());
    }
    // One-shot runs only report; alerts belong to `watch`.
    config.notifications.enabled = false;

    // Show spinner on stderr (text mode only)
    let spinner = if matches!(opts.format, OutputFormat::Text) {
        Some(tokio::spawn(async move {
            let frames = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];
            let mut i = 0usize;
            loop {
                eprint!("\r {} Fetching usage data...", frames[i % frames.len()]);
                i = i.wrapping_add(1);
                tokio::time::sleep(std::time::Duration::from_millis(80)).await;
            }
        }))
    } else {
        None
    };

    let mut store = UsageStore::new(registry(&ctx), Arc::new(TerminalNotifier));
    store.refresh(&config).await;

    // Stop spinner and clear the line
    if let Some(s) = spinner {
        s.abort();
        eprint!("\r\x1b[2K");
    }

    let reports = store.report(&providers);
    println!("{}", render(&reports, opts)?);

    if opts.verbose && opts.format == OutputFormat::Json {
        for (name, err) in store.errors() {
            eprintln!("Error fetching {}: {}", name, err);
        }
    }
    Ok(())
}
