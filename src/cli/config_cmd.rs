use anyhow::{bail, Context, Result};

use crate::core::config::{AppConfig, ProviderConfig};
use crate::core::providers::{build, Provider, ProviderContext};

/// Providers whose credentials can be found locally right now.
pub fn detect_providers(ctx: &ProviderContext) -> Vec<String> {
    Provider::all()
        .iter()
        .filter(|p| build(**p, ctx).is_available())
        .map(|p| p.id().to_string())
        .collect()
}

fn print_enabled(ids: &[String]) {
    let count = ids.len();
    if count > 0 {
        println!(
            "  {} provider{} enabled: {}",
            count,
            if count == 1 { "" } else { "s" },
            ids.join(", ")
        );
    } else {
        println!("  No providers enabled. Edit the config to enable providers.");
    }
}

pub fn init(ctx: &ProviderContext) -> Result<()> {
    let path = AppConfig::config_path();
    if path.exists() {
        eprintln!("Config file already exists at {}", path.display());
        eprintln!("Remove it first if you want to regenerate.");
        return Ok(());
    }

    let detected = detect_providers(ctx);
    let path = AppConfig::with_enabled(&detected)
        .save()
        .context("Failed to generate config")?;
    println!("Generated config at {}", path.display());
    print_enabled(&detected);
    for provider in Provider::all() {
        if !detected.iter().any(|id| id == provider.id()) {
            println!("  {:<11} not detected ({})", provider.id(), provider.auth_hint());
        }
    }
    Ok(())
}

fn parse_provider(provider_id: &str) -> Result<Provider> {
    match Provider::from_id(provider_id) {
        Some(p) => Ok(p),
        None => bail!("Unknown provider: {}", provider_id),
    }
}

pub fn add(provider_id: &str) -> Result<()> {
    let provider = parse_provider(provider_id)?;
    let mut config = AppConfig::load()?;

    if config.is_enabled(provider) {
        bail!("Provider '{}' is already enabled", provider.id());
    }

    // Enable existing entry or add a new one
    match config.providers.iter_mut().find(|p| p.id == provider.id()) {
        Some(existing) => existing.enabled = true,
        None => config.providers.push(ProviderConfig {
            id: provider.id().to_string(),
            enabled: true,
        }),
    }

    config.save()?;
    println!("Enabled provider: {}", provider.id());
    Ok(())
}

pub fn remove(provider_id: &str) -> Result<()> {
    let provider = parse_provider(provider_id)?;
    let mut config = AppConfig::load()?;

    if !config.is_enabled(provider) {
        bail!("Provider '{}' is already disabled", provider.id());
    }

    for p in &mut config.providers {
        if Provider::from_id(&p.id) == Some(provider) {
            p.enabled = false;
        }
    }

    config.save()?;
    println!("Disabled provider: {}", provider.id());
    Ok(())
}

pub fn path() -> Result<()> {
    println!("{}", AppConfig::config_path().display());
    Ok(())
}

pub fn check() -> Result<()> {
    let path = AppConfig::config_path();
    if !path.exists() {
        eprintln!("No config file found at {}", path.display());
        eprintln!("Run `umon config init` to create one.");
        return Ok(());
    }

    let config = AppConfig::load().context("Failed to load config")?;
    let issues = config.validate();
    if !issues.is_empty() {
        eprintln!("Config issues found in {}:", path.display());
        for issue in &issues {
            eprintln!("  - {}", issue);
        }
        bail!("{} config issue(s)", issues.len());
    }

    println!("Config is valid: {}", path.display());
    let enabled: Vec<String> = config
        .enabled_providers()
        .iter()
        .map(|p| p.id().to_string())
        .collect();
    print_enabled(&enabled);
    println!(
        "  Refresh every {}s, notifications {}",
        config.refresh_interval().as_secs(),
        if config.notifications.enabled { "on" } else { "off" }
    );
    Ok(())
}
