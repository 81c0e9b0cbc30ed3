mod cli;
mod core;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::output::OutputOptions;
use crate::core::config::AppConfig;
use crate::core::providers::ProviderContext;
use crate::core::secrets::{KeyringStore, MemoryStore, SecretStore};

#[derive(Parser)]
#[command(name = "umon", about = "AI provider quota usage monitor", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Output format (text|json)
    #[arg(short, long, global = true)]
    format: Option<String>,

    /// Shorthand for --format json
    #[arg(short = 'j', long = "json", global = true)]
    json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    /// Verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Skip the OS keychain and use an empty in-process secret store
    #[arg(long, global = true)]
    no_keyring: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and display provider usage once
    Usage {
        /// Provider to query (default: all enabled)
        #[arg(short, long)]
        provider: Option<String>,
    },
    /// Keep polling on the configured interval and raise threshold alerts
    Watch,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Manage secrets in the OS keychain
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Generate a config file enabling every provider with local credentials
    Init,
    /// Validate config file
    Check,
    /// Print the config file location
    Path,
    /// Enable a provider
    Add {
        /// Provider ID to enable
        provider: String,
    },
    /// Disable a provider
    Remove {
        /// Provider ID to disable
        provider: String,
    },
}

#[derive(Subcommand)]
enum SecretAction {
    /// Store a secret; reads the value from stdin when omitted
    Set {
        /// Secret key or provider ID
        key: String,
        value: Option<String>,
    },
    /// Remove a stored secret
    Delete {
        /// Secret key or provider ID
        key: String,
    },
    /// Show which known secrets are set
    List,
}

fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("umon=debug")
        } else {
            EnvFilter::new("umon=info")
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "using default configuration");
            AppConfig::default()
        }
    };

    let json = cli.json || cli.format.as_deref() == Some("json");
    let output_opts = OutputOptions::resolve(json, cli.pretty, cli.no_color, cli.verbose, &config.settings);

    let store: Arc<dyn SecretStore> = if cli.no_keyring {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(KeyringStore)
    };
    let ctx = ProviderContext::new(store.clone());

    match cli.command {
        None => cli::usage_cmd::run(None, config, ctx, &output_opts).await?,
        Some(Commands::Usage { provider }) => {
            cli::usage_cmd::run(provider, config, ctx, &output_opts).await?
        }
        Some(Commands::Watch) => cli::watch_cmd::run(ctx, &output_opts).await?,
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init => cli::config_cmd::init(&ctx)?,
            ConfigAction::Check => cli::config_cmd::check()?,
            ConfigAction::Path => cli::config_cmd::path()?,
            ConfigAction::Add { provider } => cli::config_cmd::add(&provider)?,
            ConfigAction::Remove { provider } => cli::config_cmd::remove(&provider)?,
        },
        Some(Commands::Secret { action }) => match action {
            SecretAction::Set { key, value } => cli::secret_cmd::set(store.as_ref(), &key, value)?,
            SecretAction::Delete { key } => cli::secret_cmd::delete(store.as_ref(), &key)?,
            SecretAction::List => cli::secret_cmd::list(store.as_ref())?,
        },
    }

    Ok(())
}
