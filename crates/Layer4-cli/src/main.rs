//! Plinth CLI - Main entry point

use anyhow::Context;
use clap::{Parser, Subcommand};
use plinth_core::plugin::OpenSourceLicensing;
use plinth_core::{
    process_factory, ArchiveInstaller, Error, FsLoader, InstallOpts, Licensing, PluginClass,
    PluginManager,
};
use plinth_foundation::HostConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Plinth - plugin host
#[derive(Parser, Debug)]
#[command(name = "plinth")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Host configuration file (defaults to <config dir>/plinth/plinth.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load plugins and supervise them until Ctrl-C (default)
    Run,
    /// Print registered plugins and rejected plugins as JSON
    List,
    /// Install a plugin into the plugins path
    Install {
        plugin_id: String,
        version: String,
        /// Archive URL or local path instead of the repository
        #[arg(long)]
        url: Option<String>,
        /// Repository URL (overrides repositoryUrl)
        #[arg(long)]
        repo: Option<String>,
    },
    /// Remove an installed plugin
    Uninstall { plugin_id: String },
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<HostConfig> {
    let path = match path {
        Some(path) => path,
        None => HostConfig::default_path()?,
    };
    let mut config = HostConfig::load_or_default(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    config.apply_env_overrides()?;
    Ok(config)
}

fn build_manager(config: HostConfig) -> PluginManager {
    let licensing: Arc<dyn Licensing> = Arc::new(OpenSourceLicensing);

    let mut loader = FsLoader::new().with_factory(process_factory(licensing.environment()));
    if let Some(core) = config.core_plugins_path() {
        loader = loader.with_class_root(core, PluginClass::Core);
    }
    if let Some(bundled) = config.bundled_plugins_path.clone() {
        loader = loader.with_class_root(bundled, PluginClass::Bundled);
    }

    PluginManager::new(config, Arc::new(loader), Arc::new(ArchiveInstaller::new()))
        .with_licensing(licensing)
}

/// Ctrl-C 시 토큰 취소
fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
        }
        token.cancel();
    });
}

async fn run(manager: &PluginManager) -> anyhow::Result<()> {
    let token = CancellationToken::new();
    cancel_on_ctrl_c(&token);

    for route in manager.routes().await {
        info!("Route {} -> {}", route.plugin_id, route.directory.display());
    }

    match manager.run(&token).await {
        Ok(()) | Err(Error::Cancelled) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn list(manager: &PluginManager) -> anyhow::Result<()> {
    let output = serde_json::json!({
        "plugins": manager.plugins().await,
        "errors": manager.plugin_errors().await,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn install(manager: &PluginManager, plugin_id: &str, version: &str, opts: InstallOpts) -> anyhow::Result<()> {
    let token = CancellationToken::new();
    cancel_on_ctrl_c(&token);
    manager
        .install(&token, plugin_id, version, opts)
        .await
        .with_context(|| format!("failed to install {}", plugin_id))?;
    println!("Installed {} v{}", plugin_id, version);
    Ok(())
}

async fn uninstall(manager: &PluginManager, plugin_id: &str) -> anyhow::Result<()> {
    let token = CancellationToken::new();
    cancel_on_ctrl_c(&token);
    manager
        .uninstall(&token, plugin_id)
        .await
        .with_context(|| format!("failed to uninstall {}", plugin_id))?;
    println!("Uninstalled {}", plugin_id);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(args.config)?;

    let log_level = if args.debug { "debug" } else { config.log_level.as_str() };
    plinth_foundation::logging::init(log_level);

    let manager = build_manager(config);
    manager.init().await?;

    let result = match args.command.unwrap_or(Command::Run) {
        Command::Run => run(&manager).await,
        Command::List => list(&manager).await,
        Command::Install {
            plugin_id,
            version,
            url,
            repo,
        } => install(&manager, &plugin_id, &version, InstallOpts { archive_url: url, repo_url: repo }).await,
        Command::Uninstall { plugin_id } => uninstall(&manager, &plugin_id).await,
    };

    if let Err(e) = &result {
        warn!("Command failed, stopping plugins: {:#}", e);
    }
    manager.shutdown().await;
    result
}
