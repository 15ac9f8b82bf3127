//! userscripts - manage userscript plugins from the command line

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use userscript_manager::assets::ScriptSuite;
use userscript_manager::config::{self, AppConfig};
use userscript_manager::manager::{ScriptsEvent, ScriptsManager};

#[derive(Parser)]
#[command(name = "userscripts")]
#[command(author, version, about = "Userscript plugin manager")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Container directory (overrides config)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List discovered plugins and the scripts that would be loaded
    List {
        /// Only show enabled plugins
        #[arg(short, long)]
        active: bool,
    },

    /// Enable a plugin by file name
    Enable { file_name: String },

    /// Disable a plugin by file name
    Disable { file_name: String },

    /// Check every script for a newer version and apply it
    Update,

    /// Watch the staging and user directories until interrupted
    Watch,

    /// Install another bundled script suite (original, ce)
    Switch { suite: ScriptSuite },

    /// Copy a script file into the user scripts directory
    Import { path: PathBuf },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "userscript_manager=debug,userscripts=debug"
    } else {
        "userscript_manager=info,userscripts=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = config::load_config()?;
    if let Some(root) = cli.root {
        config.paths.container = root;
    }

    match cli.command {
        Commands::List { active } => cmd_list(&config, active),
        Commands::Enable { file_name } => cmd_set_active(&config, &file_name, true),
        Commands::Disable { file_name } => cmd_set_active(&config, &file_name, false),
        Commands::Update => cmd_update(&config).await,
        Commands::Watch => cmd_watch(&config).await,
        Commands::Switch { suite } => cmd_switch(&config, suite),
        Commands::Import { path } => cmd_import(&config, &path),
        Commands::Config => cmd_config(&config),
    }
}

fn open(config: &AppConfig) -> anyhow::Result<Arc<ScriptsManager>> {
    let fetcher = Arc::new(userscript_manager::fetch::ReqwestFetcher::new(&config.updates)?);
    Ok(ScriptsManager::new(config, fetcher))
}

/// Print plugins grouped by category
fn cmd_list(config: &AppConfig, active_only: bool) -> anyhow::Result<()> {
    let manager = open(config)?;

    let mut plugins = manager.stored_plugins();
    plugins.sort_by(|a, b| (&a.category, a.display_name()).cmp(&(&b.category, b.display_name())));

    let mut category = None;
    for plugin in plugins {
        let enabled = manager.is_active(&plugin.file_name);
        if active_only && !enabled {
            continue;
        }
        if category != Some(plugin.category.clone()) {
            println!("\n{}:", plugin.category);
            category = Some(plugin.category.clone());
        }
        println!(
            "  [{}] {} ({}) {}{}",
            if enabled { "x" } else { " " },
            plugin.display_name(),
            plugin.file_name,
            plugin.version.as_deref().unwrap_or("-"),
            if plugin.is_user_script { " [user]" } else { "" },
        );
    }

    println!("\nLoad order:");
    for (i, script) in manager.loaded_scripts().iter().enumerate() {
        println!("  {}. {}", i + 1, script.file_name);
    }
    Ok(())
}

fn cmd_set_active(config: &AppConfig, file_name: &str, loaded: bool) -> anyhow::Result<()> {
    let manager = open(config)?;

    if loaded && !manager.stored_plugins().iter().any(|p| p.file_name == file_name) {
        warn!(plugin = %file_name, "No plugin with this name was discovered");
    }

    if manager.set_active(file_name, loaded)? {
        println!("{} {}", if loaded { "Enabled" } else { "Disabled" }, file_name);
    } else {
        println!(
            "{} is already {}",
            file_name,
            if loaded { "enabled" } else { "disabled" }
        );
    }
    Ok(())
}

async fn cmd_update(config: &AppConfig) -> anyhow::Result<()> {
    let manager = open(config)?;

    let report = manager.update_scripts().await;
    for name in &report.updated {
        println!("  updated  {}", name);
    }
    for (name, error) in &report.failed {
        println!("  failed   {}: {}", name, error);
    }

    if !report.updated.is_empty() {
        manager.reload();
    }
    println!(
        "{} of {} script(s) updated",
        report.updated.len(),
        report.total()
    );
    Ok(())
}

async fn cmd_watch(config: &AppConfig) -> anyhow::Result<()> {
    let manager = ScriptsManager::start(config)?;
    let mut events = manager.subscribe();

    info!(
        staging = ?manager.layout().staging,
        user = ?manager.layout().user_scripts,
        "Watching for changes; press Ctrl-C to stop"
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ScriptsEvent::ScriptsUpdated) => {
                    info!(
                        plugins = manager.stored_plugins().len(),
                        loaded = manager.loaded_scripts().len(),
                        "Scripts updated"
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Missed change notifications");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    manager.stop_watching();
    Ok(())
}

fn cmd_switch(config: &AppConfig, suite: ScriptSuite) -> anyhow::Result<()> {
    let manager = open(config)?;
    if let Err(e) = manager.switch_suite(suite) {
        error!("Failed to switch suite: {}", e);
        return Err(e.into());
    }
    println!("Installed {} scripts", suite);
    Ok(())
}

fn cmd_import(config: &AppConfig, path: &Path) -> anyhow::Result<()> {
    let manager = open(config)?;
    let destination = manager.import_file(path)?;
    println!("Imported to {}", destination.display());
    Ok(())
}

fn cmd_config(config: &AppConfig) -> anyhow::Result<()> {
    let manager = open(config)?;
    let layout = manager.layout();

    println!("Userscript Manager Configuration\n");
    println!("Paths:");
    println!("  Library: {:?}", layout.library_scripts);
    println!("  User scripts: {:?}", layout.user_scripts);
    println!("  Staging: {:?}", layout.staging);
    println!("  Bundle: {:?}", layout.bundle);
    println!("  Preferences: {:?}", layout.preferences);
    println!();
    println!("App:");
    println!("  Version: {} (build {})", config.app.version, config.app.build);
    println!("  Suite: {}", manager.suite());
    println!();
    println!("Plugins:");
    println!(
        "  Priority plugin: {}",
        config.plugins.priority_plugin.as_deref().unwrap_or("none")
    );
    println!("  Enabled: {}", manager.active_names().len());
    println!();
    println!("Updates:");
    println!("  Timeout: {} seconds", config.updates.timeout_seconds);
    match manager.last_update_check() {
        Some(at) => println!("  Last check: {}", at.to_rfc3339()),
        None => println!("  Last check: never"),
    }
    Ok(())
}
