//! Verbose CLI - index AI coding session transcripts and print them as JSON

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_stream::StreamExt;
use verbose::config::expand_path;
use verbose::{logging, Config, Core, CoreError};

#[derive(Parser, Debug)]
#[command(name = "verbose")]
#[command(author = "Verbose Team")]
#[command(version)]
#[command(about = "Verbose - live index of AI coding session transcripts", long_about = None)]
struct Args {
    /// Path to configuration file [default: ~/.verbose/config.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the projects directory
    #[arg(long)]
    projects_dir: Option<PathBuf>,

    /// Only show sessions whose project name or path matches
    #[arg(short, long)]
    project: Option<String>,

    /// Print one full session (summary and events) instead of the list
    #[arg(short, long)]
    session: Option<String>,

    /// Keep running and re-print whenever transcripts change
    #[arg(short, long)]
    follow: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Initialize a new config file with defaults
    #[arg(long)]
    init: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config_path = args
        .config
        .as_deref()
        .map(expand_path)
        .unwrap_or_else(Config::default_path);

    // Handle --init flag
    if args.init {
        if config_path.exists() {
            eprintln!("Config file already exists: {}", config_path.display());
            return Ok(());
        }
        Config::create_default(&config_path)?;
        eprintln!("Created default config at: {}", config_path.display());
        return Ok(());
    }

    // Load configuration
    let mut config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };
    config.apply_env_overrides();
    if let Some(dir) = args.projects_dir {
        config.projects_dir = dir;
    }

    let _log_guard = logging::init(&config.logging, args.verbose)?;
    if !config_path.exists() {
        tracing::debug!(
            "Config file not found at {}, using defaults",
            config_path.display()
        );
    }

    let core = Arc::new(Core::new(config)?);

    // A missing projects directory is reported but not fatal
    let scan = {
        let core = Arc::clone(&core);
        tokio::task::spawn_blocking(move || core.scan()).await?
    };
    if let Err(e) = scan {
        tracing::warn!("Failed to scan sessions: {}", e);
    }

    if !args.follow {
        print_view(&core, args.project.as_deref(), args.session.as_deref(), true)?;
        return Ok(());
    }

    let mut updates = core.subscribe();
    core.start_watching().await?;
    print_view(&core, args.project.as_deref(), args.session.as_deref(), false)?;

    loop {
        tokio::select! {
            update = updates.next() => {
                if update.is_none() {
                    break;
                }
                print_view(&core, args.project.as_deref(), args.session.as_deref(), false)?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    core.stop_watching().await?;
    Ok(())
}

/// Print either one session or the (filtered) summary list.
///
/// One-shot output is pretty-printed; follow mode emits one JSON document
/// per line so consumers can split on newlines.
fn print_view(
    core: &Core,
    project: Option<&str>,
    session: Option<&str>,
    pretty: bool,
) -> anyhow::Result<()> {
    let json = match session {
        Some(id) => match core.session(id) {
            Ok(session) => to_json(session.as_ref(), pretty)?,
            Err(CoreError::NotFound(..)) if !pretty => return Ok(()),
            Err(e) => return Err(e.into()),
        },
        None => to_json(&core.list_filtered(project), pretty)?,
    };
    println!("{}", json);
    Ok(())
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T, pretty: bool) -> serde_json::Result<String> {
    if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
}
