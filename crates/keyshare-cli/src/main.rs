//! # keyshare CLI
//!
//! Command-line front end for the keyshare token-addressed file store.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keyshare_config::logging::{init_logging, LogLevel};
use keyshare_config::{log_cli_debug, log_cli_info, Config};
use keyshare_store::{FileRegistry, StoreError};
use serde::Serialize;

/// keyshare - share files by token, with per-origin download limits
#[derive(Parser)]
#[command(name = "keyshare")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Storage root directory (overrides config files and KEYSHARE_ROOT)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a file and print its owner and share tokens as JSON
    Upload {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Name to store the file under (defaults to FILE's name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Fetch a stored file, charging one download to ORIGIN
    Download {
        /// Share or owner token
        token: String,

        /// Who is downloading (e.g. a client address)
        #[arg(long)]
        origin: String,

        /// Write to this file instead of stdout
        #[arg(short, long, value_name = "OUT")]
        output: Option<PathBuf>,
    },

    /// Delete a stored file (owner token only)
    Delete {
        #[arg(value_name = "OWNER_TOKEN")]
        owner_token: String,
    },

    /// Tell whether a token is a share token or an owner token
    Verify { token: String },

    /// List stored files
    List {
        /// Print full records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show remaining downloads for an origin
    Quota { origin: String },

    /// Show store statistics
    Stats,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a default project config to .keyshare/config.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file locations
    Path,
}

#[derive(Serialize)]
struct Verification {
    share: bool,
    owner: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogLevel::from_verbosity(cli.verbose));

    keyshare_config::reload().context("Failed to load configuration")?;
    let mut config = keyshare_config::config().clone();
    if let Some(root) = cli.root {
        config.storage.root = root;
    }
    log_cli_debug!(
        "Using storage root",
        root = tracing::field::display(config.storage.root_dir().display()),
    );

    run(cli.command, &config)
}

fn run(command: Commands, config: &Config) -> Result<()> {
    // Config commands must work even when the configured store is unusable.
    if let Commands::Config { command } = command {
        return cmd_config(command, config);
    }
    let registry = &FileRegistry::new(config)?;
    match command {
        Commands::Upload { file, name } => cmd_upload(registry, &file, name.as_deref()),
        Commands::Download {
            token,
            origin,
            output,
        } => cmd_download(registry, &token, &origin, output.as_deref()),
        Commands::Delete { owner_token } => {
            registry.delete(&owner_token).map_err(describe)?;
            println!("Deleted");
            Ok(())
        }
        Commands::Verify { token } => {
            let verification = Verification {
                share: registry.is_valid_share_token(&token).map_err(describe)?,
                owner: registry.is_valid_owner_token(&token).map_err(describe)?,
            };
            println!("{}", serde_json::to_string_pretty(&verification)?);
            Ok(())
        }
        Commands::List { json } => cmd_list(registry, json),
        Commands::Quota { origin } => {
            match registry.quota(&origin)? {
                Some(remaining) => println!("{}: {} downloads left", origin, remaining),
                None => println!(
                    "{}: no downloads yet (limit {})",
                    origin,
                    registry.download_limit()
                ),
            }
            Ok(())
        }
        Commands::Stats => {
            let stats = registry.stats()?;
            println!("Root:     {}", registry.resolver().root().display());
            println!("Files:    {}", stats.file_count);
            println!("Bytes:    {}", stats.total_bytes);
            println!("Missing:  {}", stats.missing_blobs);
            println!("Origins:  {}", stats.origin_count);
            Ok(())
        }
        Commands::Config { command } => cmd_config(command, config),
    }
}

fn cmd_upload(registry: &FileRegistry, file: &Path, name: Option<&str>) -> Result<()> {
    let name = match name {
        Some(name) => name.to_string(),
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", file.display()))?,
    };
    let reader =
        File::open(file).with_context(|| format!("Failed to open {}", file.display()))?;

    let tokens = registry.upload(&name, reader).map_err(describe)?;
    log_cli_info!("Uploaded", name = name.as_str());
    println!("{}", serde_json::to_string_pretty(&tokens)?);
    Ok(())
}

fn cmd_download(
    registry: &FileRegistry,
    token: &str,
    origin: &str,
    output: Option<&Path>,
) -> Result<()> {
    let mut download = registry.download(token, origin).map_err(describe)?;

    match output {
        Some(path) => {
            let mut file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let bytes = io::copy(&mut download.stream, &mut file)?;
            file.sync_all()?;
            println!(
                "Saved {} ({}, {} bytes) to {}",
                download.file_name,
                download.content_type,
                bytes,
                path.display()
            );
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            io::copy(&mut download.stream, &mut out)?;
            out.flush()?;
        }
    }
    eprintln!("{} downloads left for {}", download.remaining, origin);
    Ok(())
}

fn cmd_list(registry: &FileRegistry, json: bool) -> Result<()> {
    let records = registry.list()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No files stored");
        return Ok(());
    }
    for record in &records {
        println!("{}  {}", record.share_token, record.file_name);
    }
    Ok(())
}

fn cmd_config(command: ConfigCommands, config: &Config) -> Result<()> {
    match command {
        ConfigCommands::Init { force } => {
            let path = Config::project_config_path();
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(&path, Config::default_toml()?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        ConfigCommands::Show => {
            print!("{}", toml::to_string_pretty(config)?);
        }
        ConfigCommands::Path => {
            match Config::global_config_path() {
                Some(path) => println!("Global:  {}", path.display()),
                None => println!("Global:  (no home directory)"),
            }
            println!("Project: {}", Config::project_config_path().display());
            println!("Store:   {}", config.storage.root_dir().display());
        }
    }
    Ok(())
}

/// Turn a store error into a message for the terminal.
fn describe(err: StoreError) -> anyhow::Error {
    match err {
        StoreError::NotFound => anyhow::anyhow!("No stored file matches that token"),
        StoreError::QuotaExceeded { origin } => {
            anyhow::anyhow!("Download limit reached for {}", origin)
        }
        other => anyhow::Error::new(other),
    }
}
