use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{ConfigLoader, CONFIG_ENV, DATA_ENV};

pub mod commands;

use self::commands::{
    AddEntryArgs, AddGroupArgs, DeleteArgs, InitArgs, ListArgs, RenameArgs, SearchArgs, Session,
};

#[derive(Parser, Debug)]
#[command(
    name = "vaultview",
    version,
    about = "Browse and edit a credential vault through live list views"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the config file location (takes precedence over VAULTVIEW_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over VAULTVIEW_DATA)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Vault file to open instead of <data_dir>/vault.db
    #[arg(long, global = true)]
    pub vault: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an empty vault
    Init(InitArgs),
    /// List the top-level groups
    Groups,
    /// List the contents of a group
    List(ListArgs),
    /// Find entries whose title contains the query
    Search(SearchArgs),
    /// Create a group under a parent group
    AddGroup(AddGroupArgs),
    /// Create an entry under a parent group
    AddEntry(AddEntryArgs),
    /// Change the title and subtitle of a group or entry
    Rename(RenameArgs),
    /// Delete a group (with everything below it) or an entry
    Delete(DeleteArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var(CONFIG_ENV, path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var(DATA_ENV, path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let mut config = loader.load_or_init()?;
    if let Some(vault) = cli.vault {
        config.vault.path = vault;
    }

    if let Commands::Init(args) = &cli.command {
        return commands::init_vault(&config, args);
    }

    let session = Session::open(&config, cli.json)?;
    match cli.command {
        Commands::Init(_) => Ok(()),
        Commands::Groups => session.groups(),
        Commands::List(args) => session.list(args),
        Commands::Search(args) => session.search(args),
        Commands::AddGroup(args) => session.add_group(args),
        Commands::AddEntry(args) => session.add_entry(args),
        Commands::Rename(args) => session.rename(args),
        Commands::Delete(args) => session.delete(args),
    }
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}
