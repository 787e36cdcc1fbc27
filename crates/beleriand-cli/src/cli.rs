use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "beleriand")]
#[command(about = "Beleriand CLI: inspect and manage multi-level caches")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to ./beleriand.toml when present)
    #[arg(short, long, global = true, env = "BELERIAND_CONFIG")]
    pub config: Option<String>,

    /// Cache name
    #[arg(short = 'n', long, global = true, default_value = "Default")]
    pub cache: String,

    /// Log at debug level (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read one or more keys
    Get(GetArgs),
    /// Store a JSON value under a key
    Set(SetArgs),
    /// Remove a key from every instance
    Remove(RemoveArgs),
    /// Remove every key of the cache from every instance
    Clear,
    /// Print invalidation messages published for the cache
    Watch,
    /// Show channels, store settings and cache statistics
    Stats,
}

#[derive(clap::Args)]
pub struct GetArgs {
    /// Keys to read
    #[arg(required = true)]
    pub keys: Vec<String>,
}

#[derive(clap::Args)]
pub struct SetArgs {
    /// Key to write
    pub key: String,
    /// JSON value, e.g. '{"timeout":30}' or '"text"'
    pub value: String,
}

#[derive(clap::Args)]
pub struct RemoveArgs {
    /// Key to remove
    pub key: String,
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Get(_) => "get",
            Commands::Set(_) => "set",
            Commands::Remove(_) => "remove",
            Commands::Clear => "clear",
            Commands::Watch => "watch",
            Commands::Stats => "stats",
        }
    }
}
