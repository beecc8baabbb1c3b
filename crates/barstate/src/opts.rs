use std::path::PathBuf;

use barstate::ModuleKey;
use clap::{Parser, Subcommand};

/// Struct that gets generated from `RawOpt`.
#[derive(Debug, PartialEq)]
pub struct Opt {
    pub log_debug: bool,
    pub config_path: Option<PathBuf>,
    pub action: Action,
}

#[derive(Parser, Debug, PartialEq)]
#[command(author = "barstate contributors", version, about = "Status bar module state daemon")]
pub(super) struct RawOpt {
    /// Write out debug logs.
    #[arg(long = "debug", global = true)]
    log_debug: bool,

    /// override path to configuration directory (directory that contains config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Action {
    /// Generate a shell completion script
    ShellCompletions {
        #[arg(short, long)]
        shell: clap_complete::shells::Shell,
    },

    /// Run all configured modules, printing every update as a json line. This is the default.
    #[command(name = "daemon", alias = "d")]
    Daemon,

    /// Print the last good payload a module persisted to the cache.
    #[command(name = "cached")]
    Cached {
        /// Name of the module, as used in the configuration
        module: ModuleKey,
    },

    /// Print the configured modules and whether they can be started.
    #[command(name = "modules", alias = "ls")]
    ListModules,
}

impl Opt {
    pub fn from_env() -> Self {
        let raw: RawOpt = RawOpt::parse();
        raw.into()
    }
}

impl From<RawOpt> for Opt {
    fn from(other: RawOpt) -> Self {
        let RawOpt { action, log_debug, config } = other;
        Opt { action: action.unwrap_or(Action::Daemon), log_debug, config_path: config }
    }
}
