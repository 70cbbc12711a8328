//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `--config <path>`: Use this configuration file
//! - `--debug`: Enable debug logging
//! - `--quiet` / `-q`: Minimal output
//! - `--json`: Machine-readable output

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::engine::{ConflictPolicy, DiffDirection, SyncDirection};

/// consulkv - compare and synchronize Consul KV across environments
#[derive(Parser, Debug)]
#[command(name = "consulkv")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (default: $CONSULKV_CONFIG, then the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Minimal output; never prompt
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List configured environments
    #[command(name = "envs")]
    Envs,

    /// List keys and values in an environment
    #[command(
        name = "ls",
        after_help = "\
EXAMPLES:
    # Everything in staging
    consulkv ls staging

    # Only keys under app/db
    consulkv ls staging app/db"
    )]
    Ls {
        /// Environment name
        env: String,

        /// Only keys under this path (relative to the environment)
        prefix: Option<String>,
    },

    /// Print one value
    #[command(name = "get")]
    Get {
        /// Environment name
        env: String,

        /// Key path, relative to the environment
        key: String,
    },

    /// Write one value
    #[command(name = "set")]
    Set {
        /// Environment name
        env: String,

        /// Key path, relative to the environment
        key: String,

        /// Value to write
        value: String,

        /// Only write if the key's modify index is still INDEX (0: key must not exist)
        #[arg(long, value_name = "INDEX")]
        cas: Option<u64>,
    },

    /// Delete one key
    #[command(name = "rm")]
    Rm {
        /// Environment name
        env: String,

        /// Key path, relative to the environment
        key: String,

        /// Only delete if the key's modify index is still INDEX
        #[arg(long, value_name = "INDEX")]
        cas: Option<u64>,
    },

    /// Show differences between two environments
    #[command(
        name = "diff",
        long_about = "Show differences between two environments.\n\n\
            Both environments are read in full, then compared key by key. Paths are \
            relative to each environment's prefix, so dev/app/x is compared with \
            prod/app/x. Values are compared byte for byte.\n\n\
            Snapshots are not atomic: keys written while the read is in progress may \
            or may not be reflected."
    )]
    Diff {
        /// Environment to compare from
        #[arg(long)]
        source: String,

        /// Environment to compare to
        #[arg(long)]
        target: String,

        /// Which side is the reference
        #[arg(long, value_enum, default_value_t = DiffDirectionArg::SourceToTarget)]
        direction: DiffDirectionArg,

        /// Include unchanged keys
        #[arg(long)]
        all: bool,
    },

    /// Synchronize two environments
    #[command(
        name = "sync",
        long_about = "Synchronize two environments.\n\n\
            Reads both environments, plans the writes needed for the chosen direction \
            and conflict policy, shows the plan, and applies it. Every write is \
            conditional on the key being unchanged since it was read; a key modified \
            concurrently is reported and left alone.\n\n\
            A one-way sync never deletes unless --prune is given. A two-way sync \
            merges against the state recorded after the last clean two-way sync \
            of the same pair; the first run has no such baseline, so any key present \
            on both sides with different values is a conflict.\n\n\
            Writes that already succeeded are not rolled back if a later one fails.",
        after_help = "\
EXAMPLES:
    # Preview promoting staging to prod
    consulkv sync --source staging --target prod --dry-run

    # Mirror exactly, deleting extra keys in prod
    consulkv sync --source staging --target prod --prune --yes

    # Merge both ways, stopping on conflicting edits
    consulkv sync --source dev --target qa --direction two-way --on-conflict abort"
    )]
    Sync {
        /// Source environment
        #[arg(long)]
        source: String,

        /// Target environment
        #[arg(long)]
        target: String,

        /// Which way changes flow
        #[arg(long, value_enum, default_value_t = SyncDirectionArg::SourceToTarget)]
        direction: SyncDirectionArg,

        /// Whose value prevails when both sides differ
        #[arg(long, value_enum, default_value_t = ConflictArg::SourceWins)]
        on_conflict: ConflictArg,

        /// Show the plan without applying it
        #[arg(long)]
        dry_run: bool,

        /// Delete keys on the receiving side that the sending side lacks (one-way only)
        #[arg(long, conflicts_with = "reset_baseline")]
        prune: bool,

        /// Apply without asking for confirmation
        #[arg(short, long)]
        yes: bool,

        /// Ignore the recorded two-way baseline and record a new one
        #[arg(long)]
        reset_baseline: bool,

        /// Concurrent requests per environment while reading
        #[arg(long, default_value_t = 8, value_name = "N")]
        concurrency: usize,
    },

    /// Generate shell completion scripts
    #[command(
        name = "completion",
        after_help = "\
EXAMPLES:
    consulkv completion bash > ~/.local/share/bash-completion/completions/consulkv
    consulkv completion zsh > ~/.zfunc/_consulkv"
    )]
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Diff direction, as accepted on the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffDirectionArg {
    SourceToTarget,
    TargetToSource,
}

impl From<DiffDirectionArg> for DiffDirection {
    fn from(arg: DiffDirectionArg) -> Self {
        match arg {
            DiffDirectionArg::SourceToTarget => DiffDirection::SourceToTarget,
            DiffDirectionArg::TargetToSource => DiffDirection::TargetToSource,
        }
    }
}

/// Sync direction, as accepted on the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncDirectionArg {
    SourceToTarget,
    TargetToSource,
    TwoWay,
}

impl From<SyncDirectionArg> for SyncDirection {
    fn from(arg: SyncDirectionArg) -> Self {
        match arg {
            SyncDirectionArg::SourceToTarget => SyncDirection::SourceToTarget,
            SyncDirectionArg::TargetToSource => SyncDirection::TargetToSource,
            SyncDirectionArg::TwoWay => SyncDirection::TwoWay,
        }
    }
}

/// Conflict policy, as accepted on the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictArg {
    SourceWins,
    TargetWins,
    Abort,
}

impl From<ConflictArg> for ConflictPolicy {
    fn from(arg: ConflictArg) -> Self {
        match arg {
            ConflictArg::SourceWins => ConflictPolicy::SourceWins,
            ConflictArg::TargetWins => ConflictPolicy::TargetWins,
            ConflictArg::Abort => ConflictPolicy::Abort,
        }
    }
}

/// Shell types for completion generation.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
}
