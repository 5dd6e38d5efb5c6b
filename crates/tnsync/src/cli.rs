//! Clap derive structures for the `tnsync` CLI.
//!
//! Defines the command tree and global flags. Kept free of workspace
//! crates so `build.rs` can include it for man page generation.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// tnsync -- declarative TrueNAS configuration
#[derive(Debug, Parser)]
#[command(
    name = "tnsync",
    version,
    about = "Converge TrueNAS resources to a declared state",
    long_about = "Reconcile users, groups, datasets, shares, services, jails and apps on a\n\
        TrueNAS appliance against a YAML or JSON description.\n\n\
        Talks to middlewared through the local midclt binary or a websocket.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration profile to use
    #[arg(long, short = 'p', env = "TNSYNC_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Transport: midclt, websocket (or client)
    #[arg(long, global = true)]
    pub method: Option<String>,

    /// Websocket URI (overrides profile)
    #[arg(long, short = 'u', global = true)]
    pub uri: Option<String>,

    /// Output format
    #[arg(long, short = 'o', env = "TNSYNC_OUTPUT", default_value = "json", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress the status line
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Log line format on stderr
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// YAML
    Yaml,
    /// Table of changed fields
    Table,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Converge one resource to the state described in FILE (or stdin)
    Apply(ApplyArgs),

    /// Print appliance facts and the detected middleware dialect
    Facts,

    /// Issue a raw middleware call
    Call(CallArgs),

    /// List resource types accepted by `apply`
    Kinds,

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// Resource type (e.g. user, filesystem, sharing-nfs)
    pub kind: String,

    /// YAML or JSON parameters; `-` or omitted reads stdin
    #[arg(long, short = 'f')]
    pub file: Option<PathBuf>,

    /// Report what would change without changing anything
    #[arg(long, alias = "dry-run")]
    pub check: bool,
}

#[derive(Debug, Args)]
pub struct CallArgs {
    /// Method name (e.g. system.info)
    pub method: String,

    /// Positional arguments, each a JSON document
    pub args: Vec<String>,

    /// Run the method as a job and wait for it
    #[arg(long)]
    pub job: bool,

    /// Print the result as a bare string, like `midclt call`
    #[arg(long, conflicts_with = "job")]
    pub raw: bool,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
