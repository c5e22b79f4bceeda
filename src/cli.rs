use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::reconcile::ReconcileScope;
use crate::run::Coverage;

/// unsafe-drop CLI options.
#[derive(Debug, Parser)]
#[command(
    name = "unsafe-drop",
    version,
    about = "Find use-after-free and double-free around raw pointers in Rust programs"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Analyze a program and report findings.
    Analyze(AnalyzeArgs),

    /// Show how call targets are classified.
    Classify(ClassifyArgs),

    /// Print the transition table for both construct modes.
    Delta,
}

#[derive(Debug, Clone, ClapArgs)]
pub struct AnalyzeArgs {
    /// Program file (JSON).
    #[arg(value_name = "PROGRAM")]
    pub program: PathBuf,

    /// Entry point functions. Overrides the config file.
    #[arg(long = "entry", value_name = "FUNCTION")]
    pub entry_points: Vec<String>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
    pub format: OutputFormat,

    /// Which call sites are reconciled. Overrides the config file.
    #[arg(long, value_enum)]
    pub scope: Option<ReconcileScope>,

    /// Which calls the solver queries transitions for. Overrides the config file.
    #[arg(long, value_enum)]
    pub coverage: Option<Coverage>,

    /// Also print both run results, unfiltered and filtered.
    #[arg(long)]
    pub dump_runs: bool,

    /// Also print the values that reached a use-after-free or double-free.
    #[arg(long)]
    pub dump_errors: bool,

    /// Run the two construct modes one after the other.
    #[arg(long)]
    pub sequential: bool,

    /// Path to an `unsafe-drop.toml` config file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Exit with code 1 if any findings are reported.
    #[arg(long)]
    pub deny_findings: bool,
}

#[derive(Debug, Clone, ClapArgs)]
pub struct ClassifyArgs {
    /// Demangled call target identifiers.
    #[arg(value_name = "IDENT", required = true)]
    pub identifiers: Vec<String>,

    /// Resolve identifiers against this program's declarations.
    #[arg(long, value_name = "FILE")]
    pub program: Option<PathBuf>,

    /// Classify with `unsafe_construct_as_factory = true`.
    #[arg(long)]
    pub factory_mode: bool,

    /// Path to an `unsafe-drop.toml` config file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}
