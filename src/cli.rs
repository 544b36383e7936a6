//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::path::PathBuf;

/// Rekindle hot-swap host CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Enable verbose debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Watch the recipe and hot-swap the running unit on change
    #[command(visible_alias = "r")]
    Run {
        /// Recipe manifest path
        #[arg(default_value = "rekindle.toml", value_hint = clap::ValueHint::FilePath)]
        manifest: PathBuf,
    },

    /// Build the recipe once and exit
    #[command(visible_alias = "b")]
    Build {
        /// Recipe manifest path
        #[arg(default_value = "rekindle.toml", value_hint = clap::ValueHint::FilePath)]
        manifest: PathBuf,
    },
}
